//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{
    GeocodedLocation, Location, SearchResult, SortField, SortOrder,
};
use anyhow::Error;
use base64::{engine::general_purpose, Engine as _};
use chrono::prelude::*;
use std::cmp;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub mod count;
pub mod dump;
pub mod edit;
pub mod fetch;
pub mod geocode;
pub mod import;
pub mod ingest;
pub mod load;
pub mod location;
pub mod pending;
pub mod replace;
pub mod scan;
pub mod search;
pub mod tags;
pub mod types;
pub mod update;
pub mod year;

/// `UseCase` is the interface by which all use cases are invoked.
pub trait UseCase<Type, Params> {
    fn call(&self, params: Params) -> Result<Type, Error>;
}

/// `NoParams` is the type for use cases that do not take arguments.
#[derive(Clone, Default)]
pub struct NoParams {}

impl fmt::Display for NoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoParams()")
    }
}

impl cmp::PartialEq for NoParams {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl cmp::Eq for NoParams {}

///
/// Compute the SHA256 hash digest of the given file.
///
pub fn checksum_file(infile: &Path) -> io::Result<String> {
    use sha2::{Digest, Sha256};
    let mut file = File::open(infile)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(format!("sha256-{:x}", digest))
}

///
/// Return the last part of the path, converting to a String.
///
pub fn get_file_name(path: &Path) -> String {
    // ignore any paths that end in '..'
    if let Some(p) = path.file_name() {
        // ignore any paths that failed UTF-8 translation
        if let Some(pp) = p.to_str() {
            return pp.to_owned();
        }
    }
    // normal conversion failed, return whatever garbage is there
    path.to_string_lossy().into_owned()
}

///
/// Use the datetime, filename, and media type to produce a relative path,
/// and return as a base64 encoded value, suitable as an identifier.
///
/// The identifier is suitable to be used as a file path within blob storage.
/// The date/time is rounded down to the nearest quarter hour (e.g. 21:50
/// becomes 21:45, 08:10 becomes 08:00) to produce the leading directories.
///
/// The extension of the original file is retained; if the media type implies
/// a different extension than the one on the file, the canonical extension
/// is appended rather than replacing the original. A file with no extension
/// at all receives the canonical extension alone.
///
/// This is _not_ a pure function, since it involves a random component. It
/// does, however, avoid any possibility of name collisions.
///
pub fn new_asset_id(datetime: DateTime<Utc>, filename: &Path, media_type: &mime::Mime) -> String {
    let minutes = (datetime.minute() / 15) * 15;
    let round_date = datetime.with_minute(minutes).unwrap();
    let mut leading_path = round_date.format("%Y/%m/%d/%H%M/").to_string();
    let mut name = ulid::Ulid::new().to_string();
    let extension = filename.extension().and_then(OsStr::to_str);
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(ext);
        // if the extension does not agree with the detected media type, add
        // the canonical extension so the file will at least open correctly
        let agrees = mime_guess::from_ext(ext).iter().any(|m| &m == media_type);
        if !agrees {
            if let Some(canonical) = canonical_extension(media_type) {
                if !ext.eq_ignore_ascii_case(&canonical) {
                    name.push('.');
                    name.push_str(&canonical);
                }
            }
        }
    } else if let Some(canonical) = canonical_extension(media_type) {
        name.push('.');
        name.push_str(&canonical);
    }
    leading_path.push_str(&name);
    let rel_path = leading_path.to_lowercase();
    general_purpose::STANDARD.encode(rel_path)
}

///
/// Return the preferred file extension for the given media type, if any.
///
fn canonical_extension(media_type: &mime::Mime) -> Option<String> {
    // mime_guess orders its reverse mappings alphabetically, which would
    // yield surprises such as "jpe" for JPEG images, so prefer a fixed table
    // for the common cases
    let preferred = match media_type.essence_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/tiff" => Some("tif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/mpeg" => Some("mpg"),
        "video/x-msvideo" => Some("avi"),
        "video/webm" => Some("webm"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" => Some("m4a"),
        "audio/ogg" => Some("ogg"),
        "application/pdf" => Some("pdf"),
        _ => None,
    };
    if let Some(ext) = preferred {
        return Some(ext.to_owned());
    }
    mime_guess::get_mime_extensions(media_type)
        .and_then(|exts| exts.first())
        .map(|ext| (*ext).to_owned())
}

///
/// Return the first guessed media type based on the extension.
///
pub fn infer_media_type(extension: &str) -> mime::Mime {
    // Alternatively could use a crate that reads the content and guesses at
    // the media type, perhaps as a fallback when the extension-based guess
    // yields "octet-stream".
    let guess = mime_guess::from_ext(extension);
    guess.first_or_octet_stream()
}

///
/// Convert an optional geocoded result into a location, if the result has
/// anything useful to offer.
///
pub fn convert_location(geocoded: Option<GeocodedLocation>) -> Option<Location> {
    if let Some(value) = geocoded {
        if value.city.is_some() || value.region.is_some() {
            return Some(Location {
                label: None,
                city: value.city,
                region: value.region,
            });
        }
    }
    None
}

///
/// Combine an existing location with a newly discovered one, filling in only
/// those parts the existing location lacks. The existing values are never
/// clobbered.
///
pub fn merge_locations(
    existing: Option<Location>,
    incoming: Option<Location>,
) -> Option<Location> {
    match (existing, incoming) {
        (Some(old), Some(new)) => Some(Location {
            label: old.label.or(new.label),
            city: old.city.or(new.city),
            region: old.region.or(new.region),
        }),
        (Some(old), None) => Some(old),
        (None, Some(new)) => Some(new),
        (None, None) => None,
    }
}

///
/// Merge a location input into the existing value, one component at a time:
/// an empty string clears the component, a value replaces it, and an absent
/// component leaves the existing value alone. If nothing remains afterward,
/// the result is `None`.
///
pub fn apply_location_input(existing: Option<Location>, input: &Location) -> Option<Location> {
    let old = existing.unwrap_or_default();
    let component = |old_part: Option<String>, new_part: &Option<String>| match new_part {
        Some(value) if value.is_empty() => None,
        Some(value) => Some(value.to_owned()),
        None => old_part,
    };
    let merged = Location {
        label: component(old.label, &input.label),
        city: component(old.city, &input.city),
        region: component(old.region, &input.region),
    };
    if merged.has_values() {
        Some(merged)
    } else {
        None
    }
}

///
/// Sort the results on the requested field, in ascending order unless
/// otherwise specified, breaking ties by asset identifier so the ordering is
/// stable across invocations.
///
pub fn sort_results(
    results: &mut [SearchResult],
    sort_field: Option<SortField>,
    sort_order: Option<SortOrder>,
) {
    if let Some(field) = sort_field {
        let order = sort_order.unwrap_or(SortOrder::Ascending);
        results.sort_unstable_by(|a, b| {
            let ordering = match field {
                SortField::Date => a.datetime.cmp(&b.datetime),
                SortField::Identifier => a.asset_id.cmp(&b.asset_id),
                SortField::Filename => a.filename.cmp(&b.filename),
                SortField::MediaType => a.media_type.cmp(&b.media_type),
            };
            let ordering = ordering.then_with(|| a.asset_id.cmp(&b.asset_id));
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
    }
}

// Beyond this number of tracked keys, the mutex map sheds entries that no
// caller currently holds.
const KEYED_MUTEX_HIGH_WATER: usize = 256;

///
/// A map of mutexes addressed by key, used to serialize operations on a
/// particular asset (by identifier, or by checksum during import). The
/// process owns exactly one of these, created at startup and shared by the
/// mutating use cases.
///
/// Acquire the cell for a key, then lock it for the duration of the
/// operation:
///
/// ```ignore
/// let cell = guards.acquire(&asset_id);
/// let _token = cell.lock().unwrap();
/// ```
///
pub struct KeyedMutex {
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Return the lock cell associated with the given key, creating it if
    /// necessary.
    pub fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut keys = self.keys.lock().unwrap();
        if keys.len() > KEYED_MUTEX_HIGH_WATER {
            // a cell is in use if anything other than the map refers to it
            keys.retain(|_, cell| Arc::strong_count(cell) > 1);
        }
        keys.entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}
