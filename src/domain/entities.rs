//
// Copyright (c) 2024 shoebox authors
//
use anyhow::{anyhow, Error};
use base64::{engine::general_purpose, Engine as _};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Width and height in pixels of an image or video asset.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Dimensions(pub u32, pub u32);

/// Digital asset entity.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Asset {
    /// The unique identifier of the asset.
    pub key: String,
    /// Hash digest of the asset contents, prefixed with the algorithm.
    pub checksum: String,
    /// Original filename of the asset as supplied at import time.
    pub filename: String,
    /// Size of the asset in bytes.
    pub byte_length: u64,
    /// Media type (formerly MIME type) of the asset.
    pub media_type: String,
    /// Set of user-assigned labels for the asset. Stored lowercase, without
    /// duplicates, in first-seen order.
    pub tags: Vec<String>,
    /// Date when the asset was imported.
    pub import_date: DateTime<Utc>,
    /// Caption provided by the user.
    pub caption: Option<String>,
    /// Location information for the asset.
    pub location: Option<Location>,
    /// User-specified date of the asset.
    pub user_date: Option<DateTime<Utc>>,
    /// Date of the asset as extracted from metadata.
    pub original_date: Option<DateTime<Utc>>,
    /// Width and height of the image or video asset.
    pub dimensions: Option<Dimensions>,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            key: String::new(),
            checksum: String::new(),
            filename: String::new(),
            byte_length: 0,
            media_type: String::from("application/octet-stream"),
            tags: vec![],
            import_date: Utc::now(),
            caption: None,
            location: None,
            user_date: None,
            original_date: None,
            dimensions: None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({}, {})", self.key, self.filename)
    }
}

impl cmp::PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl cmp::Eq for Asset {}

impl Asset {
    /// Construct a new Asset with mostly default fields.
    pub fn new(key: String) -> Self {
        Asset {
            key,
            ..Default::default()
        }
    }

    /// Returns the most accurate date for the asset, starting with the
    /// user-defined date, then the date read directly from the asset itself,
    /// and finally the time of import.
    pub fn best_date(&self) -> DateTime<Utc> {
        if let Some(ud) = &self.user_date {
            ud.to_owned()
        } else if let Some(od) = &self.original_date {
            od.to_owned()
        } else {
            self.import_date.to_owned()
        }
    }

    /// Relative path of the asset within the blob store, as decoded from the
    /// identifier. Errors are converted to a string as they are almost
    /// certainly not going to happen anyway.
    pub fn filepath(&self) -> String {
        if let Ok(decoded) = general_purpose::STANDARD.decode(&self.key) {
            if let Ok(as_string) = std::str::from_utf8(&decoded) {
                as_string.to_owned()
            } else {
                "invalid UTF-8".into()
            }
        } else {
            "invalid base64".into()
        }
    }

    /// Media type to declare when serving the raw asset to a client.
    ///
    /// QuickTime containers are generally MP4-compatible and browsers that
    /// refuse `video/quicktime` will happily play `video/mp4`, so the value
    /// is rewritten at this boundary only. The stored record is never
    /// modified.
    pub fn serve_media_type(&self) -> String {
        if self.media_type.eq_ignore_ascii_case("video/quicktime") {
            "video/mp4".into()
        } else {
            self.media_type.clone()
        }
    }
}

/// Three-valued update field: leave the target untouched, clear it, or
/// replace it with a new value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Patch<T> {
    /// Leave the field as it is.
    Keep,
    /// Remove any existing value.
    Clear,
    /// Replace the existing value.
    Set(T),
}

// not derived, as that would incorrectly require T: Default
impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    /// Return `true` if this patch would leave the field untouched.
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// `AssetInput` describes the new values that are to be merged with the asset
/// being updated. The update policies are described for each field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AssetInput {
    /// Any values here will replace the existing tags after lowercasing and
    /// removal of duplicates, preserving the first occurrence. An empty list
    /// clears all tags.
    pub tags: Option<Vec<String>>,
    /// Setting the caption also runs the caption parser: any #tags found are
    /// merged into the tag set, and an @location fills in whatever location
    /// parts are not already present. The caption enhances, never clobbers.
    pub caption: Patch<String>,
    /// Setting the location merges per component: an empty string clears
    /// that component, a value replaces it, and a missing component is left
    /// alone. A location left with no values at all becomes `None`.
    pub location: Patch<Location>,
    /// Sets or clears the user-defined date.
    pub datetime: Patch<DateTime<Utc>>,
    /// A non-blank value replaces the media type; blank values are ignored
    /// rather than clearing the field.
    pub media_type: Option<String>,
    /// A non-blank value replaces the filename; blank values are ignored.
    pub filename: Option<String>,
}

impl AssetInput {
    /// Return `true` if any of the fields have a value.
    pub fn has_values(&self) -> bool {
        self.tags.is_some()
            || !self.caption.is_keep()
            || !self.location.is_keep()
            || !self.datetime.is_keep()
            || self.media_type.is_some()
            || self.filename.is_some()
    }
}

impl fmt::Display for AssetInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetInput()")
    }
}

/// Location information regarding an asset.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Location {
    /// User-defined label describing the location.
    pub label: Option<String>,
    /// Name of the city associated with this location.
    pub city: Option<String>,
    /// Name of the region (state, province) associated with this location.
    pub region: Option<String>,
}

impl Location {
    /// Construct a Location with the given label.
    pub fn new(label: &str) -> Self {
        Self {
            label: Some(label.to_owned()),
            city: None,
            region: None,
        }
    }

    /// Construct a Location using all of the parts given. If any parts are
    /// empty, then the corresponding field will be `None`.
    pub fn with_parts(label: &str, city: &str, region: &str) -> Self {
        Self {
            label: if label.is_empty() {
                None
            } else {
                Some(label.to_owned())
            },
            city: if city.is_empty() {
                None
            } else {
                Some(city.to_owned())
            },
            region: if region.is_empty() {
                None
            } else {
                Some(region.to_owned())
            },
        }
    }

    /// Return `true` if any of the fields have a value.
    pub fn has_values(&self) -> bool {
        self.label.is_some() || self.city.is_some() || self.region.is_some()
    }

    /// Return the list of terms from this location that are appropriate for
    /// indexing. All values will be lowercased and redundant values elided.
    pub fn indexable_values(&self) -> HashSet<String> {
        let mut values: HashSet<String> = HashSet::new();
        if let Some(label) = self.label.as_ref() {
            if !label.is_empty() {
                values.insert(label.to_lowercase());
            }
        }
        if let Some(city) = self.city.as_ref() {
            values.insert(city.to_lowercase());
        }
        if let Some(region) = self.region.as_ref() {
            values.insert(region.to_lowercase());
        }
        values
    }

    /// Test if any part of this location equals the query. The parts of the
    /// location will be lowercased and compared to the query as-is.
    pub fn partial_match(&self, query: &str) -> bool {
        self.label
            .as_ref()
            .map(|v| v.to_lowercase() == query)
            .unwrap_or(false)
            || self
                .city
                .as_ref()
                .map(|v| v.to_lowercase() == query)
                .unwrap_or(false)
            || self
                .region
                .as_ref()
                .map(|v| v.to_lowercase() == query)
                .unwrap_or(false)
    }

    /// Construct a string suitable for serialization, using tabs to separate
    /// the fields, regardless of their value. The values are not lowercased.
    /// If all three fields are none, then two tabs are returned.
    pub fn str_serialize(&self) -> String {
        let empty = String::from("");
        format!(
            "{}\t{}\t{}",
            self.label.as_ref().unwrap_or(&empty),
            self.city.as_ref().unwrap_or(&empty),
            self.region.as_ref().unwrap_or(&empty)
        )
    }

    /// Split the input on tabs and create a Location from the parts.
    pub fn str_deserialize(input: &str) -> Location {
        let parts: Vec<&str> = input.split('\t').collect();
        let maker = |part: &str| {
            if part.is_empty() {
                None
            } else {
                Some(part.to_owned())
            }
        };
        if parts.len() == 3 {
            Location {
                label: maker(parts[0]),
                city: maker(parts[1]),
                region: maker(parts[2]),
            }
        } else {
            Default::default()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_label = self.label.is_some();
        let has_city = self.city.is_some();
        let has_region = self.region.is_some();
        if has_label && has_city && has_region {
            write!(
                f,
                "{}; {}, {}",
                self.label.as_ref().unwrap(),
                self.city.as_ref().unwrap(),
                self.region.as_ref().unwrap()
            )
        } else if has_city && has_region {
            write!(
                f,
                "{}, {}",
                self.city.as_ref().unwrap(),
                self.region.as_ref().unwrap()
            )
        } else if has_label && has_city {
            write!(
                f,
                "{}; {}",
                self.label.as_ref().unwrap(),
                self.city.as_ref().unwrap()
            )
        } else if has_label && has_region {
            write!(
                f,
                "{}; {}",
                self.label.as_ref().unwrap(),
                self.region.as_ref().unwrap()
            )
        } else if has_label {
            write!(f, "{}", self.label.as_ref().unwrap())
        } else if has_city {
            write!(f, "{}", self.city.as_ref().unwrap())
        } else if has_region {
            write!(f, "{}", self.region.as_ref().unwrap())
        } else {
            write!(f, "")
        }
    }
}

impl FromStr for Location {
    type Err = Error;

    /// Parse the string into a location. Labels are separated by a semicolon
    /// while city and region are separated by a comma. If there are no
    /// separators, the input is treated as a label. Label, if present, comes
    /// before city and region. If there is a semicolon but no comma, then the
    /// second part is treated as the city. If there are too many semicolons
    /// or commas, the input is treated as a label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        //
        // possible valid inputs:
        //
        // label
        // label; city
        // label; city, region
        // city, region
        //
        if s.is_empty() {
            return Ok(Default::default());
        } else if s.contains(';') {
            let label_tail: Vec<&str> = s.split(';').collect();
            if label_tail.len() == 2 {
                if label_tail[1].contains(',') {
                    // label; city, region
                    let city_region: Vec<&str> = label_tail[1].split(',').collect();
                    if city_region.len() == 2 {
                        return Ok(Location::with_parts(
                            label_tail[0].trim(),
                            city_region[0].trim(),
                            city_region[1].trim(),
                        ));
                    }
                } else {
                    // label; city
                    return Ok(Location::with_parts(
                        label_tail[0].trim(),
                        label_tail[1].trim(),
                        "",
                    ));
                }
            }
        } else if s.contains(',') {
            let city_region: Vec<&str> = s.split(',').collect();
            if city_region.len() == 2 {
                // city, region
                return Ok(Location::with_parts(
                    "",
                    city_region[0].trim(),
                    city_region[1].trim(),
                ));
            }
        }
        // everything else is just a label
        Ok(Location::new(s))
    }
}

/// Action to perform on the asset tags.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum TagOperation {
    /// Add a tag with the given value.
    Add(String),
    /// Remove the tag that matches the given value.
    Remove(String),
}

/// Set, clear, add, or subtract from the asset date.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum DatetimeOperation {
    /// Set the "user" date to the value given.
    Set(DateTime<Utc>),
    /// Add the given number of days to the best date, save as "user" date.
    Add(u16),
    /// Subtract the given number of days from the best date, save as "user" date.
    Subtract(u16),
    /// Clear the "user" date field.
    Clear,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NorthSouth {
    North,
    South,
}

impl FromStr for NorthSouth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "N" {
            Ok(NorthSouth::North)
        } else if s == "S" {
            Ok(NorthSouth::South)
        } else {
            Err(anyhow!("must be N or S"))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EastWest {
    East,
    West,
}

impl FromStr for EastWest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "E" {
            Ok(EastWest::East)
        } else if s == "W" {
            Ok(EastWest::West)
        } else {
            Err(anyhow!("must be E or W"))
        }
    }
}

/// Angle as measured from a point of reference in degrees, minutes, and seconds.
#[derive(Clone, Debug)]
pub struct GeodeticAngle {
    pub degrees: f64,
    pub minutes: f64,
    pub seconds: f64,
}

/// GlobalPosition represents GPS coordinates as found in images that contain
/// location information according to the Exif standard.
#[derive(Clone, Debug)]
pub struct GlobalPosition {
    pub latitude_ref: NorthSouth,
    pub latitude: GeodeticAngle,
    pub longitude_ref: EastWest,
    pub longitude: GeodeticAngle,
}

impl GlobalPosition {
    /// Convert this global position to a pair of decimal degree values.
    pub fn as_decimals(&self) -> (f64, f64) {
        let lat_sign = match self.latitude_ref {
            NorthSouth::North => 1.0,
            NorthSouth::South => -1.0,
        };
        let lat = lat_sign
            * (self.latitude.degrees
                + self.latitude.minutes / 60.0
                + self.latitude.seconds / 3600.0);
        let long_sign = match self.longitude_ref {
            EastWest::East => 1.0,
            EastWest::West => -1.0,
        };
        let long = long_sign
            * (self.longitude.degrees
                + self.longitude.minutes / 60.0
                + self.longitude.seconds / 3600.0);
        (lat, long)
    }
}

/// Values determined by reverse geocoding a GPS location.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeocodedLocation {
    /// Value for the 'locality' or similar property.
    pub city: Option<String>,
    /// Value for the 'administrative_area_level_1' or similar property.
    pub region: Option<String>,
    /// Value for the 'country' or similar property.
    pub country: Option<String>,
}

/// Intrinsic metadata extracted from a media file by the probe collaborator.
///
/// Every field is optional; a probe failure simply leaves the fields unset.
#[derive(Clone, Debug, Default)]
pub struct ProbedMedia {
    /// Date the media was originally captured.
    pub original_date: Option<DateTime<Utc>>,
    /// GPS coordinates found in the metadata.
    pub gps: Option<GlobalPosition>,
    /// Duration in seconds for audio and video media.
    pub duration: Option<u32>,
    /// Width and height in pixels for image and video media.
    pub dimensions: Option<Dimensions>,
}

/// A label and its associated count.
///
/// `LabeledCount` represents an attribute value and the number of occurrences
/// of that value in the data set. For instance, a location label and the
/// number of times that location occurs among the assets.
#[derive(Clone, Deserialize, Serialize)]
pub struct LabeledCount {
    pub label: String,
    pub count: usize,
}

/// Field of the search results on which to sort.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum SortField {
    Date,
    Identifier,
    Filename,
    MediaType,
}

/// Order by which to sort the search results.
///
/// If not specified in the search parameters, the default is ascending.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl From<&str> for SortOrder {
    fn from(value: &str) -> Self {
        if value == "ascending" {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        }
    }
}

///
/// Parameters for searching for assets based on various criteria.
///
/// The `tags` and `locations` lists hold optional values; the singleton list
/// containing `None` selects assets that have no value at all for that
/// attribute.
///
#[derive(Clone, Default)]
pub struct SearchParams {
    pub tags: Vec<Option<String>>,
    pub locations: Vec<Option<String>>,
    pub media_type: Option<String>,
    pub filename: Option<String>,
    pub before_date: Option<DateTime<Utc>>,
    pub after_date: Option<DateTime<Utc>>,
    pub sort_field: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // format the search parameters similarly to the scan query string for
        // the sake of generating a key for the cached search repository
        //
        // for the sake of caching, ignore the sort field and sort order
        for tag in self.tags.iter() {
            match tag {
                Some(value) if !value.is_empty() => write!(f, " tag:{}", value)?,
                Some(_) => (),
                None => write!(f, " tag:")?,
            }
        }
        for loc in self.locations.iter() {
            match loc {
                Some(value) if !value.is_empty() => write!(f, " loc:{}", value)?,
                Some(_) => (),
                None => write!(f, " loc:")?,
            }
        }
        if let Some(fname) = self.filename.as_ref() {
            write!(f, " filename:{}", fname)?;
        }
        if let Some(mt) = self.media_type.as_ref() {
            // very crude splitting of media type into predicates
            let parts: Vec<&str> = mt.split('/').collect();
            if parts.len() == 2 {
                write!(f, " is:{} format:{}", parts[0], parts[1])?;
            } else {
                write!(f, " is:{}", mt)?;
            }
        }
        if let Some(bd) = self.before_date {
            write!(f, " before:{}", bd.format("%Y-%m-%d"))?;
        }
        if let Some(ad) = self.after_date {
            write!(f, " after:{}", ad.format("%Y-%m-%d"))?;
        }
        Ok(())
    }
}

impl cmp::PartialEq for SearchParams {
    fn eq(&self, other: &Self) -> bool {
        // ignore sorting when comparing two sets of parameters
        self.tags == other.tags
            && self.locations == other.locations
            && self.media_type == other.media_type
            && self.filename == other.filename
            && self.before_date == other.before_date
            && self.after_date == other.after_date
    }
}

impl cmp::Eq for SearchParams {}

/// `SearchResult` is returned by data repository queries for assets matching
/// a given set of criteria.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SearchResult {
    /// Asset identifier.
    pub asset_id: String,
    /// Original filename of the asset.
    pub filename: String,
    /// Media type (formerly MIME type) of the asset.
    pub media_type: String,
    /// Location of the asset.
    pub location: Option<Location>,
    /// Best date/time for the indexed asset.
    pub datetime: DateTime<Utc>,
}

impl SearchResult {
    /// Build a search result from the given asset.
    pub fn new(asset: &Asset) -> Self {
        Self {
            asset_id: asset.key.clone(),
            filename: asset.filename.clone(),
            media_type: asset.media_type.clone(),
            location: asset.location.clone(),
            datetime: asset.best_date(),
        }
    }
}
