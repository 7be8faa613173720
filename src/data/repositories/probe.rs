//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{
    Dimensions, EastWest, GeodeticAngle, GlobalPosition, NorthSouth, ProbedMedia,
};
use crate::domain::repositories::{MediaProbe, Transcoder};
use crate::domain::EngineError;
use anyhow::{anyhow, Error};
use chrono::prelude::*;
use std::fs::File;
use std::io;
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use std::str;
use std::str::FromStr;

///
/// Metadata extraction based on the Exif header for images, and the
/// container metadata for MP4 and RIFF-encoded videos. Anything the probe
/// cannot make sense of is reported as unknown rather than an error.
///
pub struct MediaProbeImpl {}

impl MediaProbeImpl {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for MediaProbeImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProbe for MediaProbeImpl {
    fn probe(&self, filepath: &Path, media_type: &mime::Mime) -> Result<ProbedMedia, Error> {
        let mut probed: ProbedMedia = Default::default();
        if media_type.type_() == mime::IMAGE {
            // hope that the image has an Exif header; someday this could
            // learn about other sidecar formats
            if let Ok(exif) = read_exif(filepath) {
                probed.original_date = exif_original_date(&exif);
                probed.gps = exif_gps_coordinates(&exif);
            }
            probed.dimensions = image::image_dimensions(filepath)
                .ok()
                .map(|(width, height)| Dimensions(width, height));
        } else if media_type.type_() == mime::VIDEO {
            // check for certain types of video formats
            let sub = media_type.subtype().as_str();
            if sub == "x-msvideo" || sub == "vnd.avi" || sub == "avi" || sub == "msvideo" {
                probed.original_date = get_avi_date(filepath).ok();
            } else if let Ok((date, duration, dimensions)) = probe_mp4(filepath) {
                // for any other type of video, hope it is mp4 compatible
                probed.original_date = date;
                probed.duration = duration;
                probed.dimensions = dimensions;
            }
        }
        Ok(probed)
    }
}

fn read_exif(filepath: &Path) -> Result<exif::Exif, Error> {
    let file = File::open(filepath)?;
    let mut buffer = io::BufReader::new(&file);
    let reader = exif::Reader::new();
    Ok(reader.read_from_container(&mut buffer)?)
}

// Extract and parse the original date/time field, if any.
fn exif_original_date(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    if let exif::Value::Ascii(data) = &field.value {
        if let Ok(value) = str::from_utf8(&data[0]) {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y:%m:%d %H:%M:%S") {
                return Some(parsed.and_utc());
            }
        }
    }
    None
}

// Extract the GPS coordinates, if all four fields are present.
fn exif_gps_coordinates(exif: &exif::Exif) -> Option<GlobalPosition> {
    let latitude_ref: NorthSouth = exif_cardinal(exif, exif::Tag::GPSLatitudeRef)?;
    let longitude_ref: EastWest = exif_cardinal(exif, exif::Tag::GPSLongitudeRef)?;
    let latitude = exif_angle(exif, exif::Tag::GPSLatitude)?;
    let longitude = exif_angle(exif, exif::Tag::GPSLongitude)?;
    Some(GlobalPosition {
        latitude_ref,
        latitude,
        longitude_ref,
        longitude,
    })
}

// Read a cardinal direction reference field (N/S/E/W).
fn exif_cardinal<T: FromStr>(exif: &exif::Exif, tag: exif::Tag) -> Option<T> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    if let exif::Value::Ascii(data) = &field.value {
        if let Ok(value) = str::from_utf8(&data[0]) {
            return T::from_str(value.trim()).ok();
        }
    }
    None
}

// Read an angle expressed as degrees, minutes, and seconds.
fn exif_angle(exif: &exif::Exif, tag: exif::Tag) -> Option<GeodeticAngle> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    if let exif::Value::Rational(parts) = &field.value {
        if parts.len() >= 3 {
            return Some(GeodeticAngle {
                degrees: parts[0].to_f64(),
                minutes: parts[1].to_f64(),
                seconds: parts[2].to_f64(),
            });
        }
    }
    None
}

type Mp4Metadata = (
    Option<DateTime<Utc>>,
    Option<u32>,
    Option<Dimensions>,
);

// Read the creation time, duration, and video dimensions from an
// MP4-compatible container.
fn probe_mp4(filepath: &Path) -> Result<Mp4Metadata, Error> {
    let file = File::open(filepath)?;
    let m4 = mp4::read_mp4(file).map_err(|err| anyhow!("{:?}", err))?;
    let creation_time = m4.moov.mvhd.creation_time;
    let creation_time = if creation_time > 2082844800 {
        // subtract the difference in seconds between 1904-01-01 and the Unix
        // epoch for those times that are clearly not "Unix time"
        creation_time - 2082844800
    } else {
        creation_time
    };
    let date = Utc.timestamp_opt(creation_time as i64, 0).single();
    let duration = Some(m4.duration().as_secs() as u32);
    let mut dimensions: Option<Dimensions> = None;
    for track in m4.tracks().values() {
        if matches!(track.track_type(), Ok(mp4::TrackType::Video)) {
            dimensions = Some(Dimensions(track.width() as u32, track.height() as u32));
            break;
        }
    }
    Ok((date, duration, dimensions))
}

// Pull the capture date out of a RIFF-encoded AVI file, which cameras
// record in the IDIT chunk.
fn get_avi_date(filepath: &Path) -> Result<DateTime<Utc>, Error> {
    let mut file = File::open(filepath)?;
    let outer = riff::Chunk::read(&mut file, 0)?;
    if outer.id() != riff::RIFF_ID {
        return Err(anyhow!("not RIFF encoded"));
    }
    if outer.read_type(&mut file)?.as_str() != "AVI " {
        return Err(anyhow!("RIFF file is not an AVI"));
    }
    let idit = find_riff_data(&outer, &mut file, "IDIT")
        .ok_or_else(|| anyhow!("AVI does not contain a date"))?;
    // DTIM would be another candidate but its format needs conversion
    parse_idit_date(&idit).ok_or_else(|| anyhow!("unrecognized AVI date format"))
}

// Depth-first hunt for a small data chunk with the given four-character
// code, descending through the list chunks along the way.
fn find_riff_data<T>(chunk: &riff::Chunk, file: &mut T, label: &str) -> Option<Vec<u8>>
where
    T: std::io::Seek + std::io::Read,
{
    let id = chunk.id();
    if id == riff::RIFF_ID || id == riff::LIST_ID {
        // the iterator borrows the file, so gather the children first
        let children: Vec<riff::Chunk> = chunk.iter(file).collect::<Result<Vec<_>, _>>().ok()?;
        children
            .iter()
            .find_map(|child| find_riff_data(child, file, label))
    } else if id == riff::SEQT_ID {
        let children: Vec<riff::Chunk> = chunk.iter_no_type(file).collect::<Result<Vec<_>, _>>().ok()?;
        children
            .iter()
            .find_map(|child| find_riff_data(child, file, label))
    } else if id.as_str() == label && chunk.len() <= 256 {
        // the fields of interest are all tiny, ignore anything bigger
        chunk.read_contents(file).ok()
    } else {
        None
    }
}

// Date shapes observed in IDIT chunks from various cameras, such as
// "SAT DEC 19 05:46:12 2009" and "2005:08:17 11:42:43". The weekday forms
// differ only in how a single-digit day is padded.
const IDIT_FORMATS: [&str; 3] = [
    "%a %b %d %H:%M:%S %Y",
    "%a %b %e %H:%M:%S %Y",
    "%Y:%m:%d %H:%M:%S",
];

// Decode the IDIT payload, trying each known date shape in turn.
fn parse_idit_date(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let mut printable = bytes.to_vec();
    printable.retain(|b| *b != 0);
    let text = String::from_utf8(printable).ok()?;
    // stray whitespace at either end upsets the date parser
    let trimmed = text.trim();
    IDIT_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(trimmed, format)
            .ok()
            .map(|parsed| parsed.and_utc())
    })
}

///
/// Rendition production using the image crate for still images and the
/// ffmpeg binary for video frames.
///
pub struct TranscoderImpl {}

impl TranscoderImpl {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for TranscoderImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for TranscoderImpl {
    fn resize_image(&self, filepath: &Path, width: u32, height: u32) -> Result<Vec<u8>, Error> {
        let img = image::open(filepath)?;
        let bound_w = if width == 0 { u32::MAX } else { width };
        let bound_h = if height == 0 { u32::MAX } else { height };
        // scale down to fit the box, but never enlarge
        let scaled = if img.width() <= bound_w && img.height() <= bound_h {
            img
        } else {
            img.thumbnail(bound_w, bound_h)
        };
        // JPEG cannot carry an alpha channel
        let opaque = image::DynamicImage::ImageRgb8(scaled.into_rgb8());
        let mut buffer = Cursor::new(Vec::new());
        opaque.write_to(&mut buffer, image::ImageFormat::Jpeg)?;
        Ok(buffer.into_inner())
    }

    fn video_frame(&self, filepath: &Path, width: u32, height: u32) -> Result<Vec<u8>, Error> {
        let tmp_name = format!("{}.jpg", ulid::Ulid::new().to_string().to_lowercase());
        let tmp_path = std::env::temp_dir().join(tmp_name);
        let filter = if width > 0 && height > 0 {
            Some(format!(
                "scale=w='min({},iw)':h='min({},ih)':force_original_aspect_ratio=decrease",
                width, height
            ))
        } else if height > 0 {
            Some(format!("scale=-1:'min({},ih)'", height))
        } else if width > 0 {
            Some(format!("scale='min({},iw)':-1", width))
        } else {
            None
        };
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y").arg("-i").arg(filepath).args(["-vframes", "1"]);
        if let Some(filter) = filter.as_ref() {
            cmd.args(["-vf", filter]);
        }
        cmd.arg(&tmp_path);
        let output = cmd
            .output()
            .map_err(|err| EngineError::External(format!("could not run ffmpeg: {}", err)))?;
        if !output.status.success() {
            let _ = std::fs::remove_file(&tmp_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::External(format!("ffmpeg failed: {}", stderr)).into());
        }
        let bytes = std::fs::read(&tmp_path)?;
        let _ = std::fs::remove_file(&tmp_path);
        Ok(bytes)
    }
}
