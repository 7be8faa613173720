//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::Asset;
use crate::domain::repositories::{
    BlobRepository, LocationRepository, MediaProbe, RecordRepository,
};
use crate::domain::usecases::KeyedMutex;
use anyhow::Error;
use chrono::prelude::*;
use log::warn;
use std::cmp;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

///
/// Import a staged file into the system, yielding the new asset record, or
/// the existing record if the checksum matches one already stored.
///
pub struct ImportAsset {
    records: Arc<dyn RecordRepository>,
    blobs: Arc<dyn BlobRepository>,
    probe: Arc<dyn MediaProbe>,
    geocoder: Option<Arc<dyn LocationRepository>>,
    guards: Arc<KeyedMutex>,
}

impl ImportAsset {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        blobs: Arc<dyn BlobRepository>,
        probe: Arc<dyn MediaProbe>,
        geocoder: Option<Arc<dyn LocationRepository>>,
        guards: Arc<KeyedMutex>,
    ) -> Self {
        Self {
            records,
            blobs,
            probe,
            geocoder,
            guards,
        }
    }

    // Create an asset entity based on available information.
    fn create_asset(&self, digest: String, params: &Params) -> Result<Asset, Error> {
        let now = Utc::now();
        let filename = super::get_file_name(&params.filepath);
        let metadata = std::fs::metadata(&params.filepath)?;
        let byte_length = metadata.len();
        // probe failures are not fatal, the asset is imported regardless
        let probed = match self.probe.probe(&params.filepath, &params.media_type) {
            Ok(value) => value,
            Err(err) => {
                warn!("probe failed for {}: {}", filename, err);
                Default::default()
            }
        };
        // prefer the date from the media itself when minting the identifier,
        // falling back to the file modification time, then the clock
        let preferred = probed
            .original_date
            .or(params.last_modified)
            .unwrap_or(now);
        let asset_id = super::new_asset_id(preferred, &params.filepath, &params.media_type);
        let location = self.geocoder.as_ref().and_then(|geocoder| {
            let coords = probed.gps.as_ref()?;
            // geocoder timeouts and failures degrade to "unknown"
            super::convert_location(geocoder.find_location(coords).ok())
        });
        let asset = Asset {
            key: asset_id,
            checksum: digest,
            filename,
            byte_length,
            media_type: params.media_type.to_string(),
            tags: vec![],
            import_date: now,
            caption: None,
            location,
            user_date: None,
            original_date: probed.original_date,
            dimensions: probed.dimensions,
        };
        Ok(asset)
    }
}

impl super::UseCase<Asset, Params> for ImportAsset {
    fn call(&self, params: Params) -> Result<Asset, Error> {
        let digest = super::checksum_file(&params.filepath)?;
        // serialize imports of identical content so concurrent requests
        // produce exactly one record
        let cell = self.guards.acquire(&digest);
        let _token = cell.lock().unwrap();
        let asset = match self.records.get_asset_by_digest(&digest)? {
            Some(asset) => {
                // Nothing new to record, but move the staged file into place
                // anyway; if the blob went missing this restores it, and
                // otherwise the staged copy is simply cleaned up.
                self.blobs.store_blob(&params.filepath, &asset)?;
                asset
            }
            None => {
                let asset = self.create_asset(digest, &params)?;
                self.blobs.store_blob(&params.filepath, &asset)?;
                if let Err(err) = self.records.put_asset(&asset) {
                    // unwind the blob so a failed import leaves no trace
                    if let Err(derr) = self.blobs.delete_blob(&asset.key) {
                        warn!("rollback failed for {}: {}", asset.key, derr);
                    }
                    return Err(err);
                }
                asset
            }
        };
        Ok(asset)
    }
}

#[derive(Clone)]
pub struct Params {
    /// Path of the staged file to import.
    pub filepath: PathBuf,
    /// Media type hint supplied by the caller.
    pub media_type: mime::Mime,
    /// Modification time of the original file, if known.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Params {
    pub fn new(filepath: PathBuf, media_type: mime::Mime, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            filepath,
            media_type,
            last_modified,
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({:?})", self.filepath)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.filepath == other.filepath
    }
}

impl cmp::Eq for Params {}
