//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::Asset;
use crate::domain::repositories::{
    BlobRepository, LocationRepository, MediaProbe, RecordRepository,
};
use crate::domain::usecases::{checksum_file, KeyedMutex};
use anyhow::Error;
use chrono::prelude::*;
use log::warn;
use std::cmp;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

///
/// Replace the blob associated with an existing asset and update all of the
/// appropriate fields in the asset record. Because the file extension may
/// have changed, an entirely new identifier is generated and a new record is
/// created, folding the old record into it.
///
pub struct ReplaceAsset {
    records: Arc<dyn RecordRepository>,
    blobs: Arc<dyn BlobRepository>,
    probe: Arc<dyn MediaProbe>,
    geocoder: Option<Arc<dyn LocationRepository>>,
    guards: Arc<KeyedMutex>,
}

impl ReplaceAsset {
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

    // Update an asset entity based on the replacement file.
    fn update_asset(&self, digest: String, params: &Params) -> Result<Asset, Error> {
        let mut asset = self.records.get_asset(&params.asset_id)?;
        asset.checksum = digest;
        asset.filename = super::get_file_name(&params.filepath);
        asset.media_type = params.media_type.to_string();
        let metadata = std::fs::metadata(&params.filepath)?;
        asset.byte_length = metadata.len();
        let probed = match self.probe.probe(&params.filepath, &params.media_type) {
            Ok(value) => value,
            Err(err) => {
                warn!("probe failed for {}: {}", asset.filename, err);
                Default::default()
            }
        };
        if let Some(geocoder) = self.geocoder.as_ref() {
            if let Some(coords) = probed.gps.as_ref() {
                let converted = super::convert_location(geocoder.find_location(coords).ok());
                asset.location = super::merge_locations(asset.location.take(), converted);
            }
        }
        asset.original_date = probed.original_date;
        asset.dimensions = probed.dimensions;
        Ok(asset)
    }
}

impl super::UseCase<Asset, Params> for ReplaceAsset {
    fn call(&self, params: Params) -> Result<Asset, Error> {
        let cell = self.guards.acquire(&params.asset_id);
        let _token = cell.lock().unwrap();
        let digest = checksum_file(&params.filepath)?;
        let asset = match self.records.get_asset_by_digest(&digest)? {
            Some(_) => {
                // if an identical asset already exists, then replace is not
                // possible and we simply need to remove the uploaded file
                std::fs::remove_file(&params.filepath)?;
                // return the original record as-is so the client can know
                // that nothing changed on the backend
                self.records.get_asset(&params.asset_id)?
            }
            None => {
                let mut asset = self.update_asset(digest, &params)?;
                let old_asset_id = asset.key.clone();
                let now = Utc::now();
                let new_asset_id = super::new_asset_id(now, &params.filepath, &params.media_type);
                asset.key = new_asset_id.clone();
                self.records.put_asset(&asset)?;
                self.blobs.rename_blob(&old_asset_id, &new_asset_id)?;
                // blob repo will ensure the temporary file is (re)moved
                self.blobs.replace_blob(&params.filepath, &asset)?;
                self.records.delete_asset(&old_asset_id)?;
                // every cached rendition shows the old content
                self.blobs.clear_cache(&old_asset_id)?;
                self.blobs.clear_cache(&asset.key)?;
                asset
            }
        };
        Ok(asset)
    }
}

#[derive(Clone)]
pub struct Params {
    /// Identifier of the asset to be replaced.
    asset_id: String,
    /// Path of the new file that will replace the asset.
    filepath: PathBuf,
    /// Media type for the new file.
    media_type: mime::Mime,
}

impl Params {
    pub fn new(asset_id: String, filepath: PathBuf, media_type: mime::Mime) -> Self {
        Self {
            asset_id,
            filepath,
            media_type,
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({:?})", self.asset_id)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.asset_id == other.asset_id
    }
}

impl cmp::Eq for Params {}
