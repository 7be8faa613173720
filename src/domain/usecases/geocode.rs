//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::Location;
use crate::domain::repositories::{
    BlobRepository, LocationRepository, MediaProbe, RecordRepository,
};
use crate::domain::usecases::NoParams;
use anyhow::Error;
use log::{info, warn};
use std::sync::Arc;

///
/// Scan all assets and consider those that have GPS coordinates in their
/// metadata. If the asset record does not have city and region defined, then
/// invoke the reverse geocoding collaborator with the coordinates in the
/// hopes of finding a match. If such a match is found, then add that
/// information to the asset record such that it will have values for city
/// and region, in addition to whatever location label was already present.
///
pub struct Geocoder {
    records: Arc<dyn RecordRepository>,
    blobs: Arc<dyn BlobRepository>,
    probe: Arc<dyn MediaProbe>,
    geocoder: Arc<dyn LocationRepository>,
}

impl Geocoder {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        blobs: Arc<dyn BlobRepository>,
        probe: Arc<dyn MediaProbe>,
        geocoder: Arc<dyn LocationRepository>,
    ) -> Self {
        Self {
            records,
            blobs,
            probe,
            geocoder,
        }
    }

    // Find city and region for the asset, if its media carries coordinates.
    fn geocode_asset(&self, asset_id: &str) -> Result<Option<Location>, Error> {
        let asset = self.records.get_asset(asset_id)?;
        // coded with the assumption that most asset records are lacking both
        // city and region and thus would need to be updated, hence the
        // coordinates are read and resolved before checking the record
        let Ok(media_type) = asset.media_type.parse::<mime::Mime>() else {
            warn!("could not parse media type for asset {}", asset_id);
            return Ok(None);
        };
        let blob_path = self.blobs.blob_path(asset_id)?;
        let probed = self.probe.probe(&blob_path, &media_type).unwrap_or_default();
        let Some(coords) = probed.gps else {
            return Ok(None);
        };
        let found = super::convert_location(self.geocoder.find_location(&coords).ok());
        let Some(found_loc) = found else {
            return Ok(None);
        };
        match asset.location.as_ref() {
            Some(old_loc) if old_loc.city.is_none() && old_loc.region.is_none() => {
                Ok(Some(Location {
                    label: old_loc.label.clone(),
                    city: found_loc.city,
                    region: found_loc.region,
                }))
            }
            Some(_) => Ok(None),
            None => Ok(Some(found_loc)),
        }
    }
}

impl super::UseCase<u64, NoParams> for Geocoder {
    fn call(&self, _params: NoParams) -> Result<u64, Error> {
        let mut fixed_count: u64 = 0;
        // raise any database errors immediately
        let all_assets = self.records.all_assets()?;
        for asset_id in all_assets {
            info!("checking asset {}", asset_id);
            if let Some(location) = self.geocode_asset(&asset_id)? {
                let mut asset = self.records.get_asset(&asset_id)?;
                asset.location = Some(location);
                self.records.put_asset(&asset)?;
                fixed_count += 1;
            }
        }
        info!("geocoding complete");
        Ok(fixed_count)
    }
}
