//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{GeocodedLocation, GlobalPosition};
use crate::domain::repositories::LocationRepository;
use anyhow::Error;
use std::env;
use std::sync::Arc;

///
/// A location repository that always comes up empty, for configurations
/// without a geocoding provider.
///
pub struct DummyLocationRepository {}

impl DummyLocationRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for DummyLocationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationRepository for DummyLocationRepository {
    fn find_location(&self, _coords: &GlobalPosition) -> Result<GeocodedLocation, Error> {
        Ok(Default::default())
    }
}

///
/// Instantiate a location repository based on application settings, or
/// `None` if reverse geocoding has not been configured at all, in which case
/// imported assets simply go without city and region.
///
pub fn find_location_repository() -> Option<Arc<dyn LocationRepository>> {
    match env::var("GEOCODER") {
        Ok(provider) if provider == "dummy" => Some(Arc::new(DummyLocationRepository::new())),
        _ => None,
    }
}
