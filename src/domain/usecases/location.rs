//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{LabeledCount, Location};
use crate::domain::repositories::RecordRepository;
use crate::domain::usecases::NoParams;
use anyhow::Error;
use std::sync::Arc;

/// Use case to return every indexed location term and its usage count.
pub struct AllLocations {
    repo: Arc<dyn RecordRepository>,
}

impl AllLocations {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }
}

impl super::UseCase<Vec<LabeledCount>, NoParams> for AllLocations {
    fn call(&self, _params: NoParams) -> Result<Vec<LabeledCount>, Error> {
        self.repo.all_locations()
    }
}

/// Use case to return every unique location with its full field values,
/// suitable for driving input completion.
pub struct RawLocations {
    repo: Arc<dyn RecordRepository>,
}

impl RawLocations {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }
}

impl super::UseCase<Vec<Location>, NoParams> for RawLocations {
    fn call(&self, _params: NoParams) -> Result<Vec<Location>, Error> {
        self.repo.raw_locations()
    }
}
