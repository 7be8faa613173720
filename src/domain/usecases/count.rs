//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::repositories::RecordRepository;
use crate::domain::usecases::NoParams;
use anyhow::Error;
use std::sync::Arc;

/// Use case to return the total number of assets in the database.
pub struct CountAssets {
    records: Arc<dyn RecordRepository>,
}

impl CountAssets {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

impl super::UseCase<u64, NoParams> for CountAssets {
    fn call(&self, _params: NoParams) -> Result<u64, Error> {
        self.records.count_assets()
    }
}
