//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::LabeledCount;
use crate::domain::repositories::RecordRepository;
use crate::domain::usecases::NoParams;
use anyhow::Error;
use std::sync::Arc;

/// Use case to return every year in which assets were captured and the
/// number of assets for each. Years derive from the best date in UTC.
pub struct AllYears {
    repo: Arc<dyn RecordRepository>,
}

impl AllYears {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }
}

impl super::UseCase<Vec<LabeledCount>, NoParams> for AllYears {
    fn call(&self, _params: NoParams) -> Result<Vec<LabeledCount>, Error> {
        self.repo.all_years()
    }
}
