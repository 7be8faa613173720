//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::LabeledCount;
use crate::domain::repositories::RecordRepository;
use crate::domain::usecases::NoParams;
use anyhow::Error;
use std::sync::Arc;

/// Use case to return every known tag and its usage count.
pub struct AllTags {
    repo: Arc<dyn RecordRepository>,
}

impl AllTags {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }
}

impl super::UseCase<Vec<LabeledCount>, NoParams> for AllTags {
    fn call(&self, _params: NoParams) -> Result<Vec<LabeledCount>, Error> {
        self.repo.all_tags()
    }
}
