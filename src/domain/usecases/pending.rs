//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::SearchResult;
use crate::domain::repositories::RecordRepository;
use anyhow::Error;
use chrono::prelude::*;
use std::cmp;
use std::fmt;
use std::sync::Arc;

///
/// Use case to find "newborn" assets, those recently imported records that
/// have no caption, tags, or location and are waiting for attention.
///
pub struct FindPending {
    repo: Arc<dyn RecordRepository>,
}

impl FindPending {
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self { repo }
    }
}

impl super::UseCase<Vec<SearchResult>, Params> for FindPending {
    fn call(&self, params: Params) -> Result<Vec<SearchResult>, Error> {
        let after = params.after_date.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let results = self.repo.query_newborn(after)?;
        Ok(results)
    }
}

#[derive(Clone, Default)]
pub struct Params {
    pub after_date: Option<DateTime<Utc>>,
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params(after: {:?})", self.after_date)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.after_date == other.after_date
    }
}

impl cmp::Eq for Params {}
