//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::repositories::RecordRepository;
use anyhow::Error;
use log::info;
use std::cmp;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Use case to export every asset record as newline-delimited JSON.
pub struct Dump {
    records: Arc<dyn RecordRepository>,
}

impl Dump {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

impl super::UseCase<u64, Params> for Dump {
    fn call(&self, params: Params) -> Result<u64, Error> {
        info!("dump commencing...");
        let count = self.records.dump(&params.filepath)?;
        info!("dump complete");
        Ok(count)
    }
}

#[derive(Clone)]
pub struct Params {
    /// Path where the JSON formatted output should be written.
    filepath: PathBuf,
}

impl Params {
    pub fn new(filepath: PathBuf) -> Self {
        Self { filepath }
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
