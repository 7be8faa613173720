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

/// Use case to reload asset records from a previous export, preserving the
/// asset identifiers found in the file.
pub struct Load {
    records: Arc<dyn RecordRepository>,
}

impl Load {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

impl super::UseCase<u64, Params> for Load {
    fn call(&self, params: Params) -> Result<u64, Error> {
        info!("load commencing...");
        let count = self.records.load(&params.filepath)?;
        info!("load complete");
        Ok(count)
    }
}

#[derive(Clone)]
pub struct Params {
    /// Path of the JSON formatted file to be read.
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
