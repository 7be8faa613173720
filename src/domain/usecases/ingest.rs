//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::repositories::{
    BlobRepository, LocationRepository, MediaProbe, RecordRepository,
};
use crate::domain::usecases::{import, infer_media_type, KeyedMutex};
use anyhow::Error;
use chrono::{DateTime, Utc};
use std::cmp;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

///
/// Sweep a staging directory, importing every regular file found there.
///
pub struct IngestAssets {
    records: Arc<dyn RecordRepository>,
    blobs: Arc<dyn BlobRepository>,
    probe: Arc<dyn MediaProbe>,
    geocoder: Option<Arc<dyn LocationRepository>>,
    guards: Arc<KeyedMutex>,
}

impl IngestAssets {
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
}

impl super::UseCase<usize, Params> for IngestAssets {
    fn call(&self, params: Params) -> Result<usize, Error> {
        let usecase = import::ImportAsset::new(
            self.records.clone(),
            self.blobs.clone(),
            self.probe.clone(),
            self.geocoder.clone(),
            self.guards.clone(),
        );
        let entries = fs::read_dir(params.uploads_path)?
            .map(|res| res.map(|e| e.path()))
            .collect::<Result<Vec<_>, io::Error>>()?;
        let mut count: usize = 0;
        for file_path in entries {
            if file_path.is_file() {
                if let Some(name) = file_path.file_name().and_then(OsStr::to_str) {
                    if name.starts_with('.') {
                        continue;
                    }
                }
                let extension = file_path.extension().and_then(OsStr::to_str);
                let content_type = if let Some(ext) = extension {
                    infer_media_type(ext)
                } else {
                    mime::APPLICATION_OCTET_STREAM
                };
                let last_modified: Option<DateTime<Utc>> = fs::metadata(&file_path)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                let import_params = import::Params::new(file_path, content_type, last_modified);
                usecase.call(import_params)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Clone)]
pub struct Params {
    uploads_path: PathBuf,
}

impl Params {
    pub fn new(uploads_path: PathBuf) -> Self {
        Self { uploads_path }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({:?})", self.uploads_path)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.uploads_path == other.uploads_path
    }
}

impl cmp::Eq for Params {}
