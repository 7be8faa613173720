//
// Copyright (c) 2024 shoebox authors
//
use crate::data::sources::rocksdb::EntityDataSourceImpl;
use crate::data::sources::EntityDataSource;
use crate::domain::repositories::BlobRepository;
use crate::domain::usecases::new_asset_id;
use crate::domain::EngineError;
use anyhow::Error;
use base64::{engine::general_purpose, Engine as _};
use chrono::prelude::*;
use log::{info, warn};
use serde_cbor::Value;
use std::collections::BTreeMap;

/// Version of the record schema written by this build.
pub const SCHEMA_VERSION: u32 = 4;

// Key of the design document that records the schema version.
const SCHEMA_KEY: &[u8] = b"meta/schema";

///
/// Bring the stored records up to the current schema version, applying each
/// intervening transformation in order. A store whose version is newer than
/// this build is refused outright.
///
/// Returns the version the store was at before any migration ran.
///
pub fn migrate(
    datasource: &EntityDataSourceImpl,
    blobs: &dyn BlobRepository,
) -> Result<u32, Error> {
    let stored = read_version(datasource)?;
    if stored > SCHEMA_VERSION {
        return Err(EngineError::Invalid(format!(
            "schema version {} is newer than supported version {}",
            stored, SCHEMA_VERSION
        ))
        .into());
    }
    if stored < SCHEMA_VERSION {
        info!("migrating records from version {} to {}", stored, SCHEMA_VERSION);
        if stored < 2 {
            rename_legacy_fields(datasource)?;
            write_version(datasource, 2)?;
        }
        if stored < 3 {
            convert_date_arrays(datasource)?;
            write_version(datasource, 3)?;
        }
        if stored < 4 {
            remint_digest_identifiers(datasource, blobs)?;
            write_version(datasource, 4)?;
        }
        info!("migration complete");
    }
    Ok(stored)
}

// Determine the schema version of the store. A store without a version
// record is either empty (and thus current) or predates versioning.
fn read_version(datasource: &EntityDataSourceImpl) -> Result<u32, Error> {
    if let Some(raw) = datasource.database().get_raw(SCHEMA_KEY)? {
        let version: u32 = serde_cbor::from_slice(&raw)?;
        return Ok(version);
    }
    if datasource.count_assets()? == 0 {
        write_version(datasource, SCHEMA_VERSION)?;
        Ok(SCHEMA_VERSION)
    } else {
        Ok(1)
    }
}

fn write_version(datasource: &EntityDataSourceImpl, version: u32) -> Result<(), Error> {
    let encoded = serde_cbor::to_vec(&version)?;
    datasource.database().put_raw(SCHEMA_KEY, &encoded)
}

// Walk every raw asset document, applying the given transformation, and
// write back those that were changed.
fn rewrite_documents<F>(datasource: &EntityDataSourceImpl, transform: F) -> Result<u64, Error>
where
    F: Fn(BTreeMap<Value, Value>) -> Option<BTreeMap<Value, Value>>,
{
    let mut fixed: u64 = 0;
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        let seek = cursor
            .as_ref()
            .map(|key| String::from_utf8_lossy(key).into_owned());
        // the scan yields the seek key again, so ask for one extra and skip it
        let pairs = datasource.database().scan("asset/", seek, 257)?;
        let fresh: Vec<_> = pairs
            .into_iter()
            .filter(|(key, _)| Some(key.as_ref()) != cursor.as_deref())
            .collect();
        if fresh.is_empty() {
            break;
        }
        cursor = fresh.last().map(|(key, _)| key.as_ref().to_vec());
        for (key, value) in fresh.into_iter() {
            let Ok(Value::Map(fields)) = serde_cbor::from_slice::<Value>(value.as_ref()) else {
                warn!("skipping undecodable record {:?}", key);
                continue;
            };
            if let Some(updated) = transform(fields) {
                let encoded = serde_cbor::to_vec(&Value::Map(updated))?;
                datasource.database().put_raw(key.as_ref(), &encoded)?;
                fixed += 1;
            }
        }
    }
    Ok(fixed)
}

// Version 1 records used the long field names of the original system; the
// compact names have been used ever since.
fn rename_legacy_fields(datasource: &EntityDataSourceImpl) -> Result<(), Error> {
    let renames: [(&str, &str); 13] = [
        ("sha256", "ch"),
        ("checksum", "ch"),
        ("file_name", "fn"),
        ("filename", "fn"),
        ("file_size", "sz"),
        ("byte_length", "sz"),
        ("mimetype", "mt"),
        ("media_type", "mt"),
        ("tags", "ta"),
        ("import_date", "id"),
        ("caption", "cp"),
        ("location", "lo"),
        ("user_date", "ud"),
    ];
    let count = rewrite_documents(datasource, |fields| {
        let mut updated: BTreeMap<Value, Value> = BTreeMap::new();
        let mut changed = false;
        for (key, value) in fields.into_iter() {
            let name = match &key {
                Value::Text(text) => text.clone(),
                _ => {
                    updated.insert(key, value);
                    continue;
                }
            };
            if name == "original_date" {
                changed = true;
                updated.insert(Value::Text("od".into()), value);
            } else if let Some((_, short)) = renames.iter().find(|(long, _)| *long == name) {
                changed = true;
                updated.insert(Value::Text((*short).into()), value);
            } else {
                updated.insert(Value::Text(name), value);
            }
        }
        if changed {
            Some(updated)
        } else {
            None
        }
    })?;
    info!("renamed fields in {} records", count);
    Ok(())
}

// Version 2 records stored dates as arrays of year, month, day, hour, and
// minute; they become ISO-8601 text.
fn convert_date_arrays(datasource: &EntityDataSourceImpl) -> Result<(), Error> {
    let count = rewrite_documents(datasource, |fields| {
        let mut updated: BTreeMap<Value, Value> = BTreeMap::new();
        let mut changed = false;
        for (key, value) in fields.into_iter() {
            let is_date_field = matches!(
                &key,
                Value::Text(text) if text == "id" || text == "ud" || text == "od"
            );
            if is_date_field {
                if let Some(converted) = date_array_to_text(&value) {
                    changed = true;
                    updated.insert(key, converted);
                    continue;
                }
            }
            updated.insert(key, value);
        }
        if changed {
            Some(updated)
        } else {
            None
        }
    })?;
    info!("converted dates in {} records", count);
    Ok(())
}

// Convert a [year, month, day, hour, minute] array into ISO-8601 text,
// returning None for any other shape.
fn date_array_to_text(value: &Value) -> Option<Value> {
    let Value::Array(parts) = value else {
        return None;
    };
    if parts.len() != 5 {
        return None;
    }
    let numbers: Vec<i64> = parts
        .iter()
        .filter_map(|part| match part {
            Value::Integer(number) => Some(*number as i64),
            _ => None,
        })
        .collect();
    if numbers.len() != 5 {
        return None;
    }
    let datetime = Utc
        .with_ymd_and_hms(
            numbers[0] as i32,
            numbers[1] as u32,
            numbers[2] as u32,
            numbers[3] as u32,
            numbers[4] as u32,
            0,
        )
        .single()?;
    Some(Value::Text(datetime.to_rfc3339()))
}

// Version 3 identifiers were the checksum itself; they become the time-based
// path scheme, and the blob moves to its new home.
fn remint_digest_identifiers(
    datasource: &EntityDataSourceImpl,
    blobs: &dyn BlobRepository,
) -> Result<(), Error> {
    let mut remint: Vec<String> = Vec::new();
    for asset_id in datasource.all_assets()? {
        if !decodes_to_path(&asset_id) {
            remint.push(asset_id);
        }
    }
    let count = remint.len();
    for old_id in remint.into_iter() {
        let mut asset = datasource.get_asset(&old_id)?;
        let media_type: mime::Mime = asset
            .media_type
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let filename = std::path::PathBuf::from(&asset.filename);
        let new_id = new_asset_id(asset.best_date(), &filename, &media_type);
        if let Err(err) = blobs.rename_blob(&old_id, &new_id) {
            // keep going; the record is still more useful with a proper
            // identifier even if the file needs attention
            warn!("could not move blob for {}: {}", old_id, err);
        }
        asset.key = new_id;
        datasource.put_asset(&asset)?;
        datasource.delete_asset(&old_id)?;
    }
    info!("re-minted {} identifiers", count);
    Ok(())
}

// An identifier is already in the current scheme if it decodes to a
// relative path with the date-based layout.
fn decodes_to_path(asset_id: &str) -> bool {
    if let Ok(decoded) = general_purpose::STANDARD.decode(asset_id) {
        if let Ok(as_string) = std::str::from_utf8(&decoded) {
            return as_string.contains('/');
        }
    }
    false
}
