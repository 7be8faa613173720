//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{Asset, DatetimeOperation, Location, TagOperation};
use crate::domain::repositories::{RecordRepository, SearchRepository};
use crate::domain::usecases::update::caption;
use crate::domain::usecases::KeyedMutex;
use anyhow::Error;
use std::cmp;
use std::fmt;
use std::sync::Arc;

///
/// Use case to make changes to multiple assets at one time. The inputs
/// include the set of asset identifiers and the operations to be performed
/// on each of those assets independently. Assets whose resulting record is
/// identical to the stored record are skipped, and the count of records
/// actually written is returned.
///
pub struct EditAssets {
    records: Arc<dyn RecordRepository>,
    cache: Arc<dyn SearchRepository>,
    guards: Arc<KeyedMutex>,
}

impl EditAssets {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        cache: Arc<dyn SearchRepository>,
        guards: Arc<KeyedMutex>,
    ) -> Self {
        Self {
            records,
            cache,
            guards,
        }
    }
}

impl super::UseCase<u64, Params> for EditAssets {
    fn call(&self, params: Params) -> Result<u64, Error> {
        let mut fixed_count: u64 = 0;
        for asset_id in params.assets.iter() {
            let cell = self.guards.acquire(asset_id);
            let _token = cell.lock().unwrap();
            let mut asset = self.records.get_asset(asset_id)?;
            if modify_asset(&mut asset, &params) {
                self.records.put_asset(&asset)?;
                fixed_count += 1;
            }
        }
        if fixed_count > 0 {
            self.cache.clear()?;
        }
        Ok(fixed_count)
    }
}

// Compare the fields that the edit operations can touch.
fn records_differ(a: &Asset, b: &Asset) -> bool {
    a.tags != b.tags
        || a.caption != b.caption
        || a.location != b.location
        || a.user_date != b.user_date
}

fn modify_asset(asset: &mut Asset, params: &Params) -> bool {
    let before = asset.clone();
    for tag_op in params.tag_ops.iter() {
        match tag_op {
            TagOperation::Add(name) => {
                let folded = name.to_lowercase();
                if !folded.is_empty() && !asset.tags.contains(&folded) {
                    asset.tags.push(folded);
                }
            }
            TagOperation::Remove(name) => {
                let folded = name.to_lowercase();
                asset.tags.retain(|t| t != &folded);
            }
        }
    }
    if let Some(location) = params.location_op.as_ref() {
        // the whole location is replaced; one with no values clears it
        asset.location = if location.has_values() {
            Some(location.to_owned())
        } else {
            None
        };
    }
    if let Some(text) = params.caption_op.as_ref() {
        let results = caption::parse(text);
        asset.caption = Some(text.to_owned());
        for tag in results.tags.iter() {
            let folded = tag.to_lowercase();
            if !folded.is_empty() && !asset.tags.contains(&folded) {
                asset.tags.push(folded);
            }
        }
        asset.location = super::merge_locations(asset.location.take(), results.location);
    }
    if let Some(date_op) = params.datetime_op.as_ref() {
        match date_op {
            DatetimeOperation::Set(datetime) => {
                if asset.best_date() != *datetime {
                    asset.user_date = Some(*datetime);
                }
            }
            DatetimeOperation::Add(days) => {
                let delta = chrono::TimeDelta::days(*days as i64);
                asset.user_date = asset.best_date().checked_add_signed(delta);
            }
            DatetimeOperation::Subtract(days) => {
                let delta = chrono::TimeDelta::days(*days as i64);
                asset.user_date = asset.best_date().checked_sub_signed(delta);
            }
            DatetimeOperation::Clear => {
                asset.user_date = None;
            }
        }
    }
    records_differ(&before, asset)
}

#[derive(Clone, Default)]
pub struct Params {
    /// Identifiers of the assets to be modified.
    pub assets: Vec<String>,
    /// Operations to perform on the tags.
    pub tag_ops: Vec<TagOperation>,
    /// Replacement for the location; one with no values clears the field.
    pub location_op: Option<Location>,
    /// Replacement caption; tags and location found within are merged in.
    pub caption_op: Option<String>,
    /// Optional date/time operation to perform.
    pub datetime_op: Option<DatetimeOperation>,
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({})", self.assets.len())
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.assets == other.assets
    }
}

impl cmp::Eq for Params {}
