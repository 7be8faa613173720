//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{Asset, Dimensions, Location};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

///
/// Compact representation of an `Asset` as stored in the key-value store.
/// Field names are abbreviated to keep the records small, and the key is
/// omitted since it is the record key itself.
///
#[derive(Serialize, Deserialize)]
#[serde(remote = "Asset")]
pub struct AssetModel {
    #[serde(skip)]
    pub key: String,
    #[serde(rename = "ch")]
    pub checksum: String,
    #[serde(rename = "fn")]
    pub filename: String,
    #[serde(rename = "sz")]
    pub byte_length: u64,
    #[serde(rename = "mt")]
    pub media_type: String,
    #[serde(rename = "ta")]
    pub tags: Vec<String>,
    #[serde(rename = "id")]
    pub import_date: DateTime<Utc>,
    #[serde(rename = "cp")]
    pub caption: Option<String>,
    #[serde(rename = "lo")]
    pub location: Option<Location>,
    #[serde(rename = "ud")]
    pub user_date: Option<DateTime<Utc>>,
    #[serde(rename = "od")]
    pub original_date: Option<DateTime<Utc>>,
    #[serde(rename = "dm")]
    pub dimensions: Option<Dimensions>,
}

///
/// External form of a location in the dump file: either the historical bare
/// string, or an object holding the label, city, and region.
///
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocationRepr {
    /// The historical representation, a single string.
    Simple(String),
    /// All three fields, null for those that are absent.
    Full {
        l: Option<String>,
        c: Option<String>,
        r: Option<String>,
    },
}

impl From<&Location> for LocationRepr {
    fn from(location: &Location) -> Self {
        if location.city.is_none() && location.region.is_none() {
            LocationRepr::Simple(location.label.clone().unwrap_or_default())
        } else {
            LocationRepr::Full {
                l: location.label.clone(),
                c: location.city.clone(),
                r: location.region.clone(),
            }
        }
    }
}

impl From<LocationRepr> for Location {
    fn from(repr: LocationRepr) -> Self {
        match repr {
            // the bare string may carry the canonical separators
            LocationRepr::Simple(value) => Location::from_str(&value).unwrap_or_default(),
            LocationRepr::Full { l, c, r } => Location {
                label: l.filter(|v| !v.is_empty()),
                city: c.filter(|v| !v.is_empty()),
                region: r.filter(|v| !v.is_empty()),
            },
        }
    }
}

// Older exports wrote dates as milliseconds since the Unix epoch, newer ones
// use ISO-8601 text; both are accepted when reading.
mod flexdate {
    use chrono::prelude::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(DateTime<Utc>),
        Millis(i64),
    }

    pub fn from_repr<E: serde::de::Error>(repr: Repr) -> Result<DateTime<Utc>, E> {
        match repr {
            Repr::Text(datetime) => Ok(datetime),
            Repr::Millis(millis) => Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| E::custom("timestamp out of range")),
        }
    }

    pub fn serialize<S: Serializer>(
        date: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        date.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let repr = Repr::deserialize(deserializer)?;
        from_repr(repr)
    }

    pub mod optional {
        use super::Repr;
        use chrono::prelude::*;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(
            date: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            date.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let maybe: Option<Repr> = Option::deserialize(deserializer)?;
            maybe.map(super::from_repr).transpose()
        }
    }
}

///
/// External form of an asset record, one line of the dump file. The field
/// names are stable, null values are written explicitly, and dates are
/// ISO-8601 in UTC.
///
#[derive(Deserialize, Serialize)]
pub struct DumpedAsset {
    pub key: String,
    pub checksum: String,
    pub filename: String,
    pub byte_length: u64,
    pub media_type: String,
    pub tags: Vec<String>,
    #[serde(with = "flexdate")]
    pub import_date: DateTime<Utc>,
    #[serde(with = "flexdate::optional")]
    pub user_date: Option<DateTime<Utc>>,
    #[serde(with = "flexdate::optional")]
    pub original_date: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    pub location: Option<LocationRepr>,
    pub dimensions: Option<Dimensions>,
}

impl DumpedAsset {
    /// Project the asset into its external form.
    pub fn from_asset(asset: &Asset) -> Self {
        Self {
            key: asset.key.clone(),
            checksum: asset.checksum.clone(),
            filename: asset.filename.clone(),
            byte_length: asset.byte_length,
            media_type: asset.media_type.clone(),
            tags: asset.tags.clone(),
            import_date: asset.import_date,
            user_date: asset.user_date,
            original_date: asset.original_date,
            caption: asset.caption.clone(),
            location: asset.location.as_ref().map(LocationRepr::from),
            dimensions: asset.dimensions.clone(),
        }
    }

    /// Reconstruct the asset record from its external form.
    pub fn into_asset(self) -> Asset {
        Asset {
            key: self.key,
            checksum: self.checksum,
            filename: self.filename,
            byte_length: self.byte_length,
            media_type: self.media_type,
            tags: self.tags,
            import_date: self.import_date,
            caption: self.caption,
            location: self
                .location
                .map(Location::from)
                .filter(|loc| loc.has_values()),
            user_date: self.user_date,
            original_date: self.original_date,
            dimensions: self.dimensions,
        }
    }
}
