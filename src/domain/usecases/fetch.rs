//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::Asset;
use crate::domain::repositories::RecordRepository;
use anyhow::Error;
use std::cmp;
use std::fmt;
use std::sync::Arc;

/// Use case to retrieve a single asset record by its identifier.
pub struct FetchAsset {
    records: Arc<dyn RecordRepository>,
}

impl FetchAsset {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

impl super::UseCase<Asset, Params> for FetchAsset {
    fn call(&self, params: Params) -> Result<Asset, Error> {
        self.records.get_asset(&params.asset_id)
    }
}

#[derive(Clone)]
pub struct Params {
    asset_id: String,
}

impl Params {
    pub fn new(asset_id: String) -> Self {
        Self { asset_id }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({})", self.asset_id)
    }
}

impl cmp::PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.asset_id == other.asset_id
    }
}

impl cmp::Eq for Params {}

#[cfg(test)]
mod tests {
    use super::super::UseCase;
    use super::*;
    use crate::domain::repositories::MockRecordRepository;
    use anyhow::anyhow;
    use chrono::prelude::*;
    use mockall::predicate::*;

    #[test]
    fn test_fetch_asset_ok() {
        // arrange
        let asset1 = Asset {
            key: "abc123".to_owned(),
            checksum: "cafebabe".to_owned(),
            filename: "img_1234.jpg".to_owned(),
            byte_length: 1024,
            media_type: "image/jpeg".to_owned(),
            tags: vec!["cat".to_owned(), "dog".to_owned()],
            import_date: Utc::now(),
            caption: None,
            location: None,
            user_date: None,
            original_date: None,
            dimensions: None,
        };
        let mut mock = MockRecordRepository::new();
        mock.expect_get_asset()
            .with(eq("abc123"))
            .returning(move |_| Ok(asset1.clone()));
        // act
        let usecase = FetchAsset::new(Arc::new(mock));
        let params = Params::new("abc123".to_owned());
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        let asset = result.unwrap();
        assert_eq!(asset.filename, "img_1234.jpg");
    }

    #[test]
    fn test_fetch_asset_err() {
        // arrange
        let mut mock = MockRecordRepository::new();
        mock.expect_get_asset()
            .with(eq("abc123"))
            .returning(move |_| Err(anyhow!("oh no")));
        // act
        let usecase = FetchAsset::new(Arc::new(mock));
        let params = Params::new("abc123".to_owned());
        let result = usecase.call(params);
        // assert
        assert!(result.is_err());
    }
}
