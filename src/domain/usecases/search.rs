//
// Copyright (c) 2024 shoebox authors
//
use crate::domain::entities::{SearchParams, SearchResult};
use crate::domain::repositories::{RecordRepository, SearchRepository};
use anyhow::Error;
use std::sync::Arc;

///
/// Use case to perform attribute-based queries on the asset database.
///
/// One attribute is chosen to query the secondary indexes, and the remaining
/// attributes refine that result set in memory. Results are cached by a key
/// derived from everything except the sort, which is applied on every call.
///
pub struct SearchAssets {
    repo: Arc<dyn RecordRepository>,
    cache: Arc<dyn SearchRepository>,
}

impl SearchAssets {
    pub fn new(repo: Arc<dyn RecordRepository>, cache: Arc<dyn SearchRepository>) -> Self {
        Self { repo, cache }
    }

    // Perform the initial search of the assets using one of the criteria.
    //
    // The tags are the first choice since the tags query is more
    // sophisticated (matching assets that have _all_ of the given tags) and
    // filtering on tags afterward would not make sense, as the index values
    // do not contain the tags.
    fn query_assets(&self, params: &mut SearchParams) -> Result<Vec<SearchResult>, Error> {
        if !params.tags.is_empty() {
            let tags: Vec<Option<String>> = params.tags.drain(..).collect();
            if tags.len() == 1 && tags[0].is_none() {
                // a single "no value" entry selects untagged assets
                self.repo.query_untagged()
            } else {
                let tags: Vec<String> = tags.into_iter().flatten().collect();
                self.repo.query_by_tags(tags)
            }
        } else if params.after_date.is_some() && params.before_date.is_some() {
            let after = params.after_date.take().unwrap();
            let before = params.before_date.take().unwrap();
            self.repo.query_date_range(after, before)
        } else if params.before_date.is_some() {
            let before = params.before_date.take().unwrap();
            self.repo.query_before_date(before)
        } else if params.after_date.is_some() {
            let after = params.after_date.take().unwrap();
            self.repo.query_after_date(after)
        } else if !params.locations.is_empty() {
            let locations: Vec<Option<String>> = params.locations.drain(..).collect();
            if locations.len() == 1 && locations[0].is_none() {
                self.repo.query_unlocated()
            } else {
                let locations: Vec<String> = locations.into_iter().flatten().collect();
                self.repo.query_by_locations(locations)
            }
        } else if let Some(filename) = params.filename.take() {
            self.repo.query_by_filename(&filename)
        } else if let Some(media_type) = params.media_type.take() {
            self.repo.query_by_media_type(&media_type)
        } else {
            // did not recognize the query, return nothing
            Ok(vec![])
        }
    }
}

impl super::UseCase<Vec<SearchResult>, Params> for SearchAssets {
    fn call(&self, params: Params) -> Result<Vec<SearchResult>, Error> {
        let cache_key = params.to_string();
        let mut results = if let Some(cached) = self.cache.get(&cache_key)? {
            cached
        } else {
            // Clone the parameters so the query can consume criteria
            // in-place, leaving only those the filters should apply.
            let mut params = params.clone();
            let mut results = self.query_assets(&mut params)?;
            results = filter_by_date_range(results, &params);
            results = filter_by_locations(results, &params);
            results = filter_by_filename(results, &params);
            results = filter_by_media_type(results, &params);
            self.cache.put(cache_key, results.clone())?;
            results
        };
        super::sort_results(&mut results, params.sort_field, params.sort_order);
        Ok(results)
    }
}

pub type Params = SearchParams;

// Filter the search results by date range, if specified. As with the index
// queries, the after date is inclusive and the before date is not.
fn filter_by_date_range(results: Vec<SearchResult>, params: &SearchParams) -> Vec<SearchResult> {
    if params.after_date.is_some() && params.before_date.is_some() {
        let a = params.after_date.unwrap();
        let b = params.before_date.unwrap();
        results
            .into_iter()
            .filter(|r| r.datetime >= a && r.datetime < b)
            .collect()
    } else if params.after_date.is_some() {
        let a = params.after_date.unwrap();
        results.into_iter().filter(|r| r.datetime >= a).collect()
    } else if params.before_date.is_some() {
        let b = params.before_date.unwrap();
        results.into_iter().filter(|r| r.datetime < b).collect()
    } else {
        results
    }
}

// Filter the search results by location(s), if specified.
//
// Matches a result whose location equals any of the given values, comparing
// case-insensitively against the canonical text and the individual parts. A
// "no value" entry matches results that have no location at all.
fn filter_by_locations(results: Vec<SearchResult>, params: &SearchParams) -> Vec<SearchResult> {
    if params.locations.is_empty() {
        results
    } else {
        let queries: Vec<Option<String>> = params
            .locations
            .iter()
            .map(|v| v.as_ref().map(|s| s.to_lowercase()))
            .collect();
        results
            .into_iter()
            .filter(|r| {
                queries.iter().any(|query| match query {
                    None => r.location.is_none(),
                    Some(value) => r
                        .location
                        .as_ref()
                        .map(|loc| {
                            loc.to_string().to_lowercase() == *value || loc.partial_match(value)
                        })
                        .unwrap_or(false),
                })
            })
            .collect()
    }
}

// Filter the search results by file name, if specified.
fn filter_by_filename(results: Vec<SearchResult>, params: &SearchParams) -> Vec<SearchResult> {
    if let Some(p_filename) = params.filename.as_ref() {
        // the index keys are lowercased, so compare likewise
        let filename = p_filename.to_lowercase();
        results
            .into_iter()
            .filter(|r| r.filename.to_lowercase() == filename)
            .collect()
    } else {
        results
    }
}

// Filter the search results by media type, if specified.
fn filter_by_media_type(results: Vec<SearchResult>, params: &SearchParams) -> Vec<SearchResult> {
    if let Some(p_media_type) = params.media_type.as_ref() {
        let media_type = p_media_type.to_lowercase();
        results
            .into_iter()
            .filter(|r| r.media_type.to_lowercase() == media_type)
            .collect()
    } else {
        results
    }
}

#[cfg(test)]
mod tests {
    use super::super::UseCase;
    use super::*;
    use crate::domain::entities::{Location, SortField, SortOrder};
    use crate::domain::repositories::{MockRecordRepository, MockSearchRepository};
    use anyhow::anyhow;
    use chrono::prelude::*;
    use mockall::predicate::*;

    fn passthrough_cache() -> MockSearchRepository {
        let mut cache = MockSearchRepository::new();
        cache.expect_get().returning(|_| Ok(None));
        cache.expect_put().returning(|_, _| Ok(()));
        cache
    }

    fn make_result(asset_id: &str, filename: &str, media_type: &str, year: i32) -> SearchResult {
        SearchResult {
            asset_id: asset_id.to_owned(),
            filename: filename.to_owned(),
            media_type: media_type.to_owned(),
            location: None,
            datetime: Utc.with_ymd_and_hms(year, 5, 31, 21, 10, 11).single().unwrap(),
        }
    }

    #[test]
    fn test_search_assets_tags_ok() {
        // arrange
        let results = vec![make_result("cafebabe", "img_1234.jpg", "image/jpeg", 2018)];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags()
            .with(eq(vec!["kitten".to_owned()]))
            .returning(move |_| Ok(results.clone()));
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        let results = result.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "img_1234.jpg");
    }

    #[test]
    fn test_search_assets_untagged() {
        // arrange
        let results = vec![make_result("cafebabe", "img_1234.jpg", "image/jpeg", 2018)];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_untagged()
            .returning(move || Ok(results.clone()));
        mock.expect_query_by_tags().never();
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![None],
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn test_search_assets_unlocated() {
        // arrange
        let results = vec![make_result("cafebabe", "img_1234.jpg", "image/jpeg", 2018)];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_unlocated()
            .returning(move || Ok(results.clone()));
        mock.expect_query_by_locations().never();
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            locations: vec![None],
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn test_search_assets_err() {
        // arrange
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags()
            .returning(move |_| Err(anyhow!("oh no")));
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_err());
    }

    #[test]
    fn test_search_assets_empty_params() {
        // arrange
        let mock = MockRecordRepository::new();
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params: Params = Default::default();
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_search_assets_date_range() {
        // arrange
        let after = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).single().unwrap();
        let before = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).single().unwrap();
        let results = vec![make_result("cafebabe", "img_1234.jpg", "image/jpeg", 2018)];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_date_range()
            .with(eq(after), eq(before))
            .returning(move |_, _| Ok(results.clone()));
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            after_date: Some(after),
            before_date: Some(before),
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn test_search_assets_tags_refined_by_date() {
        // arrange: the tags index is the primary selector, the date range
        // refines the results in memory
        let after = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).single().unwrap();
        let results = vec![
            make_result("aaa", "img_2016.jpg", "image/jpeg", 2016),
            make_result("bbb", "img_2018.jpg", "image/jpeg", 2018),
        ];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags()
            .returning(move |_| Ok(results.clone()));
        mock.expect_query_after_date().never();
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            after_date: Some(after),
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        let results = result.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "img_2018.jpg");
    }

    #[test]
    fn test_search_assets_tags_refined_by_location() {
        // arrange
        let mut with_location = make_result("aaa", "img_paris.jpg", "image/jpeg", 2018);
        with_location.location = Some(Location::with_parts("", "Paris", "France"));
        let results = vec![
            with_location,
            make_result("bbb", "img_plain.jpg", "image/jpeg", 2018),
        ];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags()
            .returning(move |_| Ok(results.clone()));
        // act
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            locations: vec![Some("paris".to_owned())],
            ..Default::default()
        };
        let result = usecase.call(params);
        // assert
        assert!(result.is_ok());
        let results = result.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "aaa");

        // the full canonical form matches as well
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            locations: vec![Some("Paris, France".to_owned())],
            ..Default::default()
        };
        let result = usecase.call(params);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn test_search_assets_filename_and_media_type() {
        // arrange
        let results = vec![
            make_result("aaa", "IMG_1234.JPG", "image/jpeg", 2018),
            make_result("bbb", "img_5678.jpg", "image/jpeg", 2018),
        ];
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_filename()
            .with(eq("img_1234.jpg"))
            .returning(move |_| {
                Ok(vec![make_result("aaa", "IMG_1234.JPG", "image/jpeg", 2018)])
            });
        mock.expect_query_by_media_type()
            .with(eq("image/jpeg"))
            .returning(move |_| Ok(results.clone()));
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        // act: filename is selected before media type
        let params = Params {
            filename: Some("img_1234.jpg".to_owned()),
            ..Default::default()
        };
        let result = usecase.call(params);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
        // act: media type alone
        let params = Params {
            media_type: Some("IMAGE/JPEG".to_owned()),
            ..Default::default()
        };
        let result = usecase.call(params);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 2);
    }

    #[test]
    fn test_search_assets_cached_results_resorted() {
        // arrange: second call hits the cache yet still sorts
        let mut call_count = 0;
        let mut cache = MockSearchRepository::new();
        cache.expect_get().returning(move |_| {
            call_count += 1;
            if call_count > 1 {
                Ok(Some(vec![
                    make_result("aaa", "one.jpg", "image/jpeg", 2016),
                    make_result("bbb", "two.jpg", "image/jpeg", 2018),
                ]))
            } else {
                Ok(None)
            }
        });
        cache.expect_put().once().returning(|_, _| Ok(()));
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags().times(1).returning(|_| {
            Ok(vec![
                make_result("aaa", "one.jpg", "image/jpeg", 2016),
                make_result("bbb", "two.jpg", "image/jpeg", 2018),
            ])
        });
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(cache));
        let params = Params {
            tags: vec![Some("kitten".to_owned())],
            sort_field: Some(SortField::Date),
            sort_order: Some(SortOrder::Descending),
            ..Default::default()
        };
        // act
        let first = usecase.call(params.clone()).unwrap();
        let second = usecase.call(params).unwrap();
        // assert
        assert_eq!(first[0].asset_id, "bbb");
        assert_eq!(second[0].asset_id, "bbb");
    }

    #[test]
    fn test_search_assets_paging_window() {
        // arrange: sixteen assets spanning 2000 through 2015
        let results: Vec<SearchResult> = (0..16)
            .map(|idx| {
                make_result(
                    &format!("asset{:02}", idx),
                    &format!("img_{:02}.jpg", idx),
                    "image/jpeg",
                    2000 + idx,
                )
            })
            .collect();
        let mut mock = MockRecordRepository::new();
        mock.expect_query_by_tags()
            .returning(move |_| Ok(results.clone()));
        let usecase = SearchAssets::new(Arc::new(mock), Arc::new(passthrough_cache()));
        let params = Params {
            tags: vec![Some("cat".to_owned())],
            sort_field: Some(SortField::Date),
            sort_order: Some(SortOrder::Descending),
            ..Default::default()
        };
        // act: the caller pages by slicing the sorted results
        let results = usecase.call(params).unwrap();
        let page: Vec<&SearchResult> = results.iter().skip(6).take(6).collect();
        // assert: page holds the seventh through twelfth newest
        assert_eq!(page.len(), 6);
        assert_eq!(page[0].datetime.year(), 2009);
        assert_eq!(page[5].datetime.year(), 2004);
    }
}
