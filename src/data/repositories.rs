//
// Copyright (c) 2024 shoebox authors
//
use crate::data::models::DumpedAsset;
use crate::data::sources::EntityDataSource;
use crate::domain::entities::{Asset, LabeledCount, Location, SearchResult};
use crate::domain::repositories::{
    BlobRepository, FetchedAssets, RecordRepository, SearchRepository, Transcoder,
};
use crate::domain::EngineError;
use anyhow::Error;
use base64::{engine::general_purpose, Engine as _};
use chrono::prelude::*;
use log::debug;
use lru::LruCache;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

pub mod geo;
pub mod probe;

// Number of records read or written per batch during dump and load.
const DUMP_BATCH_SIZE: usize = 256;

pub struct RecordRepositoryImpl {
    datasource: Arc<dyn EntityDataSource>,
}

impl RecordRepositoryImpl {
    pub fn new(datasource: Arc<dyn EntityDataSource>) -> Self {
        Self { datasource }
    }

    // Scan all records, keeping those that pass the filter.
    fn scan_matching(
        &self,
        keep: fn(&Asset) -> bool,
    ) -> Result<Vec<SearchResult>, Error> {
        let mut results: Vec<SearchResult> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut batch = self.datasource.fetch_assets(cursor, DUMP_BATCH_SIZE)?;
            for asset in batch.assets.into_iter() {
                if keep(&asset) {
                    results.push(SearchResult::new(&asset));
                }
            }
            cursor = batch.cursor.take();
            if cursor.is_none() {
                break;
            }
        }
        Ok(results)
    }
}

impl RecordRepository for RecordRepositoryImpl {
    fn get_asset(&self, asset_id: &str) -> Result<Asset, Error> {
        self.datasource.get_asset(asset_id)
    }

    fn get_asset_by_digest(&self, digest: &str) -> Result<Option<Asset>, Error> {
        self.datasource.get_asset_by_digest(digest)
    }

    fn put_asset(&self, asset: &Asset) -> Result<(), Error> {
        self.datasource.put_asset(asset)
    }

    fn delete_asset(&self, asset_id: &str) -> Result<(), Error> {
        self.datasource.delete_asset(asset_id)
    }

    fn count_assets(&self) -> Result<u64, Error> {
        self.datasource.count_assets()
    }

    fn all_locations(&self) -> Result<Vec<LabeledCount>, Error> {
        self.datasource.all_locations()
    }

    fn raw_locations(&self) -> Result<Vec<Location>, Error> {
        self.datasource.raw_locations()
    }

    fn all_years(&self) -> Result<Vec<LabeledCount>, Error> {
        self.datasource.all_years()
    }

    fn all_tags(&self) -> Result<Vec<LabeledCount>, Error> {
        self.datasource.all_tags()
    }

    fn all_media_types(&self) -> Result<Vec<LabeledCount>, Error> {
        self.datasource.all_media_types()
    }

    fn all_assets(&self) -> Result<Vec<String>, Error> {
        self.datasource.all_assets()
    }

    fn fetch_assets(&self, cursor: Option<String>, count: usize) -> Result<FetchedAssets, Error> {
        self.datasource.fetch_assets(cursor, count)
    }

    fn store_assets(&self, incoming: Vec<Asset>) -> Result<(), Error> {
        self.datasource.store_assets(incoming)
    }

    fn query_by_tags(&self, tags: Vec<String>) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_by_tags(tags)
    }

    fn query_untagged(&self) -> Result<Vec<SearchResult>, Error> {
        // no index serves this query, so scan the records
        self.scan_matching(|asset| asset.tags.is_empty())
    }

    fn query_by_locations(&self, locations: Vec<String>) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_by_locations(locations)
    }

    fn query_unlocated(&self) -> Result<Vec<SearchResult>, Error> {
        self.scan_matching(|asset| asset.location.is_none())
    }

    fn query_by_filename(&self, filename: &str) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_by_filename(filename)
    }

    fn query_by_media_type(&self, media_type: &str) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_by_media_type(media_type)
    }

    fn query_before_date(&self, before: DateTime<Utc>) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_before_date(before)
    }

    fn query_after_date(&self, after: DateTime<Utc>) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_after_date(after)
    }

    fn query_date_range(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_date_range(after, before)
    }

    fn query_newborn(&self, after: DateTime<Utc>) -> Result<Vec<SearchResult>, Error> {
        self.datasource.query_newborn(after)
    }

    fn dump(&self, filepath: &Path) -> Result<u64, Error> {
        let outfile = fs::File::create(filepath)?;
        let mut writer = BufWriter::new(outfile);
        let mut count: u64 = 0;
        let mut cursor: Option<String> = None;
        // one line of JSON per record, in scan order, a batch at a time
        loop {
            let mut batch = self.datasource.fetch_assets(cursor, DUMP_BATCH_SIZE)?;
            for asset in batch.assets.iter() {
                let record = DumpedAsset::from_asset(asset);
                serde_json::to_writer(&mut writer, &record)?;
                writer.write_all(b"\n")?;
                count += 1;
            }
            cursor = batch.cursor.take();
            if cursor.is_none() {
                break;
            }
        }
        writer.flush()?;
        Ok(count)
    }

    fn load(&self, filepath: &Path) -> Result<u64, Error> {
        let infile = fs::File::open(filepath)?;
        let mut reader = BufReader::new(infile);
        // Older exports were one giant JSON array rather than a record per
        // line; sniff the first byte to tell the difference.
        let is_array = reader.fill_buf()?.first() == Some(&b'[');
        let mut count: u64 = 0;
        if is_array {
            let records: Vec<DumpedAsset> = serde_json::from_reader(reader)?;
            count = records.len() as u64;
            let assets: Vec<Asset> = records.into_iter().map(|r| r.into_asset()).collect();
            for chunk in assets.chunks(DUMP_BATCH_SIZE) {
                self.datasource.store_assets(chunk.to_vec())?;
            }
        } else {
            let mut batch: Vec<Asset> = Vec::with_capacity(DUMP_BATCH_SIZE);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: DumpedAsset = serde_json::from_str(&line)?;
                batch.push(record.into_asset());
                count += 1;
                if batch.len() >= DUMP_BATCH_SIZE {
                    self.datasource.store_assets(std::mem::take(&mut batch))?;
                }
            }
            if !batch.is_empty() {
                self.datasource.store_assets(batch)?;
            }
        }
        Ok(count)
    }
}

/// Default ceiling on the bytes of renditions kept in the cache.
pub const DEFAULT_CACHE_BUDGET: u64 = 10 * 1024 * 1024;

// Accounting for one cached rendition spilled to disk.
struct CacheEntry {
    filepath: PathBuf,
    size: u64,
}

///
/// A cache of generated renditions, bounded by the total byte length of the
/// entries. The bytes live in sidecar files under the cache directory while
/// the in-memory list tracks recency; the least recently used renditions are
/// removed once the budget is exceeded.
///
pub struct RenditionCache {
    cachedir: PathBuf,
    budget: u64,
    entries: Mutex<(LruCache<String, CacheEntry>, u64)>,
}

impl RenditionCache {
    pub fn new(cachedir: PathBuf, budget: u64) -> Self {
        Self {
            cachedir,
            budget,
            entries: Mutex::new((LruCache::unbounded(), 0)),
        }
    }

    // Cache key for a rendition of the asset bounded by width and height.
    fn entry_key(asset_id: &str, width: u32, height: u32) -> String {
        format!("{}-{}x{}", asset_id, width, height)
    }

    // Name of the sidecar file for the given cache key. The asset
    // identifier is not filesystem-safe, so the key is hashed.
    fn sidecar_path(&self, key: &str) -> PathBuf {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        self.cachedir.join(format!("{:x}.jpg", digest))
    }

    /// Retrieve the cached rendition, if present.
    pub fn get(&self, asset_id: &str, width: u32, height: u32) -> Option<Vec<u8>> {
        let key = RenditionCache::entry_key(asset_id, width, height);
        let mut guard = self.entries.lock().unwrap();
        let (cache, used) = &mut *guard;
        if let Some(entry) = cache.get(&key) {
            match fs::read(&entry.filepath) {
                Ok(bytes) => {
                    debug!("rendition cache hit for {}", key);
                    return Some(bytes);
                }
                Err(_) => {
                    // sidecar went missing, treat as absent
                    if let Some(entry) = cache.pop(&key) {
                        *used = used.saturating_sub(entry.size);
                    }
                }
            }
        }
        debug!("rendition cache miss for {}", key);
        None
    }

    /// Add the rendition to the cache, evicting old entries as needed.
    pub fn put(&self, asset_id: &str, width: u32, height: u32, bytes: &[u8]) -> Result<(), Error> {
        let key = RenditionCache::entry_key(asset_id, width, height);
        let filepath = self.sidecar_path(&key);
        fs::create_dir_all(&self.cachedir)?;
        fs::write(&filepath, bytes)?;
        let mut guard = self.entries.lock().unwrap();
        let (cache, used) = &mut *guard;
        if let Some(old) = cache.push(
            key,
            CacheEntry {
                filepath,
                size: bytes.len() as u64,
            },
        ) {
            *used = used.saturating_sub(old.1.size);
            let _ = fs::remove_file(&old.1.filepath);
        }
        *used += bytes.len() as u64;
        while *used > self.budget {
            let Some((evicted_key, entry)) = cache.pop_lru() else {
                break;
            };
            debug!("rendition cache evicting {}", evicted_key);
            *used = used.saturating_sub(entry.size);
            let _ = fs::remove_file(&entry.filepath);
        }
        Ok(())
    }

    /// Remove every cached rendition belonging to the given asset.
    pub fn remove_asset(&self, asset_id: &str) {
        let prefix = format!("{}-", asset_id);
        let mut guard = self.entries.lock().unwrap();
        let (cache, used) = &mut *guard;
        let doomed: Vec<String> = cache
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.to_owned())
            .collect();
        for key in doomed {
            if let Some(entry) = cache.pop(&key) {
                *used = used.saturating_sub(entry.size);
                let _ = fs::remove_file(&entry.filepath);
            }
        }
    }
}

pub struct BlobRepositoryImpl {
    basepath: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    cache: Arc<RenditionCache>,
}

impl BlobRepositoryImpl {
    pub fn new(basepath: &Path, transcoder: Arc<dyn Transcoder>, cache: Arc<RenditionCache>) -> Self {
        Self {
            basepath: basepath.to_path_buf(),
            transcoder,
            cache,
        }
    }

    // Decode the identifier into the blob path, refusing anything that
    // would escape the blob store directory.
    fn asset_path(&self, asset_id: &str) -> Result<PathBuf, Error> {
        let decoded = general_purpose::STANDARD
            .decode(asset_id)
            .map_err(|_| EngineError::Invalid(format!("undecodable identifier {}", asset_id)))?;
        let as_string = std::str::from_utf8(&decoded)
            .map_err(|_| EngineError::Invalid(format!("malformed identifier {}", asset_id)))?;
        let rel_path = Path::new(as_string);
        let escapes = rel_path.is_absolute()
            || rel_path
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if escapes {
            return Err(EngineError::Invalid(format!("unsafe identifier {}", asset_id)).into());
        }
        Ok(self.basepath.join(rel_path))
    }

    // Remove empty directories above the given file, stopping at the first
    // one that is not empty or is not inside the blob store.
    fn prune_empty_parents(&self, filepath: &Path) {
        let mut parent = filepath.parent();
        while let Some(dir) = parent {
            if dir == self.basepath || !dir.starts_with(&self.basepath) {
                break;
            }
            // removal fails if anything remains inside
            if fs::remove_dir(dir).is_err() {
                break;
            }
            parent = dir.parent();
        }
    }
}

impl BlobRepository for BlobRepositoryImpl {
    fn store_blob(&self, filepath: &Path, asset: &Asset) -> Result<(), Error> {
        let dest_path = self.asset_path(&asset.key)?;
        // do not overwrite existing asset blobs
        if !dest_path.exists() {
            let parent = dest_path
                .parent()
                .ok_or_else(|| EngineError::Invalid(format!("no parent for {:?}", dest_path)))?;
            fs::create_dir_all(parent)?;
            // a rename is atomic but fails when crossing file systems, in
            // which case fall back to a copy; a partial copy is removed so a
            // failed import leaves nothing behind
            if fs::rename(filepath, &dest_path).is_err() {
                if let Err(err) = fs::copy(filepath, &dest_path) {
                    let _ = fs::remove_file(&dest_path);
                    return Err(err.into());
                }
            }
        }
        if filepath.exists() {
            fs::remove_file(filepath)?;
        }
        Ok(())
    }

    fn replace_blob(&self, filepath: &Path, asset: &Asset) -> Result<(), Error> {
        let dest_path = self.asset_path(&asset.key)?;
        let parent = dest_path
            .parent()
            .ok_or_else(|| EngineError::Invalid(format!("no parent for {:?}", dest_path)))?;
        fs::create_dir_all(parent)?;
        // copy beside the target and swap with a rename, which is atomic on
        // the filesystems that matter
        let mut temp_path = dest_path.clone();
        temp_path.set_extension("swap");
        if let Err(err) = fs::copy(filepath, &temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        fs::rename(&temp_path, &dest_path)?;
        fs::remove_file(filepath)?;
        Ok(())
    }

    fn blob_path(&self, asset_id: &str) -> Result<PathBuf, Error> {
        self.asset_path(asset_id)
    }

    fn rename_blob(&self, old_id: &str, new_id: &str) -> Result<(), Error> {
        let old_path = self.asset_path(old_id)?;
        let new_path = self.asset_path(new_id)?;
        let parent = new_path
            .parent()
            .ok_or_else(|| EngineError::Invalid(format!("no parent for {:?}", new_path)))?;
        fs::create_dir_all(parent)?;
        fs::rename(&old_path, &new_path)?;
        self.prune_empty_parents(&old_path);
        Ok(())
    }

    fn delete_blob(&self, asset_id: &str) -> Result<(), Error> {
        let filepath = self.asset_path(asset_id)?;
        fs::remove_file(&filepath)?;
        self.prune_empty_parents(&filepath);
        Ok(())
    }

    fn thumbnail(&self, width: u32, height: u32, asset_id: &str) -> Result<Vec<u8>, Error> {
        if let Some(bytes) = self.cache.get(asset_id, width, height) {
            return Ok(bytes);
        }
        let filepath = self.asset_path(asset_id)?;
        if !filepath.exists() {
            return Err(EngineError::NotFound(asset_id.to_owned()).into());
        }
        // the identifier carries the extension, which is enough to pick the
        // rendering strategy without fetching the record
        let guess = mime_guess::from_path(&filepath).first_or_octet_stream();
        let bytes = if guess.type_() == mime::IMAGE {
            self.transcoder.resize_image(&filepath, width, height)?
        } else if guess.type_() == mime::VIDEO {
            self.transcoder.video_frame(&filepath, width, height)?
        } else {
            return Err(EngineError::Unsupported(guess.to_string()).into());
        };
        self.cache.put(asset_id, width, height, &bytes)?;
        Ok(bytes)
    }

    fn clear_cache(&self, asset_id: &str) -> Result<(), Error> {
        self.cache.remove_asset(asset_id);
        Ok(())
    }
}

///
/// In-memory cache of search results keyed by the query that produced them.
///
pub struct SearchRepositoryImpl {
    cached: Mutex<HashMap<String, Vec<SearchResult>>>,
}

impl SearchRepositoryImpl {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SearchRepositoryImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchRepository for SearchRepositoryImpl {
    fn put(&self, key: String, val: Vec<SearchResult>) -> Result<(), Error> {
        let mut cached = self.cached.lock().unwrap();
        cached.insert(key, val);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<SearchResult>>, Error> {
        let cached = self.cached.lock().unwrap();
        Ok(cached.get(key).cloned())
    }

    fn clear(&self) -> Result<(), Error> {
        let mut cached = self.cached.lock().unwrap();
        cached.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sources::MockEntityDataSource;
    use crate::domain::repositories::MockTranscoder;
    use anyhow::anyhow;
    use mockall::predicate::*;
    use tempfile::tempdir;

    fn make_date_time(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .unwrap()
    }

    fn basic_asset(key: &str) -> Asset {
        Asset {
            key: key.to_owned(),
            checksum: "sha256-cafebabe".to_owned(),
            filename: "img_1234.jpg".to_owned(),
            byte_length: 1024,
            media_type: "image/jpeg".to_owned(),
            tags: vec!["cat".to_owned()],
            import_date: make_date_time(2018, 5, 31, 21, 10, 11),
            caption: None,
            location: Some(Location::new("hawaii")),
            user_date: None,
            original_date: None,
            dimensions: None,
        }
    }

    fn noop_blobs(basepath: &Path) -> BlobRepositoryImpl {
        let cachedir = basepath.join(".cache");
        BlobRepositoryImpl::new(
            basepath,
            Arc::new(MockTranscoder::new()),
            Arc::new(RenditionCache::new(cachedir, DEFAULT_CACHE_BUDGET)),
        )
    }

    #[test]
    fn test_get_asset_ok() {
        // arrange
        let asset1 = basic_asset("abc123");
        let mut mock = MockEntityDataSource::new();
        mock.expect_get_asset()
            .with(eq("abc123"))
            .returning(move |_| Ok(asset1.clone()));
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let result = repo.get_asset("abc123");
        // assert
        assert!(result.is_ok());
        let asset = result.unwrap();
        assert_eq!(asset.key, "abc123".to_owned());
    }

    #[test]
    fn test_get_asset_err() {
        // arrange
        let mut mock = MockEntityDataSource::new();
        mock.expect_get_asset()
            .with(eq("abc123"))
            .returning(move |_| Err(anyhow!("oh no")));
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let result = repo.get_asset("abc123");
        // assert
        assert!(result.is_err());
    }

    #[test]
    fn test_query_untagged_scans_records() {
        // arrange
        let mut tagged = basic_asset("abc123");
        tagged.tags = vec!["cat".to_owned()];
        let mut untagged = basic_asset("xyz789");
        untagged.tags = vec![];
        let mut mock = MockEntityDataSource::new();
        mock.expect_fetch_assets()
            .withf(|c, _| c.is_none())
            .returning(move |_, _| {
                Ok(FetchedAssets {
                    assets: vec![tagged.clone(), untagged.clone()],
                    cursor: None,
                })
            });
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let result = repo.query_untagged();
        // assert
        assert!(result.is_ok());
        let results = result.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "xyz789");
    }

    #[test]
    fn test_query_unlocated_scans_records() {
        // arrange
        let located = basic_asset("abc123");
        let mut homeless = basic_asset("xyz789");
        homeless.location = None;
        let mut mock = MockEntityDataSource::new();
        mock.expect_fetch_assets()
            .withf(|c, _| c.is_none())
            .returning(move |_, _| {
                Ok(FetchedAssets {
                    assets: vec![located.clone(), homeless.clone()],
                    cursor: None,
                })
            });
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let result = repo.query_unlocated();
        // assert
        assert!(result.is_ok());
        let results = result.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "xyz789");
    }

    #[test]
    fn test_dump_load_round_trip() {
        // arrange
        let assets = vec![basic_asset("abc123"), basic_asset("xyz789")];
        let mut mock = MockEntityDataSource::new();
        let fetched = assets.clone();
        mock.expect_fetch_assets()
            .withf(|c, _| c.is_none())
            .returning(move |_, _| {
                Ok(FetchedAssets {
                    assets: fetched.clone(),
                    cursor: None,
                })
            });
        let stored: Arc<Mutex<Vec<Asset>>> = Arc::new(Mutex::new(Vec::new()));
        let stored_inner = stored.clone();
        mock.expect_store_assets().returning(move |incoming| {
            stored_inner.lock().unwrap().extend(incoming);
            Ok(())
        });
        let tmpdir = tempdir().unwrap();
        let dumpfile = tmpdir.path().join("dump.json");
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let count = repo.dump(&dumpfile).unwrap();
        assert_eq!(count, 2);
        // two lines of JSON
        let contents = fs::read_to_string(&dumpfile).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let count = repo.load(&dumpfile).unwrap();
        // assert
        assert_eq!(count, 2);
        let stored = stored.lock().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].key, "abc123");
        assert_eq!(stored[0].checksum, "sha256-cafebabe");
        assert_eq!(stored[1].key, "xyz789");
    }

    #[test]
    fn test_load_json_array_form() {
        // arrange
        let tmpdir = tempdir().unwrap();
        let dumpfile = tmpdir.path().join("dump.json");
        let contents = r#"[{
            "key": "abc123",
            "checksum": "sha256-cafebabe",
            "filename": "img_1234.jpg",
            "byte_length": 1024,
            "media_type": "image/jpeg",
            "tags": ["cat"],
            "import_date": 1527801011000,
            "user_date": null,
            "original_date": null,
            "caption": null,
            "location": "hawaii",
            "dimensions": null
        }]"#;
        fs::write(&dumpfile, contents).unwrap();
        let mut mock = MockEntityDataSource::new();
        mock.expect_store_assets()
            .withf(|incoming| incoming.len() == 1 && incoming[0].key == "abc123")
            .returning(|_| Ok(()));
        // act
        let repo = RecordRepositoryImpl::new(Arc::new(mock));
        let count = repo.load(&dumpfile).unwrap();
        // assert
        assert_eq!(count, 1);
    }

    #[test]
    fn test_store_blob_ok() {
        // arrange
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let id = general_purpose::STANDARD.encode(id_path);
        let mut asset1 = basic_asset("ignored");
        asset1.key = id;
        let tmpdir = tempdir().unwrap();
        let basepath = tmpdir.path().join("blobs");
        // create a file that stands in for an upload
        let staged = tmpdir.path().join("fighting_kittens.jpg");
        fs::write(&staged, b"jpeg image goes here").unwrap();
        // act
        let repo = noop_blobs(basepath.as_path());
        let result = repo.store_blob(staged.as_path(), &asset1);
        // assert
        assert!(result.is_ok());
        let dest_path = basepath.join(id_path);
        assert!(dest_path.exists());
        assert!(!staged.exists());

        // storing again (existing blob) leaves the blob in place and still
        // removes the staged file
        fs::write(&staged, b"different bytes").unwrap();
        let result = repo.store_blob(staged.as_path(), &asset1);
        assert!(result.is_ok());
        assert_eq!(fs::read(&dest_path).unwrap(), b"jpeg image goes here");
        assert!(!staged.exists());
    }

    #[test]
    fn test_blob_path_ok() {
        // arrange
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let id = general_purpose::STANDARD.encode(id_path);
        let tmpdir = tempdir().unwrap();
        // act
        let repo = noop_blobs(tmpdir.path());
        let result = repo.blob_path(&id);
        // assert
        assert!(result.is_ok());
        let blob_path = tmpdir.path().join(id_path);
        assert_eq!(result.unwrap(), blob_path.as_path());
    }

    #[test]
    fn test_blob_path_rejects_traversal() {
        let tmpdir = tempdir().unwrap();
        let repo = noop_blobs(tmpdir.path());
        // parent-directory components must be refused
        let id = general_purpose::STANDARD.encode("2018/../../etc/passwd");
        let result = repo.blob_path(&id);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Invalid(_))
        ));
        // absolute paths as well
        let id = general_purpose::STANDARD.encode("/etc/passwd");
        assert!(repo.blob_path(&id).is_err());
        // as is anything that is not base64 at all
        assert!(repo.blob_path("not base64!").is_err());
    }

    #[test]
    fn test_rename_and_delete_blob_prunes_directories() {
        // arrange
        let old_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let new_path = "2017/06/09/1030/01ce0d526z6cyzgm02ap0jv281.jpg";
        let old_id = general_purpose::STANDARD.encode(old_path);
        let new_id = general_purpose::STANDARD.encode(new_path);
        let tmpdir = tempdir().unwrap();
        let basepath = tmpdir.path().join("blobs");
        let old_full = basepath.join(old_path);
        fs::create_dir_all(old_full.parent().unwrap()).unwrap();
        fs::write(&old_full, b"jpeg image goes here").unwrap();
        let repo = noop_blobs(basepath.as_path());
        // act: rename moves the file and prunes the empty old directories
        repo.rename_blob(&old_id, &new_id).unwrap();
        // assert
        assert!(!old_full.exists());
        assert!(!basepath.join("2018").exists());
        let new_full = basepath.join(new_path);
        assert!(new_full.exists());
        // act: delete removes the file and the directories above it
        repo.delete_blob(&new_id).unwrap();
        assert!(!new_full.exists());
        assert!(!basepath.join("2017").exists());
        // the store root itself survives
        assert!(basepath.exists());
    }

    #[test]
    fn test_replace_blob_swaps_content() {
        // arrange
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let id = general_purpose::STANDARD.encode(id_path);
        let mut asset1 = basic_asset("ignored");
        asset1.key = id;
        let tmpdir = tempdir().unwrap();
        let basepath = tmpdir.path().join("blobs");
        let dest_path = basepath.join(id_path);
        fs::create_dir_all(dest_path.parent().unwrap()).unwrap();
        fs::write(&dest_path, b"old bytes").unwrap();
        let staged = tmpdir.path().join("replacement.jpg");
        fs::write(&staged, b"new bytes").unwrap();
        let repo = noop_blobs(basepath.as_path());
        // act
        repo.replace_blob(staged.as_path(), &asset1).unwrap();
        // assert
        assert_eq!(fs::read(&dest_path).unwrap(), b"new bytes");
        assert!(!staged.exists());
    }

    #[test]
    fn test_thumbnail_caches_renditions() {
        // arrange
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let id = general_purpose::STANDARD.encode(id_path);
        let tmpdir = tempdir().unwrap();
        let basepath = tmpdir.path().join("blobs");
        let blob = basepath.join(id_path);
        fs::create_dir_all(blob.parent().unwrap()).unwrap();
        fs::write(&blob, b"jpeg image goes here").unwrap();
        let mut transcoder = MockTranscoder::new();
        let mut calls = 0;
        transcoder
            .expect_resize_image()
            .times(2)
            .returning(move |_, _, _| {
                calls += 1;
                Ok(vec![calls; 4])
            });
        let cache = Arc::new(RenditionCache::new(
            tmpdir.path().join("cache"),
            DEFAULT_CACHE_BUDGET,
        ));
        let repo = BlobRepositoryImpl::new(basepath.as_path(), Arc::new(transcoder), cache);
        // act: two calls, one transcoder invocation
        let first = repo.thumbnail(240, 240, &id).unwrap();
        let second = repo.thumbnail(240, 240, &id).unwrap();
        // assert
        assert_eq!(first, vec![1; 4]);
        assert_eq!(second, vec![1; 4]);
        // clearing the cache forces regeneration
        repo.clear_cache(&id).unwrap();
        let third = repo.thumbnail(240, 240, &id).unwrap();
        assert_eq!(third, vec![2; 4]);
    }

    #[test]
    fn test_thumbnail_unsupported_media() {
        // arrange
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.txt";
        let id = general_purpose::STANDARD.encode(id_path);
        let tmpdir = tempdir().unwrap();
        let basepath = tmpdir.path().join("blobs");
        let blob = basepath.join(id_path);
        fs::create_dir_all(blob.parent().unwrap()).unwrap();
        fs::write(&blob, b"lorem ipsum").unwrap();
        let repo = noop_blobs(basepath.as_path());
        // act
        let result = repo.thumbnail(240, 240, &id);
        // assert
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Unsupported(_))
        ));
    }

    #[test]
    fn test_thumbnail_missing_blob() {
        let id_path = "2018/05/31/2100/01bx5zzkbkactav9wevgemmvrz.jpg";
        let id = general_purpose::STANDARD.encode(id_path);
        let tmpdir = tempdir().unwrap();
        let repo = noop_blobs(tmpdir.path());
        let result = repo.thumbnail(240, 240, &id);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_rendition_cache_byte_budget() {
        // arrange: room for two 4-byte entries only
        let tmpdir = tempdir().unwrap();
        let cache = RenditionCache::new(tmpdir.path().join("cache"), 8);
        cache.put("aaa", 240, 240, &[1, 2, 3, 4]).unwrap();
        cache.put("bbb", 240, 240, &[5, 6, 7, 8]).unwrap();
        assert!(cache.get("aaa", 240, 240).is_some());
        assert!(cache.get("bbb", 240, 240).is_some());
        // act: a third entry evicts the least recently used, which is "aaa"
        // only because it was refreshed before "bbb" above
        cache.put("ccc", 240, 240, &[9, 10, 11, 12]).unwrap();
        // assert
        assert!(cache.get("aaa", 240, 240).is_none());
        assert!(cache.get("bbb", 240, 240).is_some());
        assert!(cache.get("ccc", 240, 240).is_some());
    }

    #[test]
    fn test_rendition_cache_remove_asset() {
        let tmpdir = tempdir().unwrap();
        let cache = RenditionCache::new(tmpdir.path().join("cache"), DEFAULT_CACHE_BUDGET);
        cache.put("aaa", 240, 240, &[1, 2, 3, 4]).unwrap();
        cache.put("aaa", 640, 640, &[5, 6, 7, 8]).unwrap();
        cache.put("bbb", 240, 240, &[9, 10, 11, 12]).unwrap();
        cache.remove_asset("aaa");
        assert!(cache.get("aaa", 240, 240).is_none());
        assert!(cache.get("aaa", 640, 640).is_none());
        assert!(cache.get("bbb", 240, 240).is_some());
    }

    #[test]
    fn test_search_repository_impl() {
        let repo = SearchRepositoryImpl::new();
        assert!(repo.get("tag:cat").unwrap().is_none());
        let results = vec![SearchResult {
            asset_id: "abc123".to_owned(),
            filename: "img_1234.jpg".to_owned(),
            media_type: "image/jpeg".to_owned(),
            location: None,
            datetime: Utc::now(),
        }];
        repo.put("tag:cat".to_owned(), results.clone()).unwrap();
        let cached = repo.get("tag:cat").unwrap().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].asset_id, "abc123");
        repo.clear().unwrap();
        assert!(repo.get("tag:cat").unwrap().is_none());
    }
}
