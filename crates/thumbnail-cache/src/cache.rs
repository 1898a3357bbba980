//! Cache orchestration: key derivation, hit/miss decision, write-back.
//!
//! A lookup reads two independent records, the thumbnail for the requested
//! box and the metadata for the source file. Only when both are present and
//! valid is the request served from the store; any other combination
//! regenerates the thumbnail and rewrites both records.

use crate::error::{CacheError, Result};
use crate::generate::{check_box, generate_file};
use crate::record::ThumbRecord;
use crate::thumb::Thumbnail;
use crate::ThumbnailConfig;
use image_meta::Metadata;
use kv_store::{KeyValue, KvError, SqliteKeyValue};
use rayon::prelude::*;
use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Receives every non-fatal error the cache absorbs.
pub type ErrorHandler = Box<dyn Fn(CacheError) + Send + Sync>;

/// Key of the thumbnail record for `abs` fitted into `max_width`x`max_height`.
pub fn thumb_key(abs: &Path, max_width: u32, max_height: u32) -> String {
    format!("thumb|{}|{}|{}", abs.to_string_lossy(), max_width, max_height)
}

/// Key of the metadata record for `abs`.
pub fn meta_key(abs: &Path) -> String {
    format!("meta|{}", abs.to_string_lossy())
}

/// A caching thumbnail generator.
pub struct Cache {
    store: Box<dyn KeyValue>,
    config: ThumbnailConfig,
    on_error: ErrorHandler,
}

impl Cache {
    /// Create a cache on top of `store` with the default configuration.
    pub fn new(store: impl KeyValue + 'static) -> Self {
        Self::with_config(store, ThumbnailConfig::default())
    }

    pub fn with_config(store: impl KeyValue + 'static, config: ThumbnailConfig) -> Self {
        Self {
            store: Box::new(store),
            config,
            on_error: Box::new(|e| warn!("thumbnail cache: {}", e)),
        }
    }

    /// Open a persistent cache backed by the SQLite database at `db_path`.
    pub fn open(db_path: &Path) -> std::result::Result<Self, KvError> {
        Ok(Self::new(SqliteKeyValue::open(db_path)?))
    }

    /// Open the persistent cache in the user's cache directory.
    pub fn open_default() -> std::result::Result<Self, KvError> {
        Self::open(&Self::default_db_path())
    }

    /// `<user cache dir>/thumbs/thumbs.db`
    pub fn default_db_path() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thumbs")
            .join("thumbs.db")
    }

    /// Replace the handler for non-fatal errors. The default logs them.
    pub fn with_error_handler(mut self, handler: impl Fn(CacheError) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(handler);
        self
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn KeyValue {
        self.store.as_ref()
    }

    /// Close the underlying store.
    pub fn close(self) -> std::result::Result<(), KvError> {
        self.store.close()
    }

    /// Thumbnail of the image at `path` fitting within `max_width`x`max_height`.
    ///
    /// Served from the store when both records are valid, generated and
    /// stored otherwise. Only generation failures are returned.
    pub fn lookup(&self, path: impl AsRef<Path>, max_width: u32, max_height: u32) -> Result<Thumbnail> {
        self.lookup_from(path.as_ref(), max_width, max_height, env::current_dir)
    }

    /// [`Cache::lookup`] resolving relative paths against `current_dir`.
    fn lookup_from(
        &self,
        path: &Path,
        max_width: u32,
        max_height: u32,
        current_dir: impl FnOnce() -> io::Result<PathBuf>,
    ) -> Result<Thumbnail> {
        check_box(max_width, max_height)?;

        let abs = match absolute_path_in(path, current_dir) {
            Ok(abs) => abs,
            Err(source) => {
                (self.on_error)(CacheError::Canonicalize {
                    path: path.to_path_buf(),
                    source,
                });
                return generate_file(path, max_width, max_height, &self.config);
            }
        };

        let meta_key = meta_key(&abs);
        let thumb_key = thumb_key(&abs, max_width, max_height);

        let metadata = self.read_metadata(&meta_key);
        let record = self.read_thumb(&thumb_key, max_width, max_height);

        match (metadata, record) {
            (Some(metadata), Some((jpeg, width, height))) => {
                debug!("thumbnail cache hit: {}", thumb_key);
                return Ok(Thumbnail::from_jpeg(jpeg, width, height, metadata));
            }
            (metadata, record) => debug!(
                "thumbnail cache miss: {} (metadata {}, thumbnail {})",
                thumb_key,
                if metadata.is_some() { "present" } else { "missing" },
                if record.is_some() { "present" } else { "missing" },
            ),
        }

        let thumb = generate_file(&abs, max_width, max_height, &self.config)?;
        self.write_thumb(&thumb_key, &thumb);
        self.write_metadata(&meta_key, thumb.metadata());
        Ok(thumb)
    }

    /// Look up many paths in parallel.
    ///
    /// `progress(completed, total)` is called after each lookup finishes.
    /// Results are in the same order as `paths`.
    pub fn lookup_batch<F>(
        &self,
        paths: &[PathBuf],
        max_width: u32,
        max_height: u32,
        progress: F,
    ) -> Vec<(PathBuf, Result<Thumbnail>)>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = paths.len();
        let completed = AtomicUsize::new(0);

        paths
            .par_iter()
            .map(|path| {
                let result = self.lookup(path, max_width, max_height);
                let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress(current, total);
                (path.clone(), result)
            })
            .collect()
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(source) => {
                (self.on_error)(CacheError::Store {
                    key: key.to_string(),
                    source,
                });
                None
            }
        }
    }

    fn put(&self, key: &str, value: &[u8]) {
        if let Err(source) = self.store.put(key, value) {
            (self.on_error)(CacheError::Store {
                key: key.to_string(),
                source,
            });
        }
    }

    fn read_metadata(&self, key: &str) -> Option<Metadata> {
        let raw = self.get(key)?;
        match serde_json::from_slice(&raw) {
            Ok(metadata) => Some(metadata),
            Err(source) => {
                (self.on_error)(CacheError::CorruptMetadata {
                    key: key.to_string(),
                    source,
                });
                None
            }
        }
    }

    /// Stored JPEG bytes and dimensions, if the record is present and sane.
    fn read_thumb(&self, key: &str, max_width: u32, max_height: u32) -> Option<(Vec<u8>, u32, u32)> {
        let mut raw = self.get(key)?;
        let (width, height, header_len) = match ThumbRecord::decode(&raw, max_width, max_height) {
            Ok(record) => (record.width, record.height, raw.len() - record.jpeg.len()),
            Err(source) => {
                (self.on_error)(CacheError::CorruptRecord {
                    key: key.to_string(),
                    source,
                });
                return None;
            }
        };
        raw.drain(..header_len);
        Some((raw, width, height))
    }

    fn write_thumb(&self, key: &str, thumb: &Thumbnail) {
        let jpeg = match thumb.jpeg() {
            Ok(jpeg) => jpeg,
            Err(source) => {
                (self.on_error)(CacheError::Thumbnail {
                    key: key.to_string(),
                    source,
                });
                return;
            }
        };
        let record = ThumbRecord {
            width: thumb.width(),
            height: thumb.height(),
            jpeg: &jpeg,
        };
        self.put(key, &record.encode());
    }

    fn write_metadata(&self, key: &str, metadata: &Metadata) {
        match serde_json::to_vec(metadata) {
            Ok(raw) => self.put(key, &raw),
            Err(source) => (self.on_error)(CacheError::EncodeMetadata {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Absolute, lexically cleaned form of `path`. Symlinks are not resolved and
/// the path need not exist.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    absolute_path_in(path, env::current_dir)
}

fn absolute_path_in(
    path: &Path,
    current_dir: impl FnOnce() -> io::Result<PathBuf>,
) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        current_dir()?.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // ".." at the root stays at the root
                if !matches!(cleaned.components().next_back(), Some(Component::RootDir) | None) {
                    cleaned.pop();
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThumbError;
    use crate::record::ThumbRecord;
    use crate::testutil::{jpeg_with_orientation, png_bytes};
    use image_meta::Orientation;
    use kv_store::MemoryKeyValue;
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    struct Fixture {
        dir: tempfile::TempDir,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                errors: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn image(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, bytes).unwrap();
            path
        }

        fn cache(&self, store: impl KeyValue + 'static) -> Cache {
            let errors = Arc::clone(&self.errors);
            Cache::new(store).with_error_handler(move |e| errors.lock().push(e.to_string()))
        }

        fn errors(&self) -> Vec<String> {
            self.errors.lock().clone()
        }
    }

    #[test]
    fn test_absolute_path_cleans() {
        let cleaned = absolute_path(Path::new("/a/./b/../c//d")).unwrap();
        assert_eq!(cleaned, PathBuf::from("/a/c/d"));
        assert_eq!(absolute_path(Path::new("/../x")).unwrap(), PathBuf::from("/x"));

        let relative = absolute_path(Path::new("img/../photo.jpg")).unwrap();
        assert!(relative.is_absolute());
        assert_eq!(relative, env::current_dir().unwrap().join("photo.jpg"));
    }

    #[test]
    fn test_key_format() {
        let abs = Path::new("/photos/cat.jpg");
        assert_eq!(thumb_key(abs, 200, 150), "thumb|/photos/cat.jpg|200|150");
        assert_eq!(meta_key(abs), "meta|/photos/cat.jpg");
    }

    #[test]
    fn test_miss_then_hit() {
        let fx = Fixture::new();
        let path = fx.image("a.png", &png_bytes(4000, 3000));
        let cache = fx.cache(MemoryKeyValue::new());

        let first = cache.lookup(&path, 200, 200).unwrap();
        assert_eq!(first.dimensions(), (200, 150));

        // a full hit never touches the source file
        fs::remove_file(&path).unwrap();
        let second = cache.lookup(&path, 200, 200).unwrap();
        assert_eq!(second.dimensions(), first.dimensions());
        assert_eq!(second.jpeg().unwrap(), first.jpeg().unwrap());
        assert_eq!(second.metadata(), first.metadata());
        assert!(fx.errors().is_empty());
    }

    #[test]
    fn test_records_written_on_miss() {
        let fx = Fixture::new();
        let path = fx.image("b.png", &png_bytes(300, 100));
        let cache = fx.cache(MemoryKeyValue::new());

        let thumb = cache.lookup(&path, 60, 60).unwrap();
        let abs = absolute_path(&path).unwrap();

        let raw = cache.store().get(&thumb_key(&abs, 60, 60)).unwrap().unwrap();
        let record = ThumbRecord::decode(&raw, 60, 60).unwrap();
        assert_eq!((record.width, record.height), (60, 20));
        assert_eq!(record.jpeg, &*thumb.jpeg().unwrap());

        let meta = cache.store().get(&meta_key(&abs)).unwrap().unwrap();
        let meta: Metadata = serde_json::from_slice(&meta).unwrap();
        assert_eq!(&meta, thumb.metadata());
    }

    #[test]
    fn test_box_sizes_cached_independently() {
        let fx = Fixture::new();
        let path = fx.image("c.png", &png_bytes(400, 400));
        let cache = fx.cache(MemoryKeyValue::new());

        assert_eq!(cache.lookup(&path, 100, 100).unwrap().dimensions(), (100, 100));
        assert_eq!(cache.lookup(&path, 50, 80).unwrap().dimensions(), (50, 50));
        assert_eq!(cache.lookup(&path, 100, 100).unwrap().dimensions(), (100, 100));
    }

    #[test]
    fn test_relative_and_absolute_paths_share_entries() {
        let fx = Fixture::new();
        let path = fx.image("d.png", &png_bytes(64, 64));
        let cache = fx.cache(MemoryKeyValue::new());
        cache.lookup(&path, 32, 32).unwrap();

        let dotted = fx.dir.path().join(".").join("sub").join("..").join("d.png");
        fs::remove_file(&path).unwrap();
        let hit = cache.lookup(&dotted, 32, 32).unwrap();
        assert_eq!(hit.dimensions(), (32, 32));
    }

    #[test]
    fn test_empty_record_regenerates() {
        let fx = Fixture::new();
        let path = fx.image("e.png", &png_bytes(100, 50));
        let abs = absolute_path(&path).unwrap();
        let cache = fx.cache(MemoryKeyValue::new());

        cache.lookup(&path, 40, 40).unwrap();
        cache.store().put(&thumb_key(&abs, 40, 40), &[]).unwrap();

        let thumb = cache.lookup(&path, 40, 40).unwrap();
        assert_eq!(thumb.dimensions(), (40, 20));
        let errors = fx.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("corrupt thumbnail record"));

        // the regenerated record replaced the truncated one
        let raw = cache.store().get(&thumb_key(&abs, 40, 40)).unwrap().unwrap();
        assert!(ThumbRecord::decode(&raw, 40, 40).is_ok());
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let fx = Fixture::new();
        let path = fx.image("f.png", &png_bytes(100, 100));
        let abs = absolute_path(&path).unwrap();
        let cache = fx.cache(MemoryKeyValue::new());
        cache.lookup(&path, 30, 30).unwrap();

        let bogus = ThumbRecord {
            width: 31,
            height: 30,
            jpeg: b"not a jpeg",
        };
        cache.store().put(&thumb_key(&abs, 30, 30), &bogus.encode()).unwrap();

        let thumb = cache.lookup(&path, 30, 30).unwrap();
        assert_eq!(thumb.dimensions(), (30, 30));
        assert!(thumb.image().is_ok());
        assert_eq!(fx.errors().len(), 1);
    }

    #[test]
    fn test_metadata_without_thumbnail_regenerates_both() {
        let fx = Fixture::new();
        let path = fx.image("g.jpg", &jpeg_with_orientation(80, 40, 6));
        let abs = absolute_path(&path).unwrap();

        let store = MemoryKeyValue::new();
        store.put(&meta_key(&abs), br#"{"orientation":1}"#).unwrap();
        let cache = fx.cache(store);

        let thumb = cache.lookup(&path, 20, 20).unwrap();
        // the stale stored metadata was not served
        assert_eq!(thumb.metadata().orientation, Orientation::Rotate90);

        let meta = cache.store().get(&meta_key(&abs)).unwrap().unwrap();
        let meta: Metadata = serde_json::from_slice(&meta).unwrap();
        assert_eq!(meta.orientation, Orientation::Rotate90);
        assert!(cache.store().get(&thumb_key(&abs, 20, 20)).unwrap().is_some());
        assert!(fx.errors().is_empty());
    }

    #[test]
    fn test_thumbnail_without_metadata_regenerates() {
        let fx = Fixture::new();
        let path = fx.image("h.png", &png_bytes(50, 50));
        let abs = absolute_path(&path).unwrap();

        let store = MemoryKeyValue::new();
        let stale = ThumbRecord {
            width: 1,
            height: 1,
            jpeg: b"stale",
        };
        store.put(&thumb_key(&abs, 10, 10), &stale.encode()).unwrap();
        let cache = fx.cache(store);

        let thumb = cache.lookup(&path, 10, 10).unwrap();
        assert_eq!(thumb.dimensions(), (10, 10));
        assert!(cache.store().get(&meta_key(&abs)).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_metadata_regenerates() {
        let fx = Fixture::new();
        let path = fx.image("i.png", &png_bytes(20, 20));
        let abs = absolute_path(&path).unwrap();
        let cache = fx.cache(MemoryKeyValue::new());
        cache.lookup(&path, 10, 10).unwrap();

        cache.store().put(&meta_key(&abs), b"{not json").unwrap();
        cache.lookup(&path, 10, 10).unwrap();

        let errors = fx.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("corrupt metadata record"));
    }

    #[test]
    fn test_store_failures_do_not_fail_lookup() {
        let fx = Fixture::new();
        let path = fx.image("j.png", &png_bytes(90, 30));
        let store = MemoryKeyValue::new();
        store.close().unwrap();
        let cache = fx.cache(store);

        let thumb = cache.lookup(&path, 30, 30).unwrap();
        assert_eq!(thumb.dimensions(), (30, 10));

        // two failed reads, two failed writes
        let errors = fx.errors();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.contains("closed")));
    }

    #[test]
    fn test_generation_failure_is_returned() {
        let fx = Fixture::new();
        let cache = fx.cache(MemoryKeyValue::new());

        let missing = fx.dir.path().join("missing.png");
        assert!(matches!(
            cache.lookup(&missing, 10, 10),
            Err(ThumbError::Read { .. })
        ));

        let garbage = fx.image("garbage.png", b"garbage");
        assert!(matches!(
            cache.lookup(&garbage, 10, 10),
            Err(ThumbError::Decode(_))
        ));
        assert!(cache.store().get(&meta_key(&absolute_path(&garbage).unwrap())).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_cache_survives_reopen() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let path = fx.image("k.png", &png_bytes(120, 60));
        let db = fx.dir.path().join("cache").join("thumbs.db");

        let cache = Cache::open(&db)?;
        let first = cache.lookup(&path, 60, 60)?;
        cache.close()?;

        fs::remove_file(&path)?;
        let cache = Cache::open(&db)?;
        let second = cache.lookup(&path, 60, 60)?;
        assert_eq!(second.dimensions(), (60, 30));
        assert_eq!(second.jpeg()?, first.jpeg()?);
        Ok(())
    }

    #[test]
    fn test_concurrent_identical_lookups() {
        let fx = Fixture::new();
        let path = fx.image("l.png", &png_bytes(256, 128));
        let cache = Arc::new(fx.cache(MemoryKeyValue::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                thread::spawn(move || cache.lookup(&path, 64, 64).unwrap().dimensions())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), (64, 32));
        }
        assert!(fx.errors().is_empty());
    }

    #[test]
    fn test_unresolvable_path_generates_uncached() {
        // relative to the process directory so the fallback can still read it
        let dir = tempfile::Builder::new().tempdir_in(".").unwrap();
        let path = dir.path().join("n.png");
        assert!(path.is_relative());
        fs::write(&path, png_bytes(40, 20)).unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(MemoryKeyValue::new());
        let sink = Arc::clone(&errors);
        let cache = Cache::new(Arc::clone(&store))
            .with_error_handler(move |e| sink.lock().push(e));

        let thumb = cache
            .lookup_from(&path, 20, 20, || Err(io::Error::new(io::ErrorKind::NotFound, "cwd removed")))
            .unwrap();
        assert_eq!(thumb.dimensions(), (20, 10));

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CacheError::Canonicalize { path: p, .. } if p == &path));
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_box_touches_nothing() {
        let fx = Fixture::new();
        let path = fx.image("o.png", &png_bytes(10, 10));
        let store = MemoryKeyValue::new();
        store.close().unwrap();
        let cache = fx.cache(store);

        assert!(matches!(
            cache.lookup(&path, 0, 10),
            Err(ThumbError::EmptyBox { width: 0, height: 10 })
        ));
        // the closed store was never consulted
        assert!(fx.errors().is_empty());
    }

    #[test]
    fn test_lookup_batch() {
        let fx = Fixture::new();
        let paths = vec![
            fx.image("m1.png", &png_bytes(100, 10)),
            fx.dir.path().join("missing.png"),
            fx.image("m2.png", &png_bytes(10, 100)),
        ];
        let cache = fx.cache(MemoryKeyValue::new());
        let calls = AtomicUsize::new(0);

        let results = cache.lookup_batch(&paths, 20, 20, |done, total| {
            assert!(done <= total);
            calls.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, paths[0]);
        assert_eq!(results[0].1.as_ref().unwrap().dimensions(), (20, 2));
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1.as_ref().unwrap().dimensions(), (2, 20));
    }
}
