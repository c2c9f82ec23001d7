pub mod command;
pub mod loader;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::geo::{geohash, query};
use crate::storage::btree::{BTreeIndex, IndexOptions};
use crate::storage::cache::{PageCache, SharedCache, CACHE_CAPACITY};
use crate::storage::table::TableFile;

use self::loader::parse_load_line;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Pages the shared cache holds across all open files.
    pub cache_capacity: usize,
    /// Low bits a point lookup tolerates between query and stored key.
    pub range_precision: u32,
    /// Node capacities and the default duplicate-key mode of new indexes.
    pub index: IndexOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_capacity: CACHE_CAPACITY,
            range_precision: query::RANGE_PRECISION,
            index: IndexOptions::default(),
        }
    }
}

/// Record and index file of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub table: PathBuf,
    pub index: PathBuf,
}

impl TablePaths {
    /// `<dir>/<name>.tbl` and `<dir>/<name>.idx`.
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        TablePaths {
            table: dir.join(format!("{}.tbl", name)),
            index: dir.join(format!("{}.idx", name)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestRecord {
    pub value: String,
    pub lat: f64,
    pub lng: f64,
    /// Metres from the query point.
    pub distance: f64,
}

/// Loads tables and answers point, range and nearest queries against them.
/// All files opened through one engine share its page cache.
pub struct Engine {
    cache: SharedCache,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine { cache: PageCache::shared(config.cache_capacity), config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Pages read from disk so far.
    pub fn page_reads(&self) -> u64 {
        self.cache.lock().page_reads()
    }

    pub fn page_writes(&self) -> u64 {
        self.cache.lock().page_writes()
    }

    /// Append every `longitude,latitude,value` line of `load_file` to the
    /// table and index it. Lines that do not parse, or whose coordinate is out
    /// of range, are skipped.
    pub fn load(&self, paths: &TablePaths, load_file: impl AsRef<Path>, duplicates: bool) -> DbResult<LoadReport> {
        let load_file = load_file.as_ref();
        let input = BufReader::new(File::open(load_file)?);

        let mut table = TableFile::open(&paths.table, 'w', self.cache.clone())?;
        let options = IndexOptions { duplicates, ..self.config.index };
        let mut index = BTreeIndex::open(&paths.index, 'w', self.cache.clone(), options)?;

        let started = Instant::now();
        let mut report = LoadReport::default();
        for (n, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Some(record) = parse_load_line(&line) else {
                warn!("{}:{}: skipping malformed line '{}'", load_file.display(), n + 1, line);
                report.skipped += 1;
                continue;
            };
            let key = match geohash::encode(record.lat, record.lng) {
                Ok(key) => key,
                Err(e) => {
                    warn!("{}:{}: skipping line: {}", load_file.display(), n + 1, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let rid = table.append(key, &record.value)?;
            index.insert(key, rid)?;
            report.loaded += 1;
        }

        info!(
            "loaded {} records ({} skipped) into {} in {:.5} seconds, tree height {}",
            report.loaded,
            report.skipped,
            paths.table.display(),
            started.elapsed().as_secs_f64(),
            index.height()
        );
        Ok(report)
    }

    /// Value stored at `(lng, lat)`, if any.
    pub fn point(&self, paths: &TablePaths, lng: f64, lat: f64) -> DbResult<Option<String>> {
        self.timed("point", || {
            let key = geohash::encode(lat, lng)?;
            let index = self.open_index(paths)?;
            let rid = match query::point(&index, key, self.config.range_precision) {
                Ok(rid) => rid,
                Err(DbError::NotFound) => return Ok(None),
                Err(e) => return Err(e),
            };
            let table = TableFile::open(&paths.table, 'r', self.cache.clone())?;
            let (_, value) = table.read(rid)?;
            Ok(Some(value))
        })
    }

    /// Values of every record inside the rectangle from `(lng0, lat0)` to
    /// `(lng1, lat1)`, edges included.
    pub fn range(&self, paths: &TablePaths, left_down: (f64, f64), right_up: (f64, f64)) -> DbResult<Vec<String>> {
        self.timed("range", || {
            let start = geohash::encode(left_down.1, left_down.0)?;
            let end = geohash::encode(right_up.1, right_up.0)?;
            let index = self.open_index(paths)?;
            let rids = query::range(&index, start, end)?;
            if rids.is_empty() {
                return Ok(Vec::new());
            }

            let table = TableFile::open(&paths.table, 'r', self.cache.clone())?;
            rids.into_iter()
                .map(|rid| table.read(rid).map(|(_, value)| value))
                .collect()
        })
    }

    /// Up to `count` records closest to `(lng, lat)`, nearest first.
    pub fn nearest(
        &self,
        paths: &TablePaths,
        lng: f64,
        lat: f64,
        count: usize,
        min_distance: f64,
        max_distance: f64,
    ) -> DbResult<Vec<NearestRecord>> {
        self.timed("nearest", || {
            let index = self.open_index(paths)?;
            let hits = query::nearest(&index, lat, lng, count, min_distance, max_distance)?;
            if hits.is_empty() {
                return Ok(Vec::new());
            }

            let table = TableFile::open(&paths.table, 'r', self.cache.clone())?;
            hits.into_iter()
                .map(|(rid, distance)| {
                    let (key, value) = table.read(rid)?;
                    let (lat, lng) = geohash::decode(key);
                    Ok(NearestRecord { value, lat, lng, distance })
                })
                .collect()
        })
    }

    fn open_index(&self, paths: &TablePaths) -> DbResult<BTreeIndex> {
        BTreeIndex::open(&paths.index, 'r', self.cache.clone(), self.config.index)
    }

    fn timed<T>(&self, what: &str, run: impl FnOnce() -> DbResult<T>) -> DbResult<T> {
        let reads_before = self.page_reads();
        let started = Instant::now();
        let result = run();
        info!(
            "  -- {:.5} seconds to run the {} command. Read {} pages",
            started.elapsed().as_secs_f64(),
            what,
            self.page_reads() - reads_before
        );
        if let Err(e) = &result {
            debug!("{} failed: {}", what, e);
        }
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}
