use crate::error::IndexError;
use crate::models::{Metric, SearchHit, VectorRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::debug;

pub const INDEX_FORMAT_VERSION: u32 = 1;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ERROR_LOCK_VIOLATION
const WINDOWS_LOCK_VIOLATION: i32 = 33;

/// Exact nearest-neighbour index over [`VectorRecord`]s.
///
/// Records keep their first insertion position; re-upserting an id replaces
/// the record in place. Ranking ties resolve to the earlier position.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    metric: Metric,
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    format_version: u32,
    dimension: usize,
    metric: Metric,
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
struct IndexFile {
    format_version: u32,
    dimension: usize,
    metric: Metric,
    records: Vec<VectorRecord>,
}

impl VectorIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.positions.get(id).map(|position| &self.records[*position])
    }

    pub fn sources(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .map(|record| {
                record
                    .payload
                    .metadata
                    .get("source")
                    .cloned()
                    .unwrap_or_else(|| record.payload.source_id.clone())
            })
            .collect()
    }

    /// Inserts or replaces by id. The batch is validated as a whole first, so
    /// a rejected batch leaves the index untouched.
    pub fn upsert(&mut self, records: Vec<VectorRecord>) -> Result<(), IndexError> {
        for record in &records {
            self.check_vector(&record.vector)?;
            if record.id != record.payload.chunk_id {
                return Err(IndexError::InvalidArgument(format!(
                    "record id {} differs from its chunk id {}",
                    record.id, record.payload.chunk_id
                )));
            }
        }

        for record in records {
            match self.positions.get(&record.id) {
                Some(position) => self.records[*position] = record,
                None => {
                    self.positions.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }

        Ok(())
    }

    pub fn merge(&mut self, other: &VectorIndex) -> Result<(), IndexError> {
        if other.dimension != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: other.dimension,
            });
        }
        self.upsert(other.records.clone())
    }

    /// Removes every record whose chunk belongs to one of `sources`, matched
    /// by `source_id` or `source` metadata. Returns the number removed.
    pub fn remove_sources(&mut self, sources: &BTreeSet<String>) -> usize {
        if sources.is_empty() {
            return 0;
        }

        let before = self.records.len();
        self.records
            .retain(|record| !record.payload.matches_sources(sources));
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();
        before - self.records.len()
    }

    /// Up to `k` records ranked best first: descending similarity for
    /// cosine, ascending distance for euclidean.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.search_filtered(query_vector, k, &BTreeSet::new())
    }

    /// Like [`VectorIndex::search`], dropping records outside `sources`
    /// before truncating to `k`. An empty set applies no filter.
    pub fn search_filtered(
        &self,
        query_vector: &[f32],
        k: usize,
        sources: &BTreeSet<String>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if self.records.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if query_vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (position, self.metric.score(query_vector, &record.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        if self.metric.higher_is_better() {
            scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        } else {
            scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        }

        Ok(scored
            .into_iter()
            .filter(|(position, _)| self.records[*position].payload.matches_sources(sources))
            .take(k)
            .map(|(position, score)| SearchHit {
                record: self.records[position].clone(),
                score,
            })
            .collect())
    }

    /// Reads the index at `path`, or returns an empty index when the file
    /// does not exist.
    pub fn load(path: &Path, dimension: usize, metric: Metric) -> Result<Self, IndexError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no index file, starting empty");
                return Ok(Self::new(dimension, metric));
            }
            Err(error) => return Err(IndexError::Io(error)),
        };

        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|error| IndexError::Corrupt(format!("{}: {error}", path.display())))?;

        if file.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {} (expected {INDEX_FORMAT_VERSION})",
                file.format_version
            )));
        }
        if file.dimension != dimension {
            return Err(IndexError::Corrupt(format!(
                "index dimension {} does not match configured {dimension}",
                file.dimension
            )));
        }
        if file.metric != metric {
            return Err(IndexError::Corrupt(format!(
                "index metric {} does not match configured {metric}",
                file.metric
            )));
        }

        let mut index = Self::new(dimension, metric);
        for record in file.records {
            if record.vector.len() != dimension {
                return Err(IndexError::Corrupt(format!(
                    "record {} has dimension {}",
                    record.id,
                    record.vector.len()
                )));
            }
            if index.positions.contains_key(&record.id) {
                return Err(IndexError::Corrupt(format!("duplicate record id {}", record.id)));
            }
            index.positions.insert(record.id.clone(), index.records.len());
            index.records.push(record);
        }

        debug!(path = %path.display(), records = index.len(), "index loaded");
        Ok(index)
    }

    /// Writes to a temporary file beside `path` and renames it over `path`,
    /// so readers see either the previous file or the complete new one.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let directory = parent_dir(path);
        fs::create_dir_all(&directory)?;

        let temp = NamedTempFile::new_in(&directory)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(
                &mut writer,
                &IndexFileRef {
                    format_version: INDEX_FORMAT_VERSION,
                    dimension: self.dimension,
                    metric: self.metric,
                    records: &self.records,
                },
            )
            .map_err(std::io::Error::from)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|error| IndexError::Io(error.error))?;

        debug!(path = %path.display(), records = self.len(), "index saved");
        Ok(())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(IndexError::InvalidArgument(
                "vector contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Exclusive writer lock: an OS advisory lock on `<index>.lock` beside the
/// index. The kernel releases it when the holder exits, so a killed writer
/// never blocks later ones. The lock file itself is left in place.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    _file: File,
}

impl WriterLock {
    pub fn lock_path(index_path: &Path) -> PathBuf {
        let mut name = index_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(index_path: &Path, wait: Duration) -> Result<Self, IndexError> {
        fs::create_dir_all(parent_dir(index_path))?;
        let path = Self::lock_path(index_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let started = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "writer lock acquired");
                    return Ok(Self { path, _file: file });
                }
                Err(error) if is_contended(&error) => {
                    if started.elapsed() >= wait {
                        return Err(IndexError::LockTimeout {
                            path: path.display().to_string(),
                            waited: wait,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(error) => return Err(IndexError::Io(error)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::WouldBlock
        || (cfg!(windows) && error.raw_os_error() == Some(WINDOWS_LOCK_VIOLATION))
}

/// Where an index lives and the shape its records must have.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    pub path: PathBuf,
    pub dimension: usize,
    pub metric: Metric,
}

impl IndexSettings {
    pub fn open(&self) -> Result<VectorIndex, IndexError> {
        VectorIndex::load(&self.path, self.dimension, self.metric)
    }

    /// Read-modify-write of the persisted index under the writer lock.
    /// Nothing is written when `apply` fails.
    pub fn update<T, F>(&self, lock_wait: Duration, apply: F) -> Result<T, IndexError>
    where
        F: FnOnce(&mut VectorIndex) -> Result<T, IndexError>,
    {
        let _lock = WriterLock::acquire(&self.path, lock_wait)?;
        let mut index = self.open()?;
        let outcome = apply(&mut index)?;
        index.save(&self.path)?;
        Ok(outcome)
    }
}
