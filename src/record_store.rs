use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const LABELS: TableDefinition<&str, &str> = TableDefinition::new("labels");

const META_COUNT: &str = "count";
const META_DIMENSION: &str = "dimension";
const LABEL_FINGERPRINT: &str = "fingerprint";

/// A flat, exact nearest-neighbor index with one record per vector.
///
/// Both the knowledge index and the conversation memory are instances of
/// this type, each backed by its own redb file. Row `i` of the vector
/// table always corresponds to row `i` of the record table:
///
/// - `vectors`: row → f32 LE values (`dimension` floats)
/// - `records`: row → JSON-encoded record
/// - `meta`: `count` and `dimension`
/// - `labels`: `fingerprint` of whatever produced the vectors
///
/// Every mutation writes all tables in one transaction, and the in-memory
/// copy is only updated after that transaction commits.
pub struct RecordStore<R> {
    path: PathBuf,
    db: Database,
    /// Stamped on every write.
    fingerprint: Option<String>,
    /// Read back from disk.
    stored_fingerprint: Option<String>,
    dimension: Option<usize>,
    vectors: Vec<f32>,
    records: Vec<R>,
    built: bool,
    _marker: PhantomData<fn() -> R>,
}

/// A nearest-neighbor hit: row position and squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

impl<R> RecordStore<R>
where
    R: Serialize + DeserializeOwned,
{
    /// Open or create a record store at the given path and load its rows.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use examrag::record_store::RecordStore;
    ///
    /// let store: RecordStore<String> =
    ///     RecordStore::open(&tmp.path().join("store.redb")).unwrap();
    /// assert!(store.is_empty());
    /// assert!(!store.is_built());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(RECORDS)?;
        txn.open_table(META)?;
        txn.open_table(LABELS)?;
        txn.commit()?;

        let mut store = Self {
            path: path.to_path_buf(),
            db,
            fingerprint: None,
            stored_fingerprint: None,
            dimension: None,
            vectors: Vec::new(),
            records: Vec::new(),
            built: false,
            _marker: PhantomData,
        };
        store.load()?;
        Ok(store)
    }

    /// Stamp `fingerprint` on every subsequent write.
    ///
    /// A built store whose stored fingerprint differs is reported by
    /// [`is_stale`](Self::is_stale); its vectors came from a different
    /// embedder or different ingestion settings.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Discard the in-memory rows and reload them from disk.
    pub fn load(&mut self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let labels = txn.open_table(LABELS)?;
        self.stored_fingerprint = labels
            .get(LABEL_FINGERPRINT)?
            .map(|v| v.value().to_string());
        let meta = txn.open_table(META)?;
        let Some(count) = meta.get(META_COUNT)?.map(|v| v.value()) else {
            self.dimension = None;
            self.vectors.clear();
            self.records.clear();
            self.built = false;
            return Ok(());
        };
        let dimension = meta
            .get(META_DIMENSION)?
            .map(|v| v.value() as usize)
            .filter(|&d| d > 0);

        let vector_table = txn.open_table(VECTORS)?;
        let record_table = txn.open_table(RECORDS)?;

        let mut vectors = Vec::new();
        let mut records = Vec::with_capacity(count as usize);
        for row in 0..count {
            let vector = vector_table
                .get(row)?
                .ok_or_else(|| self.corrupt(format!("missing vector {row}")))?;
            let values: Vec<f32> = bytemuck::pod_collect_to_vec(vector.value());
            if Some(values.len()) != dimension {
                return Err(self.corrupt(format!(
                    "vector {row} has {} values, expected {dimension:?}",
                    values.len()
                )));
            }
            vectors.extend_from_slice(&values);

            let record = record_table
                .get(row)?
                .ok_or_else(|| self.corrupt(format!("missing record {row}")))?;
            records.push(serde_json::from_slice(record.value())?);
        }

        self.dimension = dimension;
        self.vectors = vectors;
        self.records = records;
        self.built = true;
        Ok(())
    }

    /// Whether a build or append has ever been committed to this store.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Whether the persisted rows were written under another fingerprint.
    /// Stores written before fingerprints existed count as stale.
    pub fn is_stale(&self) -> bool {
        self.built
            && self.fingerprint.is_some()
            && self.stored_fingerprint != self.fingerprint
    }

    pub fn stored_fingerprint(&self) -> Option<&str> {
        self.stored_fingerprint.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding dimensionality, fixed by the first vector ever stored.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Replace every row with the given vectors and records.
    pub fn replace(
        &mut self,
        vectors: Vec<Vec<f32>>,
        records: Vec<R>,
    ) -> Result<()> {
        let dimension = check_batch(None, &vectors, records.len())?;

        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(RECORDS)?;
        {
            let mut vector_table = txn.open_table(VECTORS)?;
            let mut record_table = txn.open_table(RECORDS)?;
            for (row, (vector, record)) in
                vectors.iter().zip(&records).enumerate()
            {
                let encoded = serde_json::to_vec(record)?;
                let bytes = bytemuck::cast_slice::<f32, u8>(vector);
                vector_table.insert(row as u64, bytes)?;
                record_table.insert(row as u64, encoded.as_slice())?;
            }
            let mut meta = txn.open_table(META)?;
            meta.insert(META_COUNT, records.len() as u64)?;
            meta.insert(META_DIMENSION, dimension.unwrap_or(0) as u64)?;
            self.write_fingerprint(&txn)?;
        }
        txn.commit()?;

        self.stored_fingerprint.clone_from(&self.fingerprint);
        self.dimension = dimension;
        self.vectors = vectors.into_iter().flatten().collect();
        self.records = records;
        self.built = true;
        Ok(())
    }

    /// Append rows after the existing ones.
    pub fn append(
        &mut self,
        vectors: Vec<Vec<f32>>,
        records: Vec<R>,
    ) -> Result<()> {
        let dimension = check_batch(self.dimension, &vectors, records.len())?;
        let start = self.records.len();

        let txn = self.db.begin_write()?;
        {
            let mut vector_table = txn.open_table(VECTORS)?;
            let mut record_table = txn.open_table(RECORDS)?;
            for (offset, (vector, record)) in
                vectors.iter().zip(&records).enumerate()
            {
                let row = (start + offset) as u64;
                let encoded = serde_json::to_vec(record)?;
                let bytes = bytemuck::cast_slice::<f32, u8>(vector);
                vector_table.insert(row, bytes)?;
                record_table.insert(row, encoded.as_slice())?;
            }
            let mut meta = txn.open_table(META)?;
            meta.insert(META_COUNT, (start + records.len()) as u64)?;
            meta.insert(META_DIMENSION, dimension.unwrap_or(0) as u64)?;
            self.write_fingerprint(&txn)?;
        }
        txn.commit()?;

        self.stored_fingerprint.clone_from(&self.fingerprint);
        self.dimension = dimension;
        self.vectors.extend(vectors.into_iter().flatten());
        self.records.extend(records);
        self.built = true;
        Ok(())
    }

    /// Exact nearest-neighbor search by squared L2 distance.
    ///
    /// Returns at most `top_k` neighbors ordered by ascending distance, ties
    /// broken by row position.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if top_k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != dimension {
            return Err(Error::Embedding(format!(
                "query has {} dimensions but {} stores {dimension}",
                query.len(),
                self.path.display()
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .par_chunks(dimension)
            .enumerate()
            .map(|(index, row)| Neighbor {
                index,
                distance: squared_l2(query, row),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        neighbors.truncate(top_k);
        Ok(neighbors)
    }

    fn write_fingerprint(&self, txn: &redb::WriteTransaction) -> Result<()> {
        if let Some(fingerprint) = &self.fingerprint {
            let mut labels = txn.open_table(LABELS)?;
            labels.insert(LABEL_FINGERPRINT, fingerprint.as_str())?;
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

impl<R> std::fmt::Debug for RecordStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("rows", &self.records.len())
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// Validate a batch and return the dimension the store will have after it.
fn check_batch(
    existing: Option<usize>,
    vectors: &[Vec<f32>],
    record_count: usize,
) -> Result<Option<usize>> {
    if vectors.len() != record_count {
        return Err(Error::Embedding(format!(
            "{} vectors for {record_count} records",
            vectors.len()
        )));
    }

    let mut dimension = existing;
    for vector in vectors {
        match dimension {
            None if vector.is_empty() => {
                return Err(Error::Embedding("empty embedding vector".into()));
            }
            None => dimension = Some(vector.len()),
            Some(d) if d != vector.len() => {
                return Err(Error::Embedding(format!(
                    "embedding has {} dimensions, expected {d}",
                    vector.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(dimension)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
