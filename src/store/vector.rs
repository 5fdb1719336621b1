//! The vector index artifact: a flat file of fixed-dimension vectors.
//!
//! Vectors are stored L2-normalized, so cosine distance reduces to
//! `1 - dot`. The file is loaded lazily through a memory map on the first
//! semantic query and kept in memory afterwards; writes rewrite the file
//! atomically (temp file + rename). A `parking_lot::RwLock` keeps loads
//! and rebuilds single-writer while searches share the loaded state.

use crate::error::{StoreError, StoreResult};
use crate::types::VectorId;
use memmap2::Mmap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"CRBV";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct Vectors {
    dimension: usize,
    entries: Vec<(VectorId, Vec<f32>)>,
}

/// On-disk vector index with lazy loading.
pub struct VectorIndex {
    path: PathBuf,
    state: RwLock<Option<Vectors>>,
}

impl VectorIndex {
    /// Attach to the index file. Nothing is read until first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a search can possibly succeed.
    pub fn is_available(&self) -> bool {
        self.state.read().is_some() || self.path.exists()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> StoreResult<usize> {
        self.ensure_loaded()?;
        Ok(self.state.read().as_ref().map_or(0, |v| v.entries.len()))
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Dimension of stored vectors, `None` while empty.
    pub fn dimension(&self) -> StoreResult<Option<usize>> {
        self.ensure_loaded()?;
        let guard = self.state.read();
        Ok(guard
            .as_ref()
            .filter(|v| v.dimension > 0)
            .map(|v| v.dimension))
    }

    fn ensure_loaded(&self) -> StoreResult<()> {
        if self.state.read().is_some() {
            return Ok(());
        }
        let mut guard = self.state.write();
        if guard.is_some() {
            return Ok(());
        }
        let vectors = if self.path.exists() {
            load_file(&self.path)?
        } else {
            Vectors::default()
        };
        *guard = Some(vectors);
        Ok(())
    }

    /// Insert or replace vectors. All vectors in one index share a
    /// dimension; the first insert fixes it.
    pub fn upsert_batch(&self, batch: &[(VectorId, Vec<f32>)]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_loaded()?;
        let mut guard = self.state.write();
        let vectors = guard.get_or_insert_with(Vectors::default);

        for (id, vector) in batch {
            if vectors.dimension == 0 {
                vectors.dimension = vector.len();
            }
            if vector.len() != vectors.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: vectors.dimension,
                    got: vector.len(),
                });
            }
            let normalized = normalize(vector);
            match vectors.entries.iter_mut().find(|(vid, _)| vid == id) {
                Some(slot) => slot.1 = normalized,
                None => vectors.entries.push((*id, normalized)),
            }
        }

        persist(&self.path, vectors)
    }

    /// Drop vectors by id (orphan removal at transaction boundaries).
    pub fn remove(&self, ids: &HashSet<u32>) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_loaded()?;
        let mut guard = self.state.write();
        let Some(vectors) = guard.as_mut() else {
            return Ok(0);
        };
        let before = vectors.entries.len();
        vectors.entries.retain(|(id, _)| !ids.contains(&id.value()));
        let removed = before - vectors.entries.len();
        if removed > 0 {
            persist(&self.path, vectors)?;
        }
        Ok(removed)
    }

    /// Nearest neighbors by cosine distance. Returns parallel id and
    /// distance arrays, closest first; ties break by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<(Vec<VectorId>, Vec<f32>)> {
        self.ensure_loaded()?;
        let guard = self.state.read();
        let Some(vectors) = guard.as_ref() else {
            return Ok((Vec::new(), Vec::new()));
        };
        if vectors.entries.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        if query.len() != vectors.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: vectors.dimension,
                got: query.len(),
            });
        }

        let query = normalize(query);
        let mut scored: Vec<(VectorId, f32)> = vectors
            .entries
            .iter()
            .map(|(id, vector)| {
                let dot: f32 = query.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
                (*id, 1.0 - dot)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.value().cmp(&b.0.value()))
        });
        scored.truncate(k);

        let ids = scored.iter().map(|(id, _)| *id).collect();
        let distances = scored.iter().map(|(_, d)| *d).collect();
        Ok((ids, distances))
    }

    /// Drop everything, including the file.
    pub fn clear(&self) -> StoreResult<()> {
        let mut guard = self.state.write();
        *guard = Some(Vectors::default());
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / magnitude).collect()
}

fn load_file(path: &Path) -> StoreResult<Vectors> {
    let file = File::open(path)?;
    // SAFETY: the map is read once into owned memory before the file can
    // be rewritten; writers replace the file atomically via rename.
    let map = unsafe { Mmap::map(&file) }?;
    parse_bytes(&map).ok_or_else(|| {
        StoreError::VectorIndex(format!("corrupt vector index at '{}'", path.display()))
    })
}

fn parse_bytes(bytes: &[u8]) -> Option<Vectors> {
    if bytes.len() < 16 || bytes[0..4] != MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
    if version != FORMAT_VERSION {
        return None;
    }
    let dimension = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
    let count = u32::from_le_bytes(bytes[12..16].try_into().ok()?) as usize;

    let record_size = 4 + dimension * 4;
    if bytes.len() < 16 + count * record_size {
        return None;
    }

    let mut entries = Vec::with_capacity(count);
    let mut offset = 16;
    for _ in 0..count {
        let id = u32::from_le_bytes(bytes[offset..offset + 4].try_into().ok()?);
        offset += 4;
        let mut vector = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            vector.push(f32::from_le_bytes(bytes[offset..offset + 4].try_into().ok()?));
            offset += 4;
        }
        entries.push((VectorId::new(id)?, vector));
    }

    Some(Vectors { dimension, entries })
}

fn persist(path: &Path, vectors: &Vectors) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut bytes =
        Vec::with_capacity(16 + vectors.entries.len() * (4 + vectors.dimension * 4));
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(vectors.dimension as u32).to_le_bytes());
    bytes.extend_from_slice(&(vectors.entries.len() as u32).to_le_bytes());
    for (id, vector) in &vectors.entries {
        bytes.extend_from_slice(&id.value().to_le_bytes());
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut temp, &bytes)?;
    temp.persist(path)
        .map_err(|e| StoreError::VectorIndex(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vid(id: u32) -> VectorId {
        VectorId::new(id).unwrap()
    }

    #[test]
    fn test_round_trip_through_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.bin");

        {
            let index = VectorIndex::open(&path);
            index
                .upsert_batch(&[
                    (vid(1), vec![1.0, 0.0, 0.0]),
                    (vid(2), vec![0.0, 1.0, 0.0]),
                ])
                .unwrap();
        }

        let index = VectorIndex::open(&path);
        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(index.dimension().unwrap(), Some(3));

        let (ids, distances) = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(ids[0], vid(1));
        assert!(distances[0] < 1e-5);
        assert!(distances[1] > 0.5);
    }

    #[test]
    fn test_upsert_replaces() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::open(temp.path().join("vectors.bin"));

        index.upsert_batch(&[(vid(1), vec![1.0, 0.0])]).unwrap();
        index.upsert_batch(&[(vid(1), vec![0.0, 1.0])]).unwrap();
        assert_eq!(index.len().unwrap(), 1);

        let (ids, distances) = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(ids[0], vid(1));
        assert!(distances[0] < 1e-5);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::open(temp.path().join("vectors.bin"));
        index.upsert_batch(&[(vid(1), vec![1.0, 0.0])]).unwrap();

        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(StoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            index.upsert_batch(&[(vid(2), vec![1.0])]),
            Err(StoreError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::open(temp.path().join("vectors.bin"));
        index
            .upsert_batch(&[(vid(1), vec![1.0, 0.0]), (vid(2), vec![0.0, 1.0])])
            .unwrap();

        let removed = index.remove(&HashSet::from([1])).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().unwrap(), 1);

        let (ids, _) = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(ids, vec![vid(2)]);
    }

    #[test]
    fn test_search_ties_break_by_id() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::open(temp.path().join("vectors.bin"));
        index
            .upsert_batch(&[
                (vid(9), vec![1.0, 0.0]),
                (vid(3), vec![1.0, 0.0]),
                (vid(5), vec![1.0, 0.0]),
            ])
            .unwrap();

        let (ids, _) = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids, vec![vid(3), vid(5), vid(9)]);
    }

    #[test]
    fn test_missing_file_searches_empty() {
        let temp = TempDir::new().unwrap();
        let index = VectorIndex::open(temp.path().join("absent.bin"));
        let (ids, distances) = index.search(&[1.0], 5).unwrap();
        assert!(ids.is_empty());
        assert!(distances.is_empty());
    }
}
