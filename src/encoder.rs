//! The base-table seam: fetching live rows and encoding them as vectors.
//!
//! The buffer stores only `HeapRef`s; whenever a vector is needed (flush,
//! local scan, index build) the row is re-read from the base table
//! through a [`TupleSource`]. In production that is the host database's
//! table accessor plus its tuple encoder; tests and examples use
//! [`MemoryTupleSource`].

use std::collections::BTreeMap;

use miette::Diagnostic;
use parking_lot::RwLock;
use thiserror::Error;

use crate::id::HeapRef;
use crate::remote::{MetadataValue, RemoteVector, ZeroVector};

/// Errors raised while encoding a base-table row.
#[derive(Debug, Error, Diagnostic)]
pub enum EncodeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Zero(#[from] ZeroVector),

    /// The row's vector has the wrong number of dimensions for the index.
    #[error("row {heap_ref} has {actual} dimensions, the index expects {expected}")]
    #[diagnostic(code(remora::encoder::wrong_dimensions))]
    WrongDimensions {
        heap_ref: HeapRef,
        expected: u32,
        actual: u32,
    },
}

/// Access to live base-table rows as remote vectors.
///
/// `encode` and `vector` return `Ok(None)` when the row is no longer
/// visible; dead rows are silently skipped by the flusher and the local
/// scan, exactly as the host's visibility check would.
pub trait TupleSource: Send + Sync {
    /// Vector dimensionality of the indexed column.
    fn dimensions(&self) -> u32;

    /// Fetch the live row and encode it as a full remote vector
    /// (values plus scalar metadata).
    fn encode(&self, heap_ref: HeapRef) -> Result<Option<RemoteVector>, EncodeError>;

    /// Fetch only the vector values, for distance computation.
    fn vector(&self, heap_ref: HeapRef) -> Result<Option<Vec<f32>>, EncodeError> {
        Ok(self.encode(heap_ref)?.map(|v| v.values))
    }

    /// Scan every live row, for the one-shot index build.
    fn scan(&self) -> Box<dyn Iterator<Item = Result<(HeapRef, RemoteVector), EncodeError>> + '_>;
}

#[derive(Clone, Debug)]
struct Row {
    values: Vec<f32>,
    metadata: BTreeMap<String, MetadataValue>,
}

/// In-memory [`TupleSource`], the test stand-in for a base table.
pub struct MemoryTupleSource {
    dimensions: u32,
    rows: RwLock<BTreeMap<HeapRef, Row>>,
}

impl MemoryTupleSource {
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace a row. The zero-vector check happens at encode
    /// time, not here: the base table itself is free to hold any row.
    pub fn insert_row(
        &self,
        heap_ref: HeapRef,
        values: Vec<f32>,
        metadata: BTreeMap<String, MetadataValue>,
    ) {
        self.rows.write().insert(heap_ref, Row { values, metadata });
    }

    pub fn remove_row(&self, heap_ref: HeapRef) {
        self.rows.write().remove(&heap_ref);
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }
}

impl TupleSource for MemoryTupleSource {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn encode(&self, heap_ref: HeapRef) -> Result<Option<RemoteVector>, EncodeError> {
        let rows = self.rows.read();
        let Some(row) = rows.get(&heap_ref) else {
            return Ok(None);
        };
        if row.values.len() as u32 != self.dimensions {
            return Err(EncodeError::WrongDimensions {
                heap_ref,
                expected: self.dimensions,
                actual: row.values.len() as u32,
            });
        }
        let vector = RemoteVector::new(heap_ref, row.values.clone(), row.metadata.clone())?;
        Ok(Some(vector))
    }

    fn scan(&self) -> Box<dyn Iterator<Item = Result<(HeapRef, RemoteVector), EncodeError>> + '_> {
        let refs: Vec<HeapRef> = self.rows.read().keys().copied().collect();
        Box::new(refs.into_iter().filter_map(move |heap_ref| {
            self.encode(heap_ref)
                .map(|row| row.map(|vector| (heap_ref, vector)))
                .transpose()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemoryTupleSource {
        let source = MemoryTupleSource::new(2);
        source.insert_row(HeapRef::new(0, 1), vec![1.0, 0.0], BTreeMap::new());
        source
    }

    #[test]
    fn encode_live_row() {
        let vector = source().encode(HeapRef::new(0, 1)).unwrap().unwrap();
        assert_eq!(vector.id, "000000000001");
        assert_eq!(vector.values, vec![1.0, 0.0]);
    }

    #[test]
    fn dead_row_is_none() {
        assert!(source().encode(HeapRef::new(0, 2)).unwrap().is_none());
    }

    #[test]
    fn zero_vector_fails_at_encode_time() {
        let source = source();
        source.insert_row(HeapRef::new(0, 3), vec![0.0, 0.0], BTreeMap::new());
        assert!(matches!(
            source.encode(HeapRef::new(0, 3)),
            Err(EncodeError::Zero(_))
        ));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let source = source();
        source.insert_row(HeapRef::new(0, 4), vec![1.0], BTreeMap::new());
        assert!(matches!(
            source.encode(HeapRef::new(0, 4)),
            Err(EncodeError::WrongDimensions { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn scan_yields_every_live_row() {
        let source = source();
        source.insert_row(HeapRef::new(0, 2), vec![0.0, 1.0], BTreeMap::new());
        let scanned: Vec<_> = source.scan().collect::<Result<_, _>>().unwrap();
        assert_eq!(scanned.len(), 2);
    }
}
