//! Exact nearest-neighbor index over fixed-dimension vectors (flat L2 scan).
//!
//! Append-only: vectors keep their arrival position forever, which is what the
//! metadata store relies on.

use std::cmp::Ordering;

const MAGIC: [u8; 4] = *b"FL2I";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 8;

/// One search hit: position of the stored vector and its squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// Flat vector index. Vectors are stored contiguously, `dimension` floats each.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Result<Self, FlatIndexError> {
        if dimension == 0 {
            return Err(FlatIndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start.checked_add(self.dimension)?)
    }

    /// Checks that every vector has the index dimension without storing anything.
    pub fn check(&self, vectors: &[Vec<f32>]) -> Result<(), FlatIndexError> {
        match vectors.iter().find(|v| v.len() != self.dimension) {
            Some(v) => Err(FlatIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            }),
            None => Ok(()),
        }
    }

    /// Appends vectors in order. All-or-nothing: a wrong-sized vector anywhere
    /// in the batch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), FlatIndexError> {
        self.check(vectors)?;
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Returns up to `k` stored vectors nearest to `query`, by ascending squared
    /// L2 distance. Ties go to the earlier-inserted vector.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, FlatIndexError> {
        if query.len() != self.dimension {
            return Err(FlatIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(index, v)| Neighbor {
                index,
                distance: l2_squared(query, v),
            })
            .collect();
        hits.sort_by(compare);
        hits.truncate(k);
        Ok(hits)
    }

    /// Serializes to the on-disk layout: magic, version, dimension, count, then
    /// little-endian f32 values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        buffer.extend_from_slice(&MAGIC);
        buffer.extend_from_slice(&VERSION.to_le_bytes());
        buffer.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        buffer.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for val in &self.data {
            buffer.extend_from_slice(&val.to_le_bytes());
        }
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FlatIndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(FlatIndexError::Decode("file too short".into()));
        }
        if bytes[0..4] != MAGIC {
            return Err(FlatIndexError::Decode("invalid magic".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(FlatIndexError::Decode(format!("unsupported version {version}")));
        }
        let dimension = u32::from_le_bytes(array(&bytes[6..10])) as usize;
        let count = u64::from_le_bytes(array(&bytes[10..18])) as usize;
        let mut index = Self::new(dimension)?;

        let payload = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| FlatIndexError::Decode("vector count overflows".into()))?;
        if payload.len() != expected {
            return Err(FlatIndexError::Decode(format!(
                "expected {expected} payload bytes for {count} vectors, found {}",
                payload.len()
            )));
        }
        index.data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(array(b)))
            .collect();
        Ok(index)
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// NaN distances sort after every real distance.
fn compare(a: &Neighbor, b: &Neighbor) -> Ordering {
    let by_distance = match (a.distance.is_nan(), b.distance.is_nan()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => Ordering::Equal,
        (false, false) => a.distance.total_cmp(&b.distance),
    };
    by_distance.then(a.index.cmp(&b.index))
}

pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum FlatIndexError {
    #[error("vector dimension must be positive")]
    ZeroDimension,
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("corrupt index bytes: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(vectors: &[Vec<f32>]) -> FlatL2Index {
        let mut idx = FlatL2Index::new(vectors[0].len()).unwrap();
        idx.add(vectors).unwrap();
        idx
    }

    #[test]
    fn nearest_first_with_squared_distances() {
        let idx = index(&[vec![0.0, 0.0], vec![3.0, 4.0], vec![1.0, 0.0]]);
        assert_eq!(idx.get(1), Some(&[3.0, 4.0][..]));
        assert_eq!(idx.get(3), None);
        let hits = idx.search(&[0.9, 0.0], 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![2, 0, 1]);
        assert!((hits[1].distance - 0.81).abs() < 1e-6);
    }

    #[test]
    fn ties_go_to_first_inserted() {
        let idx = index(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]);
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[1].index, 2);
    }

    #[test]
    fn k_larger_than_size_returns_all() {
        let idx = index(&[vec![1.0], vec![2.0], vec![3.0]]);
        assert_eq!(idx.search(&[0.0], 10).unwrap().len(), 3);
        assert!(idx.search(&[0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn nan_distances_sort_last() {
        let idx = index(&[vec![f32::NAN], vec![5.0]]);
        let hits = idx.search(&[0.0], 2).unwrap();
        assert_eq!(hits[0].index, 1);
    }

    #[test]
    fn wrong_dimensions_are_rejected_without_partial_add() {
        let mut idx = FlatL2Index::new(2).unwrap();
        let err = idx.add(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, FlatIndexError::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(idx.is_empty());
        assert!(idx.search(&[1.0, 2.0, 3.0], 1).is_err());
        assert!(FlatL2Index::new(0).is_err());
    }

    #[test]
    fn bytes_round_trip_gives_identical_search() {
        let idx = index(&[vec![0.5, -1.0, 2.0], vec![0.1, 0.2, 0.3], vec![-3.0, 0.0, 1.5]]);
        let bytes = idx.to_bytes();
        let back = FlatL2Index::from_bytes(&bytes).unwrap();
        assert_eq!(back, idx);
        assert_eq!(back.to_bytes(), bytes);
        let q = [0.0, 0.0, 1.0];
        assert_eq!(back.search(&q, 3).unwrap(), idx.search(&q, 3).unwrap());
    }

    #[test]
    fn corrupt_bytes_are_rejected() {
        let bytes = index(&[vec![1.0, 2.0]]).to_bytes();
        assert!(FlatL2Index::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(FlatL2Index::from_bytes(&trailing).is_err());
        let mut bad_magic = bytes;
        bad_magic[0] = b'X';
        assert!(matches!(FlatL2Index::from_bytes(&bad_magic), Err(FlatIndexError::Decode(_))));
    }
}
