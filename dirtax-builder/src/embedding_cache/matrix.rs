//! Dense row-major f32 matrix with a small binary container
//!
//! Layout (all integers little-endian):
//! ```text
//! offset  size  field
//! 0       4     magic "DTXM"
//! 4       4     u32 format version
//! 8       8     u64 row count
//! 16      4     u32 dimension
//! 20      ...   rows * dim f32 values, row-major
//! ```
//! Decoding is strict: a wrong magic, an unknown version, or a body whose
//! length differs from `rows * dim * 4` is an integrity error.

use dirtax_common::{Error, Result};

pub const MAGIC: &[u8; 4] = b"DTXM";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of equal-length rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let mut matrix = Self::new();
        for row in rows {
            matrix.push(row)?;
        }
        Ok(matrix)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows() {
            return None;
        }
        let start = index * self.dim;
        Some(&self.data[start..start + self.dim])
    }

    /// Append a row and return its index. The first row fixes the dimension.
    pub fn push(&mut self, row: &[f32]) -> Result<usize> {
        if row.is_empty() {
            return Err(Error::InvalidInput("cannot store an empty vector".to_string()));
        }
        if self.is_empty() {
            self.dim = row.len();
        } else if row.len() != self.dim {
            return Err(Error::InvalidInput(format!(
                "vector dimension {} does not match matrix dimension {}",
                row.len(),
                self.dim
            )));
        }
        self.data.extend_from_slice(row);
        Ok(self.rows() - 1)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.rows() as u64).to_le_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Integrity(format!(
                "matrix file truncated: {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(Error::Integrity("matrix file has wrong magic".to_string()));
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::Integrity(format!(
                "unsupported matrix format version {}",
                version
            )));
        }

        let mut rows_raw = [0u8; 8];
        rows_raw.copy_from_slice(&bytes[8..16]);
        let rows = u64::from_le_bytes(rows_raw) as usize;
        let dim = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;

        let expected = rows
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::Integrity("matrix header overflows".to_string()))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(Error::Integrity(format!(
                "matrix body is {} bytes, header declares {} rows x {} dims",
                body.len(),
                rows,
                dim
            )));
        }
        if rows > 0 && dim == 0 {
            return Err(Error::Integrity("matrix declares rows with zero dimension".to_string()));
        }

        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            dim: if rows == 0 { 0 } else { dim },
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let matrix = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![-0.5, 0.0, 7.25]]).unwrap();
        let bytes = matrix.encode();
        assert_eq!(bytes.len(), 20 + 2 * 3 * 4);
        let back = Matrix::decode(&bytes).unwrap();
        assert_eq!(back, matrix);
        assert_eq!(back.row(1), Some(&[-0.5, 0.0, 7.25][..]));
        assert_eq!(back.row(2), None);
    }

    #[test]
    fn test_empty_matrix() {
        let back = Matrix::decode(&Matrix::new().encode()).unwrap();
        assert_eq!(back.rows(), 0);
        assert!(back.is_empty());
    }

    #[test]
    fn test_push_rejects_dimension_change() {
        let mut matrix = Matrix::new();
        assert_eq!(matrix.push(&[1.0, 2.0]).unwrap(), 0);
        assert!(matches!(matrix.push(&[1.0]), Err(Error::InvalidInput(_))));
        assert!(matches!(matrix.push(&[]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap().encode();
        assert!(matches!(
            Matrix::decode(&bytes[..bytes.len() - 3]),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(Matrix::decode(&bytes[..10]), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = Matrix::from_rows(&[vec![1.0]]).unwrap().encode();
        bytes[0] = b'X';
        assert!(matches!(Matrix::decode(&bytes), Err(Error::Integrity(_))));
    }
}
