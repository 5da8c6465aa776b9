//! Width-adaptive column codecs.
//!
//! Every integer column is stored at the narrowest element width that fits
//! the column's observed maximum; float columns are stored at 32 bits unless
//! a value is not exactly representable there. Columns that are entirely
//! empty are stored as the `None` discriminant with no payload. The enum
//! discriminant doubles as the self-describing width marker on disk.

use crate::error::BuildError;
use rkyv::{Archive, Deserialize, Serialize};

/// Unsigned integer column (ids, group offsets, span starts and lengths).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum UintColumn {
    /// Empty column, no payload.
    None,
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl UintColumn {
    /// Pack values at the narrowest width that fits the maximum.
    ///
    /// 64-bit elements are only permitted for span offset columns
    /// (`allow_u64`); id-like columns must stay within 32 bits.
    pub fn pack(values: &[u64], allow_u64: bool) -> Result<Self, BuildError> {
        if values.is_empty() {
            return Ok(UintColumn::None);
        }
        let max = values.iter().copied().max().unwrap_or(0);
        Ok(if max <= u8::MAX as u64 {
            UintColumn::U8(values.iter().map(|&v| v as u8).collect())
        } else if max <= u16::MAX as u64 {
            UintColumn::U16(values.iter().map(|&v| v as u16).collect())
        } else if max <= u32::MAX as u64 {
            UintColumn::U32(values.iter().map(|&v| v as u32).collect())
        } else if allow_u64 {
            UintColumn::U64(values.to_vec())
        } else {
            return Err(BuildError::ColumnOverflow { max });
        })
    }

    /// Whether the column was stored as the empty discriminant.
    pub fn is_none(&self) -> bool {
        matches!(self, UintColumn::None)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            UintColumn::None => 0,
            UintColumn::U8(v) => v.len(),
            UintColumn::U16(v) => v.len(),
            UintColumn::U32(v) => v.len(),
            UintColumn::U64(v) => v.len(),
        }
    }

    /// Whether the column holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element width in bits, if any payload is present.
    pub fn width_bits(&self) -> Option<u8> {
        match self {
            UintColumn::None => None,
            UintColumn::U8(_) => Some(8),
            UintColumn::U16(_) => Some(16),
            UintColumn::U32(_) => Some(32),
            UintColumn::U64(_) => Some(64),
        }
    }

    /// Materialize the column as `u64` values.
    pub fn to_vec(&self) -> Vec<u64> {
        match self {
            UintColumn::None => Vec::new(),
            UintColumn::U8(v) => v.iter().map(|&x| x as u64).collect(),
            UintColumn::U16(v) => v.iter().map(|&x| x as u64).collect(),
            UintColumn::U32(v) => v.iter().map(|&x| x as u64).collect(),
            UintColumn::U64(v) => v.clone(),
        }
    }
}

/// Signed integer column (span references and parent indices, −1 = none).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum IntColumn {
    /// Empty column, no payload.
    None,
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl IntColumn {
    /// Pack values at the narrowest signed width that admits the maximum
    /// magnitude (every signed width admits the −1 sentinel).
    pub fn pack(values: &[i64]) -> Result<Self, BuildError> {
        if values.is_empty() {
            return Ok(IntColumn::None);
        }
        let max = values.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
        Ok(if max <= i8::MAX as u64 {
            IntColumn::I8(values.iter().map(|&v| v as i8).collect())
        } else if max <= i16::MAX as u64 {
            IntColumn::I16(values.iter().map(|&v| v as i16).collect())
        } else if max <= i32::MAX as u64 {
            IntColumn::I32(values.iter().map(|&v| v as i32).collect())
        } else {
            return Err(BuildError::ColumnOverflow { max });
        })
    }

    /// Whether the column was stored as the empty discriminant.
    pub fn is_none(&self) -> bool {
        matches!(self, IntColumn::None)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            IntColumn::None => 0,
            IntColumn::I8(v) => v.len(),
            IntColumn::I16(v) => v.len(),
            IntColumn::I32(v) => v.len(),
        }
    }

    /// Whether the column holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element width in bits, if any payload is present.
    pub fn width_bits(&self) -> Option<u8> {
        match self {
            IntColumn::None => None,
            IntColumn::I8(_) => Some(8),
            IntColumn::I16(_) => Some(16),
            IntColumn::I32(_) => Some(32),
        }
    }

    /// Materialize the column as `i64` values.
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            IntColumn::None => Vec::new(),
            IntColumn::I8(v) => v.iter().map(|&x| x as i64).collect(),
            IntColumn::I16(v) => v.iter().map(|&x| x as i64).collect(),
            IntColumn::I32(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }
}

/// Float column (label scores and embedding vectors).
///
/// Missing scores inside a partially-scored column are stored as NaN; a
/// column with no scores at all is stored as `None`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum FloatColumn {
    /// Empty column, no payload.
    None,
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Whether `v` survives a round-trip through `f32` unchanged.
fn fits_f32(v: f64) -> bool {
    v.is_nan() || (v as f32) as f64 == v
}

impl FloatColumn {
    /// Pack values at 32 bits, widening the whole column to 64 bits if any
    /// value is not exactly representable at 32.
    pub fn pack(values: &[f64]) -> Self {
        if values.is_empty() {
            return FloatColumn::None;
        }
        if values.iter().all(|&v| fits_f32(v)) {
            FloatColumn::F32(values.iter().map(|&v| v as f32).collect())
        } else {
            FloatColumn::F64(values.to_vec())
        }
    }

    /// Pack optional scores, using NaN for missing entries. A column whose
    /// entries are all missing packs to `None`.
    pub fn pack_scores(scores: &[Option<f64>]) -> Self {
        if scores.is_empty() || scores.iter().all(|s| s.is_none()) {
            return FloatColumn::None;
        }
        let values: Vec<f64> = scores.iter().map(|s| s.unwrap_or(f64::NAN)).collect();
        FloatColumn::pack(&values)
    }

    /// Whether the column was stored as the empty discriminant.
    pub fn is_none(&self) -> bool {
        matches!(self, FloatColumn::None)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            FloatColumn::None => 0,
            FloatColumn::F32(v) => v.len(),
            FloatColumn::F64(v) => v.len(),
        }
    }

    /// Whether the column holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element width in bits, if any payload is present.
    pub fn width_bits(&self) -> Option<u8> {
        match self {
            FloatColumn::None => None,
            FloatColumn::F32(_) => Some(32),
            FloatColumn::F64(_) => Some(64),
        }
    }

    /// Materialize the column as `f64` values.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            FloatColumn::None => Vec::new(),
            FloatColumn::F32(v) => v.iter().map(|&x| x as f64).collect(),
            FloatColumn::F64(v) => v.clone(),
        }
    }
}
