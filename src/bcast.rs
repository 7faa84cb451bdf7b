//! Broadcast shape inference for the binary kernels.
//!
//! Feature shapes (leading graph dimension already stripped) are
//! right-aligned and checked NumPy-style; contiguous runs of dimensions
//! where neither operand broadcasts are flattened so kernel-time rank stays
//! below a small fixed bound. A broadcast (size-1) dimension records stride
//! 0, so the gather arithmetic re-reads the same element without a modulo.

use crate::error::Error;

/// Upper bound on the collapsed kernel-time rank.
pub const MAX_BCAST_NDIM: usize = 8;

/// Preprocessed shape/stride description driving the broadcasting kernels.
///
/// `real_out_shape` is the feature shape visible to the caller. The
/// remaining fields have equal rank, with contiguous non-broadcasting
/// dimensions already flattened: `(4, 1, 3, 3)` against `(4, 5, 3, 3)`
/// becomes `(4, 1, 9)` against `(4, 5, 9)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BcastInfo {
    pub real_out_shape: Vec<usize>,
    pub lhs_shape: Vec<usize>,
    pub lhs_stride: Vec<usize>,
    pub rhs_shape: Vec<usize>,
    pub rhs_stride: Vec<usize>,
    pub out_shape: Vec<usize>,
    pub out_stride: Vec<usize>,
}

impl BcastInfo {
    /// Collapsed output elements per row; equals the product of
    /// `real_out_shape`.
    pub fn out_len(&self) -> usize {
        self.out_shape.iter().product()
    }

    /// Elements per left-operand row.
    pub fn lhs_len(&self) -> usize {
        self.lhs_shape.iter().product()
    }

    /// Elements per right-operand row.
    pub fn rhs_len(&self) -> usize {
        self.rhs_shape.iter().product()
    }

    /// True when no dimension actually broadcasts, e.g. `(3,)` against
    /// `(1, 3)`. Such calls can run on the flat non-broadcast kernels even
    /// though the operand ranks differ.
    pub fn is_trivial(&self) -> bool {
        self.lhs_shape == self.out_shape && self.rhs_shape == self.out_shape
    }
}

/// Computes the broadcast-compatible output feature shape for two operand
/// feature shapes, or fails if they are incompatible.
pub fn infer_feature_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, Error> {
    Ok(calc_bcast(lhs, rhs)?.real_out_shape)
}

/// Builds the [`BcastInfo`] for a pair of operand feature shapes.
pub fn calc_bcast(lhs: &[usize], rhs: &[usize]) -> Result<BcastInfo, Error> {
    let max_ndim = lhs.len().max(rhs.len());
    let dim = |shape: &[usize], j: usize| {
        if j < shape.len() {
            shape[shape.len() - 1 - j]
        } else {
            1
        }
    };

    // Walk from the trailing dimension, merging runs where the operands
    // agree and emitting a dimension triple where one of them broadcasts.
    let mut lhs_shape = Vec::new();
    let mut rhs_shape = Vec::new();
    let mut out_shape = Vec::new();
    let mut real_out_shape = Vec::with_capacity(max_ndim);
    let mut accum = 0usize;
    for j in 0..max_ndim {
        let dl = dim(lhs, j);
        let dr = dim(rhs, j);
        if dl == dr {
            accum = if accum == 0 { dl } else { accum * dl };
        } else {
            if dl != 1 && dr != 1 {
                return Err(Error::IncompatibleShapes {
                    op: "broadcast".to_string(),
                    shape_a: lhs.to_vec(),
                    shape_b: rhs.to_vec(),
                });
            }
            if accum != 0 {
                lhs_shape.push(accum);
                rhs_shape.push(accum);
                out_shape.push(accum);
                accum = 0;
            }
            lhs_shape.push(dl);
            rhs_shape.push(dr);
            out_shape.push(dl.max(dr));
        }
        real_out_shape.push(dl.max(dr));
    }
    if accum != 0 {
        lhs_shape.push(accum);
        rhs_shape.push(accum);
        out_shape.push(accum);
    }
    if lhs_shape.is_empty() {
        // Scalar features reduce to a single length-1 dimension.
        lhs_shape.push(1);
        rhs_shape.push(1);
        out_shape.push(1);
    }
    lhs_shape.reverse();
    rhs_shape.reverse();
    out_shape.reverse();
    real_out_shape.reverse();

    if out_shape.len() > MAX_BCAST_NDIM {
        return Err(Error::InvalidOperation(format!(
            "broadcast rank {} exceeds the supported maximum of {}",
            out_shape.len(),
            MAX_BCAST_NDIM
        )));
    }

    let mut lhs_stride = row_major_strides(&lhs_shape);
    let mut rhs_stride = row_major_strides(&rhs_shape);
    let out_stride = row_major_strides(&out_shape);
    for d in 0..out_shape.len() {
        if lhs_shape[d] == 1 && out_shape[d] != 1 {
            lhs_stride[d] = 0;
        }
        if rhs_shape[d] == 1 && out_shape[d] != 1 {
            rhs_stride[d] = 0;
        }
    }

    Ok(BcastInfo {
        real_out_shape,
        lhs_shape,
        lhs_stride,
        rhs_shape,
        rhs_stride,
        out_shape,
        out_stride,
    })
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Maps a flat position within the collapsed output feature space to the
/// flat offsets within the left and right operand rows.
#[inline]
pub(crate) fn bcast_offsets(info: &BcastInfo, pos: usize) -> (usize, usize) {
    let mut rem = pos;
    let mut lhs_off = 0usize;
    let mut rhs_off = 0usize;
    for d in 0..info.out_shape.len() {
        let coord = rem / info.out_stride[d];
        rem %= info.out_stride[d];
        lhs_off += coord * info.lhs_stride[d];
        rhs_off += coord * info.rhs_stride[d];
    }
    (lhs_off, rhs_off)
}
