use std::fmt;

use crate::shape::{contiguous_strides, Dim, Shape};

// Layout — dimension-ordering convention of a tensor's storage
//
// Graph-level operand shapes are always expressed in the canonical NHWC
// (channel-last) ordering. A backend may prefer to store rank-4 tensors
// channel-first; the lowering step then records NCHW in the operand's
// LoweringInfo and inserts permutation operations at every boundary where
// producer and consumer disagree. Shapes of rank other than 4 are unaffected
// by layout (the permutation is the identity).

/// Memory ordering convention for a rank-4 tensor's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Channel-last: [batch, height, width, channel]. The canonical order.
    NHWC,
    /// Channel-first: [batch, channel, height, width].
    NCHW,
}

impl Layout {
    /// Permutation taking a rank-4 shape stored as `from` to one stored as
    /// `to`: destination axis `d` reads source axis `perm[d]`.
    pub fn permutation(from: Layout, to: Layout) -> [usize; 4] {
        match (from, to) {
            (Layout::NHWC, Layout::NCHW) => [0, 3, 1, 2],
            (Layout::NCHW, Layout::NHWC) => [0, 2, 3, 1],
            _ => [0, 1, 2, 3],
        }
    }

    /// Reorder static dims from `from` ordering to `to` ordering.
    /// Ranks other than 4 pass through unchanged.
    pub fn permute_dims(dims: &[usize], from: Layout, to: Layout) -> Vec<usize> {
        if dims.len() != 4 || from == to {
            return dims.to_vec();
        }
        let perm = Layout::permutation(from, to);
        perm.iter().map(|&p| dims[p]).collect()
    }

    /// Reorder a (possibly dynamic) shape from `from` to `to` ordering.
    pub fn permute_shape(shape: &Shape, from: Layout, to: Layout) -> Shape {
        if shape.rank() != 4 || from == to {
            return shape.clone();
        }
        let perm = Layout::permutation(from, to);
        let dims: Vec<Dim> = perm.iter().map(|&p| shape.dims()[p]).collect();
        Shape::new(dims)
    }

    /// Map a canonical (NHWC-space) axis to its position under this layout.
    /// Identity for ranks other than 4.
    pub fn physical_axis(&self, canonical_axis: usize, rank: usize) -> usize {
        if rank != 4 || *self == Layout::NHWC {
            return canonical_axis;
        }
        let perm = Layout::permutation(Layout::NHWC, *self);
        perm.iter()
            .position(|&p| p == canonical_axis)
            .unwrap_or(canonical_axis)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::NHWC => write!(f, "NHWC"),
            Layout::NCHW => write!(f, "NCHW"),
        }
    }
}

/// Reorder a flat f32 buffer of rank-4 `src_dims` by `perm` (destination
/// axis `d` reads source axis `perm[d]`). Walks destination indices in
/// row-major order and gathers through the source strides.
pub fn permute_f32(data: &[f32], src_dims: &[usize], perm: [usize; 4]) -> Vec<f32> {
    debug_assert_eq!(src_dims.len(), 4);
    let dst_dims: Vec<usize> = perm.iter().map(|&p| src_dims[p]).collect();
    let src_strides = contiguous_strides(src_dims);
    let total: usize = dst_dims.iter().product();
    let mut out = vec![0.0f32; total];

    let mut idx = [0usize; 4];
    for slot in out.iter_mut() {
        let mut src_flat = 0;
        for d in 0..4 {
            src_flat += idx[d] * src_strides[perm[d]];
        }
        *slot = data[src_flat];

        // Advance the destination multi-index, rightmost dimension first.
        for d in (0..4).rev() {
            idx[d] += 1;
            if idx[d] < dst_dims[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    out
}

/// Convert a flat f32 buffer stored in `from` ordering (with physical dims
/// `src_dims`) to `to` ordering. Identity copy for non-rank-4 data or equal
/// layouts.
pub fn relayout_f32(data: &[f32], src_dims: &[usize], from: Layout, to: Layout) -> Vec<f32> {
    if src_dims.len() != 4 || from == to {
        return data.to_vec();
    }
    permute_f32(data, src_dims, Layout::permutation(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_vectors() {
        assert_eq!(
            Layout::permutation(Layout::NHWC, Layout::NCHW),
            [0, 3, 1, 2]
        );
        assert_eq!(
            Layout::permutation(Layout::NCHW, Layout::NHWC),
            [0, 2, 3, 1]
        );
        assert_eq!(
            Layout::permutation(Layout::NHWC, Layout::NHWC),
            [0, 1, 2, 3]
        );
    }

    #[test]
    fn test_permute_dims() {
        // NHWC [1, 2, 3, 4] → NCHW [1, 4, 2, 3]
        assert_eq!(
            Layout::permute_dims(&[1, 2, 3, 4], Layout::NHWC, Layout::NCHW),
            vec![1, 4, 2, 3]
        );
        // Non-rank-4 shapes are unaffected.
        assert_eq!(
            Layout::permute_dims(&[5, 6], Layout::NHWC, Layout::NCHW),
            vec![5, 6]
        );
    }

    #[test]
    fn test_physical_axis() {
        // Canonical channel axis (3) sits at position 1 under NCHW.
        assert_eq!(Layout::NCHW.physical_axis(3, 4), 1);
        assert_eq!(Layout::NCHW.physical_axis(0, 4), 0);
        assert_eq!(Layout::NCHW.physical_axis(1, 4), 2);
        // Identity outside rank 4.
        assert_eq!(Layout::NCHW.physical_axis(1, 2), 1);
        assert_eq!(Layout::NHWC.physical_axis(2, 4), 2);
    }

    #[test]
    fn test_permute_round_trip() {
        // [1, 2, 2, 3] NHWC, values 0..12.
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let nchw = relayout_f32(&data, &[1, 2, 2, 3], Layout::NHWC, Layout::NCHW);
        assert_eq!(nchw.len(), 12);
        // First channel plane of NCHW gathers every third NHWC element.
        assert_eq!(&nchw[0..4], &[0.0, 3.0, 6.0, 9.0]);
        let back = relayout_f32(&nchw, &[1, 3, 2, 2], Layout::NCHW, Layout::NHWC);
        assert_eq!(back, data);
    }
}
