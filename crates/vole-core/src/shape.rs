use std::fmt;

use crate::error::{Error, Result};

// Shape — N-dimensional shape with run-time-unknown extents
//
// Unlike a purely static shape, any dimension may be marked Dynamic:
// unknown until execution. A Shape with a Dynamic dimension has no element
// count; it is resolved (re-resolved per run) during the executor's
// Configuring phase once real input extents are known.

/// A single dimension extent: fixed at load time or resolved at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Known extent.
    Fixed(usize),
    /// Unknown until run time.
    Dynamic,
}

impl Dim {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Dynamic)
    }

    /// The extent, if fixed.
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Fixed(n)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

/// N-dimensional shape of a tensor operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(Vec<Dim>);

impl Shape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Shape(dims)
    }

    /// Shape with all extents known.
    pub fn from_static(dims: &[usize]) -> Self {
        Shape(dims.iter().map(|&d| Dim::Fixed(d)).collect())
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// True if any dimension is unknown until run time.
    pub fn is_dynamic(&self) -> bool {
        self.0.iter().any(|d| d.is_dynamic())
    }

    /// Total element count, or `None` while any dimension is dynamic.
    /// A scalar shape [] has 1 element.
    pub fn num_elements(&self) -> Option<usize> {
        let mut n = 1usize;
        for d in &self.0 {
            n *= d.as_fixed()?;
        }
        Some(n)
    }

    pub fn dim(&self, d: usize) -> Result<Dim> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// All extents as `usize`, or a `DynamicShape` error if any is still
    /// unresolved.
    pub fn static_dims(&self) -> Result<Vec<usize>> {
        self.0
            .iter()
            .map(|d| {
                d.as_fixed().ok_or_else(|| {
                    Error::DynamicShape(format!("shape {self} has an unresolved dimension"))
                })
            })
            .collect()
    }

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy-style rules, extended for dynamic dimensions: a Dynamic extent
    /// broadcast against anything yields Dynamic (resolved at run time).
    pub fn broadcast(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            // Align from the right; missing leading dimensions are 1.
            let ld = if i < l.len() {
                l[l.len() - 1 - i]
            } else {
                Dim::Fixed(1)
            };
            let rd = if i < r.len() {
                r[r.len() - 1 - i]
            } else {
                Dim::Fixed(1)
            };

            let out = match (ld, rd) {
                (Dim::Fixed(a), Dim::Fixed(b)) => {
                    if a == b {
                        Dim::Fixed(a)
                    } else if a == 1 {
                        Dim::Fixed(b)
                    } else if b == 1 {
                        Dim::Fixed(a)
                    } else {
                        return Err(Error::ShapeMismatch {
                            expected: lhs.clone(),
                            got: rhs.clone(),
                        });
                    }
                }
                (Dim::Fixed(1), Dim::Dynamic) | (Dim::Dynamic, Dim::Fixed(1)) => Dim::Dynamic,
                (Dim::Fixed(a), Dim::Dynamic) | (Dim::Dynamic, Dim::Fixed(a)) => Dim::Fixed(a),
                (Dim::Dynamic, Dim::Dynamic) => Dim::Dynamic,
            };
            result.push(out);
        }

        result.reverse();
        Ok(Shape::new(result))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape::from_static(&v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape::from_static(s)
    }
}

// Static-dims helpers used by kernels at run time, once every extent is
// concrete.

/// Contiguous (row-major) strides for static dims.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    if !dims.is_empty() {
        strides[dims.len() - 1] = 1;
        for i in (0..dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
    }
    strides
}

/// Broadcast output dims from two static input dims.
pub fn broadcast_static(l: &[usize], r: &[usize]) -> Result<Vec<usize>> {
    let out = Shape::broadcast(&Shape::from_static(l), &Shape::from_static(r))?;
    out.static_dims()
}

/// Strides for reading `dims` as if it had the broadcast shape `target`:
/// size-1 and missing leading dimensions get stride 0 (element repeats).
pub fn broadcast_strides(dims: &[usize], target: &[usize]) -> Vec<usize> {
    let strides = contiguous_strides(dims);
    let mut result = vec![0usize; target.len()];
    let offset = target.len() - dims.len();
    for i in 0..dims.len() {
        if dims[i] == target[i + offset] {
            result[i + offset] = strides[i];
        }
        // dims[i] == 1 → stride stays 0 (broadcast)
    }
    result
}
