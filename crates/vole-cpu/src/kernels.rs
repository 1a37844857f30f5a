use std::sync::Arc;

use rayon::prelude::*;

use vole_core::layout::relayout_f32;
use vole_core::shape::{broadcast_static, broadcast_strides, Dim};
use vole_core::{Activation, ArithmeticOp, Error, Kernel, Layout, Result, Shape, Tensor, UnaryOp};

// CPU kernels — reference implementations over host f32 buffers
//
// Every kernel computes in the canonical NHWC dimension order: inputs are
// read through `read_canonical` (reordering NCHW storage on the fly) and
// results written back in the output tensor's own layout. configure()
// touches shapes only — it re-resolves the output extent from the current
// input extents — so the Configuring phase never moves data.

fn canonical_dims(t: &Arc<dyn Tensor>) -> Result<Vec<usize>> {
    let physical = t.shape().static_dims()?;
    Ok(Layout::permute_dims(&physical, t.layout(), Layout::NHWC))
}

fn read_canonical(t: &Arc<dyn Tensor>) -> Result<Vec<f32>> {
    let physical = t.shape().static_dims()?;
    let data = t.read()?;
    Ok(relayout_f32(&data, &physical, t.layout(), Layout::NHWC))
}

/// Resolve the output tensor's physical shape from canonical output dims.
fn bind_output(t: &Arc<dyn Tensor>, canonical: &[usize]) -> Result<()> {
    let physical = Layout::permute_dims(canonical, Layout::NHWC, t.layout());
    t.set_shape(&Shape::from_static(&physical))
}

fn write_canonical(t: &Arc<dyn Tensor>, canonical: &[usize], data: &[f32]) -> Result<()> {
    let out = relayout_f32(data, canonical, Layout::NHWC, t.layout());
    t.write(&out)
}

/// Visit every multi-index of `dims` in row-major order.
fn for_each_index(dims: &[usize], mut f: impl FnMut(&[usize])) {
    let total: usize = dims.iter().product();
    let mut idx = vec![0usize; dims.len()];
    for _ in 0..total {
        f(&idx);
        for d in (0..dims.len()).rev() {
            idx[d] += 1;
            if idx[d] < dims[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// BinaryArithmetic

pub struct BinaryArithmeticKernel {
    op: ArithmeticOp,
    activation: Activation,
    lhs: Arc<dyn Tensor>,
    rhs: Arc<dyn Tensor>,
    out: Arc<dyn Tensor>,
}

impl BinaryArithmeticKernel {
    pub fn new(
        op: ArithmeticOp,
        activation: Activation,
        lhs: Arc<dyn Tensor>,
        rhs: Arc<dyn Tensor>,
        out: Arc<dyn Tensor>,
    ) -> Self {
        BinaryArithmeticKernel {
            op,
            activation,
            lhs,
            rhs,
            out,
        }
    }
}

impl Kernel for BinaryArithmeticKernel {
    fn configure(&mut self) -> Result<()> {
        let l = canonical_dims(&self.lhs)?;
        let r = canonical_dims(&self.rhs)?;
        let out = broadcast_static(&l, &r)?;
        bind_output(&self.out, &out)
    }

    fn run(&mut self) -> Result<()> {
        let ldims = canonical_dims(&self.lhs)?;
        let rdims = canonical_dims(&self.rhs)?;
        let dims = broadcast_static(&ldims, &rdims)?;
        let lhs = read_canonical(&self.lhs)?;
        let rhs = read_canonical(&self.rhs)?;

        let ls = broadcast_strides(&ldims, &dims);
        let rs = broadcast_strides(&rdims, &dims);
        let total: usize = dims.iter().product();
        let mut result = Vec::with_capacity(total);

        for_each_index(&dims, |idx| {
            let mut lflat = 0;
            let mut rflat = 0;
            for (d, &i) in idx.iter().enumerate() {
                lflat += i * ls[d];
                rflat += i * rs[d];
            }
            let (a, b) = (lhs[lflat], rhs[rflat]);
            let v = match self.op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Sub => a - b,
                ArithmeticOp::Mul => a * b,
                ArithmeticOp::Div => a / b,
            };
            result.push(self.activation.apply(v));
        });

        write_canonical(&self.out, &dims, &result)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}

// ---------------------------------------------------------------------------
// ElementwiseUnary

pub struct ElementwiseUnaryKernel {
    op: UnaryOp,
    input: Arc<dyn Tensor>,
    out: Arc<dyn Tensor>,
}

impl ElementwiseUnaryKernel {
    pub fn new(op: UnaryOp, input: Arc<dyn Tensor>, out: Arc<dyn Tensor>) -> Self {
        ElementwiseUnaryKernel { op, input, out }
    }
}

impl Kernel for ElementwiseUnaryKernel {
    fn configure(&mut self) -> Result<()> {
        let dims = canonical_dims(&self.input)?;
        bind_output(&self.out, &dims)
    }

    fn run(&mut self) -> Result<()> {
        let dims = canonical_dims(&self.input)?;
        let data = read_canonical(&self.input)?;
        let result: Vec<f32> = data
            .iter()
            .map(|&v| match self.op {
                UnaryOp::Relu => v.max(0.0),
                UnaryOp::Sqrt => v.sqrt(),
                UnaryOp::Tanh => v.tanh(),
                UnaryOp::Abs => v.abs(),
                UnaryOp::Neg => -v,
            })
            .collect();
        write_canonical(&self.out, &dims, &result)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}

// ---------------------------------------------------------------------------
// FullyConnected

pub struct FullyConnectedKernel {
    activation: Activation,
    input: Arc<dyn Tensor>,
    weight: Arc<dyn Tensor>,
    bias: Option<Arc<dyn Tensor>>,
    out: Arc<dyn Tensor>,
}

impl FullyConnectedKernel {
    pub fn new(
        activation: Activation,
        input: Arc<dyn Tensor>,
        weight: Arc<dyn Tensor>,
        bias: Option<Arc<dyn Tensor>>,
        out: Arc<dyn Tensor>,
    ) -> Self {
        FullyConnectedKernel {
            activation,
            input,
            weight,
            bias,
            out,
        }
    }

    /// Canonical output dims, checking the contraction extent.
    fn output_dims(&self) -> Result<Vec<usize>> {
        let in_dims = canonical_dims(&self.input)?;
        let w_dims = canonical_dims(&self.weight)?;
        if w_dims.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: w_dims.len(),
            });
        }
        let in_features = *in_dims
            .last()
            .ok_or_else(|| Error::RankMismatch { expected: 1, got: 0 })?;
        if in_features != w_dims[1] {
            return Err(Error::ShapeMismatch {
                expected: Shape::from_static(&w_dims),
                got: Shape::from_static(&in_dims),
            });
        }
        let mut dims = in_dims;
        let last = dims.len() - 1;
        dims[last] = w_dims[0];
        Ok(dims)
    }
}

impl Kernel for FullyConnectedKernel {
    fn configure(&mut self) -> Result<()> {
        let dims = self.output_dims()?;
        bind_output(&self.out, &dims)
    }

    fn run(&mut self) -> Result<()> {
        let dims = self.output_dims()?;
        let in_dims = canonical_dims(&self.input)?;
        let in_features = in_dims[in_dims.len() - 1];
        let out_features = dims[dims.len() - 1];
        let batch: usize = in_dims[..in_dims.len() - 1].iter().product();

        let input = read_canonical(&self.input)?;
        let weight = read_canonical(&self.weight)?;
        let bias = match &self.bias {
            Some(b) => Some(read_canonical(b)?),
            None => None,
        };

        let mut result = vec![0.0f32; batch * out_features];
        result
            .par_chunks_mut(out_features)
            .enumerate()
            .for_each(|(b, row)| {
                let x = &input[b * in_features..(b + 1) * in_features];
                for (o, slot) in row.iter_mut().enumerate() {
                    let w = &weight[o * in_features..(o + 1) * in_features];
                    let mut acc = bias.as_ref().map_or(0.0, |bd| bd[o]);
                    for i in 0..in_features {
                        acc += x[i] * w[i];
                    }
                    *slot = self.activation.apply(acc);
                }
            });

        write_canonical(&self.out, &dims, &result)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}

// ---------------------------------------------------------------------------
// Concat

pub struct ConcatKernel {
    /// Concatenation axis, in canonical dimension order.
    axis: usize,
    inputs: Vec<Arc<dyn Tensor>>,
    out: Arc<dyn Tensor>,
}

impl ConcatKernel {
    pub fn new(axis: usize, inputs: Vec<Arc<dyn Tensor>>, out: Arc<dyn Tensor>) -> Self {
        ConcatKernel { axis, inputs, out }
    }

    fn output_dims(&self) -> Result<Vec<usize>> {
        let first = self
            .inputs
            .first()
            .ok_or_else(|| Error::msg("Concat with no inputs"))?;
        let mut dims = canonical_dims(first)?;
        if self.axis >= dims.len() {
            return Err(Error::DimOutOfRange {
                dim: self.axis,
                rank: dims.len(),
            });
        }
        for input in &self.inputs[1..] {
            let d = canonical_dims(input)?;
            if d.len() != dims.len() {
                return Err(Error::RankMismatch {
                    expected: dims.len(),
                    got: d.len(),
                });
            }
            for (i, (&a, &b)) in dims.iter().zip(&d).enumerate() {
                if i != self.axis && a != b {
                    return Err(Error::ShapeMismatch {
                        expected: Shape::from_static(&dims),
                        got: Shape::from_static(&d),
                    });
                }
            }
            dims[self.axis] += d[self.axis];
        }
        Ok(dims)
    }
}

impl Kernel for ConcatKernel {
    fn configure(&mut self) -> Result<()> {
        let dims = self.output_dims()?;
        bind_output(&self.out, &dims)
    }

    fn run(&mut self) -> Result<()> {
        let dims = self.output_dims()?;
        let outer: usize = dims[..self.axis].iter().product();
        let out_inner: usize = dims[self.axis..].iter().product();
        let mut result = vec![0.0f32; outer * out_inner];

        let mut offset = 0;
        for input in &self.inputs {
            let in_dims = canonical_dims(input)?;
            let inner: usize = in_dims[self.axis..].iter().product();
            let data = read_canonical(input)?;
            for o in 0..outer {
                let dst = o * out_inner + offset;
                result[dst..dst + inner].copy_from_slice(&data[o * inner..(o + 1) * inner]);
            }
            offset += inner;
        }

        write_canonical(&self.out, &dims, &result)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}

// ---------------------------------------------------------------------------
// Reshape

pub struct ReshapeKernel {
    target: Vec<Dim>,
    input: Arc<dyn Tensor>,
    out: Arc<dyn Tensor>,
}

impl ReshapeKernel {
    pub fn new(target: Vec<Dim>, input: Arc<dyn Tensor>, out: Arc<dyn Tensor>) -> Self {
        ReshapeKernel { target, input, out }
    }

    fn output_dims(&self) -> Result<Vec<usize>> {
        let in_dims = canonical_dims(&self.input)?;
        let total: usize = in_dims.iter().product();
        let known: usize = self.target.iter().filter_map(|d| d.as_fixed()).product();
        let holes = self.target.iter().filter(|d| d.is_dynamic()).count();

        match holes {
            0 => {
                if known != total {
                    return Err(Error::DynamicShape(format!(
                        "cannot reshape {total} elements into {:?}",
                        self.target
                    )));
                }
            }
            1 => {
                if known == 0 || total % known != 0 {
                    return Err(Error::DynamicShape(format!(
                        "cannot reshape {total} elements into {:?}",
                        self.target
                    )));
                }
            }
            _ => {
                return Err(Error::DynamicShape(
                    "reshape target has more than one unknown dimension".to_string(),
                ))
            }
        }

        Ok(self
            .target
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => *n,
                Dim::Dynamic => total / known,
            })
            .collect())
    }
}

impl Kernel for ReshapeKernel {
    fn configure(&mut self) -> Result<()> {
        let dims = self.output_dims()?;
        bind_output(&self.out, &dims)
    }

    fn run(&mut self) -> Result<()> {
        // Canonical element order is preserved; only the extents change.
        let dims = self.output_dims()?;
        let data = read_canonical(&self.input)?;
        write_canonical(&self.out, &dims, &data)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}

// ---------------------------------------------------------------------------
// Softmax

pub struct SoftmaxKernel {
    beta: f32,
    input: Arc<dyn Tensor>,
    out: Arc<dyn Tensor>,
}

impl SoftmaxKernel {
    pub fn new(beta: f32, input: Arc<dyn Tensor>, out: Arc<dyn Tensor>) -> Self {
        SoftmaxKernel { beta, input, out }
    }
}

impl Kernel for SoftmaxKernel {
    fn configure(&mut self) -> Result<()> {
        let dims = canonical_dims(&self.input)?;
        bind_output(&self.out, &dims)
    }

    fn run(&mut self) -> Result<()> {
        let dims = canonical_dims(&self.input)?;
        let data = read_canonical(&self.input)?;
        let last = dims.last().copied().unwrap_or(1).max(1);
        let mut result = vec![0.0f32; data.len()];

        for (row_in, row_out) in data.chunks(last).zip(result.chunks_mut(last)) {
            let max = row_in.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (o, &v) in row_out.iter_mut().zip(row_in) {
                let e = (self.beta * (v - max)).exp();
                *o = e;
                sum += e;
            }
            for o in row_out.iter_mut() {
                *o /= sum;
            }
        }

        write_canonical(&self.out, &dims, &result)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.out))
    }
}
