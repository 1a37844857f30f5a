use crate::bail;
use crate::error::{Error, Result};
use crate::op::OpKind;
use crate::shape::{Dim, Shape};

// Shape inference — canonical-space output shapes from input shapes
//
// Runs once at prepare time over the whole graph (propagating dynamic
// dimensions through untouched) and never again: at run time each kernel
// re-resolves its own physical output extents in configure(), once its
// inputs carry concrete dims.

/// Infer the single output shape of `kind` from its input shapes.
///
/// Shapes are in canonical (NHWC) dimension order. Dynamic input
/// dimensions propagate to the output wherever the exact extent depends
/// on them; static dimensions are checked and mismatches reported.
pub fn infer(kind: &OpKind, inputs: &[Shape]) -> Result<Shape> {
    match kind {
        OpKind::BinaryArithmetic { .. } => {
            expect_inputs(kind, inputs, 2)?;
            Shape::broadcast(&inputs[0], &inputs[1])
        }

        OpKind::ElementwiseUnary { .. } | OpKind::Softmax { .. } => {
            expect_inputs(kind, inputs, 1)?;
            Ok(inputs[0].clone())
        }

        OpKind::FullyConnected { .. } => infer_fully_connected(inputs),

        OpKind::Concat { axis } => infer_concat(inputs, *axis),

        OpKind::Reshape { target } => {
            expect_inputs(kind, inputs, 1)?;
            infer_reshape(&inputs[0], target)
        }

        // Permute changes storage order only; the canonical shape is
        // unchanged.
        OpKind::Permute { .. } => {
            expect_inputs(kind, inputs, 1)?;
            Ok(inputs[0].clone())
        }
    }
}

fn expect_inputs(kind: &OpKind, inputs: &[Shape], want: usize) -> Result<()> {
    if inputs.len() != want {
        bail!(
            "{} expects {} input(s), got {}",
            kind.name(),
            want,
            inputs.len()
        );
    }
    Ok(())
}

/// `input [..., in] × weight [out, in] → [..., out]`, optional `bias [out]`.
fn infer_fully_connected(inputs: &[Shape]) -> Result<Shape> {
    if inputs.len() != 2 && inputs.len() != 3 {
        bail!("FullyConnected expects 2 or 3 inputs, got {}", inputs.len());
    }
    let input = &inputs[0];
    let weight = &inputs[1];
    if input.rank() < 1 {
        return Err(Error::RankMismatch {
            expected: 1,
            got: 0,
        });
    }
    if weight.rank() != 2 {
        return Err(Error::RankMismatch {
            expected: 2,
            got: weight.rank(),
        });
    }

    let in_dim = input.dim(input.rank() - 1)?;
    let weight_in = weight.dim(1)?;
    if let (Dim::Fixed(a), Dim::Fixed(b)) = (in_dim, weight_in) {
        if a != b {
            return Err(Error::ShapeMismatch {
                expected: weight.clone(),
                got: input.clone(),
            });
        }
    }

    let mut dims = input.dims().to_vec();
    let last = dims.len() - 1;
    dims[last] = weight.dim(0)?;
    Ok(Shape::new(dims))
}

fn infer_concat(inputs: &[Shape], axis: usize) -> Result<Shape> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::msg("Concat expects at least one input"))?;
    let rank = first.rank();
    if axis >= rank {
        return Err(Error::DimOutOfRange { dim: axis, rank });
    }

    let mut dims = first.dims().to_vec();
    let mut axis_sum = first.dim(axis)?.as_fixed();

    for shape in &inputs[1..] {
        if shape.rank() != rank {
            return Err(Error::RankMismatch {
                expected: rank,
                got: shape.rank(),
            });
        }
        for d in 0..rank {
            let dim = shape.dim(d)?;
            if d == axis {
                axis_sum = match (axis_sum, dim.as_fixed()) {
                    (Some(acc), Some(n)) => Some(acc + n),
                    _ => None,
                };
                continue;
            }
            // Off-axis dims must agree; a dynamic one defers the check to
            // run time and leaves the output dynamic there.
            dims[d] = match (dims[d], dim) {
                (Dim::Fixed(a), Dim::Fixed(b)) => {
                    if a != b {
                        return Err(Error::ShapeMismatch {
                            expected: first.clone(),
                            got: shape.clone(),
                        });
                    }
                    Dim::Fixed(a)
                }
                (Dim::Fixed(a), Dim::Dynamic) | (Dim::Dynamic, Dim::Fixed(a)) => Dim::Fixed(a),
                (Dim::Dynamic, Dim::Dynamic) => Dim::Dynamic,
            };
        }
    }

    dims[axis] = match axis_sum {
        Some(n) => Dim::Fixed(n),
        None => Dim::Dynamic,
    };
    Ok(Shape::new(dims))
}

fn infer_reshape(input: &Shape, target: &[Dim]) -> Result<Shape> {
    let holes = target.iter().filter(|d| d.is_dynamic()).count();
    if holes > 1 {
        bail!("Reshape target {:?} has more than one unknown dimension", target);
    }

    // With a static input and at most one hole, the hole is solvable now.
    if let Some(total) = input.num_elements() {
        let known: usize = target.iter().filter_map(|d| d.as_fixed()).product();
        if holes == 0 {
            if known != total {
                return Err(Error::ElementCountMismatch {
                    shape: input.clone(),
                    expected: total,
                    got: known,
                });
            }
            return Ok(Shape::new(target.to_vec()));
        }
        if known == 0 || total % known != 0 {
            return Err(Error::DynamicShape(format!(
                "cannot reshape {total} elements into {:?}",
                target
            )));
        }
        let dims = target
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => Dim::Fixed(*n),
                Dim::Dynamic => Dim::Fixed(total / known),
            })
            .collect();
        return Ok(Shape::new(dims));
    }

    // Dynamic input: the target (with its hole, if any) stands as-is and
    // is resolved at run time.
    Ok(Shape::new(target.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Activation, ArithmeticOp};

    #[test]
    fn test_wrong_input_count() {
        let kind = OpKind::BinaryArithmetic {
            op: ArithmeticOp::Add,
            activation: Activation::None,
        };
        let err = infer(&kind, &[Shape::from_static(&[2, 3])]);
        assert!(matches!(err, Err(Error::Msg(_))));
    }

    #[test]
    fn test_binary_broadcast() {
        let kind = OpKind::BinaryArithmetic {
            op: ArithmeticOp::Add,
            activation: Activation::None,
        };
        let out = infer(
            &kind,
            &[Shape::from_static(&[2, 3]), Shape::from_static(&[3])],
        )
        .unwrap();
        assert_eq!(out, Shape::from_static(&[2, 3]));
    }

    #[test]
    fn test_fully_connected() {
        let kind = OpKind::FullyConnected {
            activation: Activation::None,
        };
        let out = infer(
            &kind,
            &[Shape::from_static(&[4, 8]), Shape::from_static(&[16, 8])],
        )
        .unwrap();
        assert_eq!(out, Shape::from_static(&[4, 16]));

        // Inner-dimension mismatch is caught statically.
        let err = infer(
            &kind,
            &[Shape::from_static(&[4, 7]), Shape::from_static(&[16, 8])],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_fully_connected_dynamic_batch() {
        let kind = OpKind::FullyConnected {
            activation: Activation::None,
        };
        let input = Shape::new(vec![Dim::Dynamic, Dim::Fixed(8)]);
        let out = infer(&kind, &[input, Shape::from_static(&[16, 8])]).unwrap();
        assert_eq!(out.dims(), &[Dim::Dynamic, Dim::Fixed(16)]);
    }

    #[test]
    fn test_concat() {
        let kind = OpKind::Concat { axis: 1 };
        let out = infer(
            &kind,
            &[Shape::from_static(&[2, 3]), Shape::from_static(&[2, 5])],
        )
        .unwrap();
        assert_eq!(out, Shape::from_static(&[2, 8]));

        // Dynamic contribution makes the concat axis dynamic.
        let out = infer(
            &kind,
            &[
                Shape::from_static(&[2, 3]),
                Shape::new(vec![Dim::Fixed(2), Dim::Dynamic]),
            ],
        )
        .unwrap();
        assert_eq!(out.dims(), &[Dim::Fixed(2), Dim::Dynamic]);
    }

    #[test]
    fn test_concat_off_axis_mismatch() {
        let kind = OpKind::Concat { axis: 1 };
        let err = infer(
            &kind,
            &[Shape::from_static(&[2, 3]), Shape::from_static(&[4, 3])],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_reshape_fills_hole() {
        let kind = OpKind::Reshape {
            target: vec![Dim::Fixed(2), Dim::Dynamic],
        };
        let out = infer(&kind, &[Shape::from_static(&[4, 3])]).unwrap();
        assert_eq!(out, Shape::from_static(&[2, 6]));
    }

    #[test]
    fn test_reshape_count_mismatch() {
        let kind = OpKind::Reshape {
            target: vec![Dim::Fixed(5)],
        };
        let err = infer(&kind, &[Shape::from_static(&[4])]);
        assert!(err.is_err());
    }

    #[test]
    fn test_reshape_dynamic_input_defers() {
        let kind = OpKind::Reshape {
            target: vec![Dim::Dynamic, Dim::Fixed(4)],
        };
        let input = Shape::new(vec![Dim::Dynamic, Dim::Fixed(4)]);
        let out = infer(&kind, &[input]).unwrap();
        assert!(out.is_dynamic());
    }
}
