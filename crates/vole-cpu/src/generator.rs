use std::sync::Arc;

use vole_core::{Error, Graph, Kernel, OpKind, OperandIndex, OperationIndex, Result, Tensor};

use crate::kernels::{
    BinaryArithmeticKernel, ConcatKernel, ElementwiseUnaryKernel, FullyConnectedKernel,
    ReshapeKernel, SoftmaxKernel,
};

// Kernel generator — one kernel object per assigned operation
//
// The match below is the backend's real capability surface: a kind the
// backend claims in supports() but cannot build here is a configuration
// error at prepare time, never a silent fallback.

pub(crate) fn generate(
    backend_id: &str,
    graph: &Graph,
    op: OperationIndex,
    resolve: &dyn Fn(OperandIndex) -> Result<Arc<dyn Tensor>>,
) -> Result<Box<dyn Kernel>> {
    let operation = graph.operation(op);

    let input = |n: usize| -> Result<Arc<dyn Tensor>> {
        let idx = operation
            .inputs
            .get(n)
            .ok_or_else(|| Error::msg(format!("operation {op} is missing input {n}")))?;
        resolve(*idx)
    };
    let output = |n: usize| -> Result<Arc<dyn Tensor>> {
        let idx = operation
            .outputs
            .get(n)
            .ok_or_else(|| Error::msg(format!("operation {op} is missing output {n}")))?;
        resolve(*idx)
    };

    let kernel: Box<dyn Kernel> = match &operation.kind {
        OpKind::BinaryArithmetic { op, activation } => Box::new(BinaryArithmeticKernel::new(
            *op,
            *activation,
            input(0)?,
            input(1)?,
            output(0)?,
        )),

        OpKind::ElementwiseUnary { op } => {
            Box::new(ElementwiseUnaryKernel::new(*op, input(0)?, output(0)?))
        }

        OpKind::FullyConnected { activation } => {
            let bias = if operation.inputs.len() > 2 {
                Some(input(2)?)
            } else {
                None
            };
            Box::new(FullyConnectedKernel::new(
                *activation,
                input(0)?,
                input(1)?,
                bias,
                output(0)?,
            ))
        }

        OpKind::Concat { axis } => {
            let mut inputs = Vec::with_capacity(operation.inputs.len());
            for n in 0..operation.inputs.len() {
                inputs.push(input(n)?);
            }
            Box::new(ConcatKernel::new(*axis, inputs, output(0)?))
        }

        OpKind::Reshape { target } => {
            Box::new(ReshapeKernel::new(target.clone(), input(0)?, output(0)?))
        }

        OpKind::Softmax { beta } => Box::new(SoftmaxKernel::new(*beta, input(0)?, output(0)?)),

        OpKind::Permute { .. } => {
            return Err(Error::Configuration {
                backend: backend_id.to_string(),
                reason: format!("permutation {op} cannot be generated by a compute backend"),
            })
        }
    };

    Ok(kernel)
}
