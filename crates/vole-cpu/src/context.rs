use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use vole_core::layout::relayout_f32;
use vole_core::{
    BackendContext, Error, FunctionMap, Layout, LoweredGraph, OperandIndex, Result, Shape, Tensor,
};

use crate::generator;
use crate::planner::{self, Claim};
use crate::tensor::CpuTensor;

// CpuContext — per-plan tensors and kernels for one CPU backend instance
//
// Tensor materialization sorts operands into three storage classes:
// constants get owned buffers holding their payload (re-ordered into the
// backend's layout), graph I/O and dynamically shaped operands get
// resizable owned buffers, and everything else is placed in one shared
// arena by the liveness planner.

pub struct CpuContext {
    id: String,
    tensors: HashMap<OperandIndex, Arc<dyn Tensor>>,
}

impl CpuContext {
    pub fn new(id: &str) -> Self {
        CpuContext {
            id: id.to_string(),
            tensors: HashMap::new(),
        }
    }

    /// Physical shape of `operand` under the layout lowering chose for it.
    fn physical_shape(lowered: &LoweredGraph, operand: OperandIndex) -> Result<Shape> {
        let info = lowered.lowering_info(operand)?;
        let canonical = &lowered.graph.operand(operand).shape;
        Ok(Layout::permute_shape(canonical, Layout::NHWC, info.layout))
    }
}

impl BackendContext for CpuContext {
    fn gen_tensors(&mut self, lowered: &LoweredGraph) -> Result<()> {
        let graph = &lowered.graph;

        // Position of each op sequence in execution order, for a
        // deterministic placement order.
        let seq_pos: HashMap<usize, usize> = lowered
            .order
            .iter()
            .enumerate()
            .map(|(pos, seq)| (seq.0, pos))
            .collect();

        // Transitive closure over the sequence dependency DAG: the planner
        // may only reuse a region across accesses that are strictly
        // ordered here, since the parallel executor runs incomparable
        // sequences concurrently.
        let n = lowered.op_seqs.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, deps) in lowered.deps.iter().enumerate() {
            for dep in deps {
                dependents[dep.0].push(i);
            }
        }
        let mut reach = vec![vec![false; n]; n];
        for &seq in lowered.order.iter().rev() {
            let s = seq.0;
            for &d in &dependents[s] {
                reach[s][d] = true;
                let downstream = reach[d].clone();
                for (j, r) in downstream.iter().enumerate() {
                    if *r {
                        reach[s][j] = true;
                    }
                }
            }
        }

        let mut claims: Vec<Claim> = Vec::new();
        let mut planned: Vec<OperandIndex> = Vec::new();

        for idx in graph.operand_indices() {
            let info = match lowered.lower_info.get(&idx) {
                Some(info) if info.backend == self.id => info,
                _ => continue,
            };
            let operand = graph.operand(idx);
            let layout = info.layout;

            if let Some(data) = &operand.data {
                // Constant payloads are stored canonically; re-order once
                // into the layout this backend will read them in.
                let canonical = operand.shape.static_dims()?;
                let stored = relayout_f32(data, &canonical, Layout::NHWC, layout);
                let physical = Layout::permute_shape(&operand.shape, Layout::NHWC, layout);
                self.tensors.insert(
                    idx,
                    Arc::new(CpuTensor::owned(operand.dtype, layout, physical, stored)),
                );
                continue;
            }

            let is_io = graph.inputs().contains(&idx) || graph.outputs().contains(&idx);
            if is_io || operand.shape.is_dynamic() {
                let physical = Self::physical_shape(lowered, idx)?;
                self.tensors.insert(
                    idx,
                    Arc::new(CpuTensor::dynamic(operand.dtype, layout, physical)),
                );
                continue;
            }

            // Static intermediate: claim an arena region over every
            // sequence that touches it.
            let size = operand.shape.num_elements().ok_or(Error::DynamicShape(
                "static operand lost its element count".to_string(),
            ))?;
            let producing = lowered.producing_seq(idx);
            let first = producing
                .and_then(|seq| seq_pos.get(&seq.0).copied())
                .unwrap_or(0);
            let mut live: Vec<usize> = Vec::new();
            if let Some(seq) = producing {
                live.push(seq.0);
            }
            for &user in &operand.uses {
                if let Some(seq) = lowered.seq_of_op(user) {
                    if !live.contains(&seq.0) {
                        live.push(seq.0);
                    }
                }
            }
            claims.push(Claim {
                operand: idx,
                size,
                live,
                first,
            });
            planned.push(idx);
        }

        let plan = planner::plan(&claims, &|a, b| reach[a][b]);
        let arena = Arc::new(RwLock::new(vec![0.0f32; plan.total]));
        for idx in planned {
            let (offset, len) = plan
                .region(idx)
                .ok_or(Error::LoweringInvariant { operand: idx })?;
            let physical = Self::physical_shape(lowered, idx)?;
            let layout = lowered.lowering_info(idx)?.layout;
            let dtype = graph.operand(idx).dtype;
            self.tensors.insert(
                idx,
                Arc::new(CpuTensor::arena(
                    dtype,
                    layout,
                    physical,
                    Arc::clone(&arena),
                    offset,
                    len,
                )),
            );
        }
        Ok(())
    }

    fn gen_kernels(&mut self, lowered: &LoweredGraph) -> Result<FunctionMap> {
        let graph = &lowered.graph;
        let mut map = FunctionMap::new();

        for &seq_idx in &lowered.order {
            let seq = lowered.op_seq(seq_idx);
            // Permute sequences are materialized by the engine itself; they
            // bridge two contexts and belong to neither.
            if seq.backend != self.id || seq.is_permute(graph) {
                continue;
            }
            let resolve = |operand: OperandIndex| -> Result<Arc<dyn Tensor>> {
                self.tensors
                    .get(&operand)
                    .cloned()
                    .ok_or(Error::LoweringInvariant { operand })
            };
            let mut kernels = Vec::with_capacity(seq.operations.len());
            for &op in &seq.operations {
                kernels.push(generator::generate(&self.id, graph, op, &resolve)?);
            }
            map.push((seq_idx, kernels));
        }
        Ok(map)
    }

    fn tensor(&self, operand: OperandIndex) -> Option<Arc<dyn Tensor>> {
        self.tensors.get(&operand).cloned()
    }
}
