use std::sync::{Arc, RwLock};

use vole_core::dtype::{f16_bits_from_f32, f32_from_f16_bits};
use vole_core::{DType, Error, Layout, Result, Shape, Tensor};

// CpuTensor — host-memory tensor backing
//
// Data lives either in the backend's shared arena (static operands placed
// by the memory planner) or in an owned buffer (constants, graph I/O, and
// anything dynamically shaped). All payloads are stored as f32; F16
// operands are narrowed through half precision on write so their values
// round exactly as a true f16 buffer would.

enum Storage {
    /// A planned slice of the backend's shared arena.
    Arena {
        buf: Arc<RwLock<Vec<f32>>>,
        offset: usize,
        len: usize,
    },
    /// A dedicated buffer, resizable between runs.
    Owned(Vec<f32>),
    /// Dynamic tensor awaiting its first resolved shape.
    Unallocated,
}

struct State {
    shape: Shape,
    storage: Storage,
}

pub struct CpuTensor {
    dtype: DType,
    layout: Layout,
    dynamic: bool,
    state: RwLock<State>,
}

impl CpuTensor {
    /// Static tensor backed by a planned arena region.
    pub fn arena(
        dtype: DType,
        layout: Layout,
        shape: Shape,
        buf: Arc<RwLock<Vec<f32>>>,
        offset: usize,
        len: usize,
    ) -> Self {
        CpuTensor {
            dtype,
            layout,
            dynamic: false,
            state: RwLock::new(State {
                shape,
                storage: Storage::Arena { buf, offset, len },
            }),
        }
    }

    /// Tensor with its own buffer, pre-filled with `data`.
    pub fn owned(dtype: DType, layout: Layout, shape: Shape, data: Vec<f32>) -> Self {
        CpuTensor {
            dtype,
            layout,
            dynamic: shape.is_dynamic(),
            state: RwLock::new(State {
                shape,
                storage: Storage::Owned(data),
            }),
        }
    }

    /// Resizable tensor; allocates zeroed storage now if the shape is
    /// already concrete, otherwise on the first `set_shape`.
    pub fn dynamic(dtype: DType, layout: Layout, shape: Shape) -> Self {
        let storage = match shape.num_elements() {
            Some(n) => Storage::Owned(vec![0.0; n]),
            None => Storage::Unallocated,
        };
        CpuTensor {
            dtype,
            layout,
            dynamic: true,
            state: RwLock::new(State {
                shape,
                storage,
            }),
        }
    }

    fn quantize(&self, data: &mut [f32]) {
        if self.dtype == DType::F16 {
            for v in data.iter_mut() {
                *v = f32_from_f16_bits(f16_bits_from_f32(*v));
            }
        }
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::msg("tensor lock poisoned"))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::msg("tensor lock poisoned"))
    }
}

impl Tensor for CpuTensor {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> Shape {
        match self.state.read() {
            Ok(state) => state.shape.clone(),
            Err(poisoned) => poisoned.into_inner().shape.clone(),
        }
    }

    fn layout(&self) -> Layout {
        self.layout
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn set_shape(&self, shape: &Shape) -> Result<()> {
        let mut state = self.lock_write()?;
        if let Some(new_len) = shape.num_elements() {
            let replace = match &mut state.storage {
                // A planned region cannot grow; fall back to a private
                // buffer when a resolved shape outgrows the plan.
                Storage::Arena { len, .. } => new_len != *len,
                Storage::Owned(buf) => {
                    if buf.len() != new_len {
                        *buf = vec![0.0; new_len];
                    }
                    false
                }
                Storage::Unallocated => true,
            };
            if replace {
                state.storage = Storage::Owned(vec![0.0; new_len]);
            }
        }
        state.shape = shape.clone();
        Ok(())
    }

    fn read(&self) -> Result<Vec<f32>> {
        let state = self.lock_read()?;
        match &state.storage {
            Storage::Arena { buf, offset, len } => {
                let arena = buf
                    .read()
                    .map_err(|_| Error::msg("arena lock poisoned"))?;
                Ok(arena[*offset..*offset + *len].to_vec())
            }
            Storage::Owned(data) => Ok(data.clone()),
            Storage::Unallocated => Err(Error::DynamicShape(format!(
                "tensor of shape {} read before its shape was resolved",
                state.shape
            ))),
        }
    }

    fn write(&self, data: &[f32]) -> Result<()> {
        let mut state = self.lock_write()?;
        let expected = state.shape.num_elements().ok_or_else(|| {
            Error::DynamicShape(format!(
                "tensor of shape {} written before its shape was resolved",
                state.shape
            ))
        })?;
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: state.shape.clone(),
                expected,
                got: data.len(),
            });
        }

        let mut incoming = data.to_vec();
        self.quantize(&mut incoming);

        let replace = match &mut state.storage {
            Storage::Arena { buf, offset, len } => {
                if incoming.len() != *len {
                    return Err(Error::msg("planned tensor region size out of sync"));
                }
                let mut arena = buf
                    .write()
                    .map_err(|_| Error::msg("arena lock poisoned"))?;
                arena[*offset..*offset + *len].copy_from_slice(&incoming);
                false
            }
            Storage::Owned(buf) => {
                *buf = std::mem::take(&mut incoming);
                false
            }
            Storage::Unallocated => true,
        };
        if replace {
            state.storage = Storage::Owned(incoming);
        }
        Ok(())
    }
}
