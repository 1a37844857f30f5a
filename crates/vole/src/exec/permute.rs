use std::sync::Arc;

use vole_core::layout::relayout_f32;
use vole_core::{Kernel, Layout, Result, Shape, Tensor};

// Permutation kernel — the engine-provided boundary conversion
//
// Unlike compute kernels, a permutation spans two backend contexts: its
// source tensor belongs to the producer's context and its destination to
// the consumer's, so the plan builder constructs these directly instead of
// asking either backend's generator. With `from == to` it degrades to a
// plain cross-backend copy.

pub struct PermuteKernel {
    src: Arc<dyn Tensor>,
    dst: Arc<dyn Tensor>,
    from: Layout,
    to: Layout,
}

impl PermuteKernel {
    pub fn new(src: Arc<dyn Tensor>, dst: Arc<dyn Tensor>, from: Layout, to: Layout) -> Self {
        PermuteKernel { src, dst, from, to }
    }
}

impl Kernel for PermuteKernel {
    fn configure(&mut self) -> Result<()> {
        let src_dims = self.src.shape().static_dims()?;
        let dst_dims = Layout::permute_dims(&src_dims, self.from, self.to);
        self.dst.set_shape(&Shape::from_static(&dst_dims))
    }

    fn run(&mut self) -> Result<()> {
        let src_dims = self.src.shape().static_dims()?;
        let data = self.src.read()?;
        let converted = relayout_f32(&data, &src_dims, self.from, self.to);
        self.dst.write(&converted)
    }

    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>> {
        (index == 0).then(|| Arc::clone(&self.dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::{DType, Shape};
    use vole_cpu::CpuTensor;

    #[test]
    fn test_nhwc_to_nchw() {
        let canonical: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let src = Arc::new(CpuTensor::owned(
            DType::F32,
            Layout::NHWC,
            Shape::from_static(&[1, 2, 2, 3]),
            canonical.clone(),
        )) as Arc<dyn Tensor>;
        let dst = Arc::new(CpuTensor::dynamic(
            DType::F32,
            Layout::NCHW,
            Shape::from_static(&[1, 3, 2, 2]),
        )) as Arc<dyn Tensor>;

        let mut k = PermuteKernel::new(src, Arc::clone(&dst), Layout::NHWC, Layout::NCHW);
        k.configure().unwrap();
        assert_eq!(dst.shape(), Shape::from_static(&[1, 3, 2, 2]));
        k.run().unwrap();

        let back = relayout_f32(
            &dst.read().unwrap(),
            &[1, 3, 2, 2],
            Layout::NCHW,
            Layout::NHWC,
        );
        assert_eq!(back, canonical);
    }

    #[test]
    fn test_same_layout_is_a_copy() {
        let src = Arc::new(CpuTensor::owned(
            DType::F32,
            Layout::NHWC,
            Shape::from_static(&[3]),
            vec![1.0, 2.0, 3.0],
        )) as Arc<dyn Tensor>;
        let dst = Arc::new(CpuTensor::dynamic(
            DType::F32,
            Layout::NHWC,
            Shape::from_static(&[3]),
        )) as Arc<dyn Tensor>;

        let mut k = PermuteKernel::new(src, Arc::clone(&dst), Layout::NHWC, Layout::NHWC);
        k.configure().unwrap();
        k.run().unwrap();
        assert_eq!(dst.read().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reconfigure_after_source_resize() {
        let src = Arc::new(CpuTensor::dynamic(
            DType::F32,
            Layout::NHWC,
            Shape::from_static(&[1, 2, 2, 3]),
        )) as Arc<dyn Tensor>;
        let dst = Arc::new(CpuTensor::dynamic(
            DType::F32,
            Layout::NCHW,
            Shape::from_static(&[1, 3, 2, 2]),
        )) as Arc<dyn Tensor>;

        let mut k = PermuteKernel::new(Arc::clone(&src), Arc::clone(&dst), Layout::NHWC, Layout::NCHW);
        k.configure().unwrap();

        src.set_shape(&Shape::from_static(&[2, 2, 2, 3])).unwrap();
        k.configure().unwrap();
        assert_eq!(dst.shape(), Shape::from_static(&[2, 3, 2, 2]));
    }
}
