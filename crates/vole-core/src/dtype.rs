use std::fmt;

use half::f16;

/// Element type of a tensor operand.
///
/// Host-side access always goes through `f32` (see [`crate::Tensor`]);
/// `F16` payloads are widened on read and narrowed on write. Integer types
/// exist in the data model so backends can claim quantized kernels via
/// [`crate::Backend::supports`], but the reference CPU backend computes in
/// `F32` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    F32,
    I32,
    U8,
}

impl DType {
    /// Size of a single element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::U8 => "u8",
        };
        write!(f, "{s}")
    }
}

/// Widen an `f16` bit pattern to `f32` (host access to F16 payloads).
pub fn f32_from_f16_bits(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// Narrow an `f32` to an `f16` bit pattern.
pub fn f16_bits_from_f32(v: f32) -> u16 {
    f16::from_f32(v).to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::I32.size_in_bytes(), 4);
        assert_eq!(DType::U8.size_in_bytes(), 1);
    }

    #[test]
    fn test_f16_round_trip() {
        let bits = f16_bits_from_f32(1.5);
        assert_eq!(f32_from_f16_bits(bits), 1.5);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", DType::F32), "f32");
    }
}
