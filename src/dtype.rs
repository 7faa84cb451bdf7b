//! The closed set of numeric element types the kernels are instantiated for.

use std::fmt;
use std::ops::{Add, Mul};

/// Runtime tag for the four supported numeric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float32,
    Float64,
    Int32,
    Int64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
        };
        write!(f, "{}", name)
    }
}

/// Element type of a feature tensor.
///
/// The kernel engine is generic over this trait but the set of implementors
/// is fixed: `f32`, `f64`, `i32`, `i64`. The dispatch layer expands a
/// dtype-erased call into exactly these four instantiations.
pub trait Element:
    Copy
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Mul<Output = Self>
{
    const DTYPE: DType;

    fn zero() -> Self;
    fn one() -> Self;

    /// Divides by an in-degree. Truncating for the integer types.
    fn div_degree(self, degree: usize) -> Self;

    /// Lossy conversion used by the gradient checker and test helpers.
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $dtype:expr, $zero:expr, $one:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                $zero
            }

            #[inline]
            fn one() -> Self {
                $one
            }

            #[inline]
            fn div_degree(self, degree: usize) -> Self {
                self / (degree as $t)
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_element!(f32, DType::Float32, 0.0, 1.0);
impl_element!(f64, DType::Float64, 0.0, 1.0);
impl_element!(i32, DType::Int32, 0, 1);
impl_element!(i64, DType::Int64, 0, 1);
