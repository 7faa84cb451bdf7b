//! Graph message-passing kernels with broadcasting and autograd support
//!
//! This library implements the compute core of graph neural network message
//! passing: for every edge of a sparse graph, combine a feature row from each
//! of two operands (source node, destination node, or the edge itself) with a
//! binary operator, then reduce the per-edge results into one row per
//! destination node. It provides:
//! - Forward kernels for `src op edge`, `src op dst`, `copy src`, `copy edge`
//! - Sum / max / min / mean reducers, plus a no-reduction edge-wise mode
//! - NumPy-style broadcasting between operand feature shapes
//! - Matching backward kernels producing operand gradients
//! - A dtype-erased dispatch layer over `f32`/`f64`/`i32`/`i64` tensors
//!
//! # Features
//! - `debug_logs` - Enables verbose kernel-entry logging to stdout
//!
//! # Example
//! ```rust
//! use graph_kernel_lib::{kernel, Array, CsrGraph, Reducer};
//!
//! fn main() -> Result<(), graph_kernel_lib::Error> {
//!     // Two edges feeding node 2: 0 -> 2 and 1 -> 2.
//!     let graph = CsrGraph::from_edges(3, &[(0, 2), (1, 2)])?;
//!     let src = Array::<f32>::from_vec(vec![1.0, 2.0, 3.0], &[3])?;
//!     let mut out = Array::<f32>::zeros(&[3]);
//!
//!     // Sum each node's in-neighbor features.
//!     kernel::copy_src_reduce(Reducer::Sum, &graph.view(), &[], &src, &[], &mut out)?;
//!     assert_eq!(out.as_slice(), &[0.0, 0.0, 3.0]);
//!     Ok(())
//! }
//! ```

// --- Central debug_println macro definition ---
/// Conditional logging macro. Prints if 'debug_logs' feature is enabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        ::std::println!("[DEBUG {}] {}", module_path!(), ::std::format_args!($($arg)*))
    };
}

/// Conditional logging macro (disabled version). Does nothing.
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

// Declare the modules within the crate
pub mod array;
pub mod bcast;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod kernel;

pub mod test_utils;

/// Represents the device where a tensor's data resides.
///
/// Only [`Device::Cpu`] has a compute engine; routing a kernel call to any
/// other device panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device
    Cpu,
    /// CUDA GPU device with a specific device ID
    Cuda(u32),
}

// Re-export the public types for easier use by consumers of the library
pub use array::{Array, FeatureTensor, TypedFeature};
pub use bcast::{infer_feature_shape, BcastInfo, MAX_BCAST_NDIM};
pub use dtype::{DType, Element};
pub use error::Error;
pub use graph::{CsrGraph, GraphCsr};
pub use kernel::{BinaryOp, Reducer, Target};
