//! Dtype-erased kernel calls.
//!
//! The typed entry points in [`super`] require the caller to know the
//! element type at compile time. Callers holding runtime-tagged
//! [`FeatureTensor`] values go through this layer instead: the output
//! tensor's dtype tag selects one of the four fixed instantiations, and
//! every other operand is required to carry the same tag. A mismatched tag
//! is a caller bug and panics rather than returning an error.

use super::{backward_impl, forward_impl, BinaryOp, Reducer, Target};
use crate::array::{Array, FeatureTensor, TypedFeature};
use crate::dtype::DType;
use crate::error::Error;
use crate::graph::GraphCsr;

fn unpack<'a, T: TypedFeature>(role: &str, tensor: &'a FeatureTensor) -> &'a Array<T> {
    match T::unpack(tensor) {
        Some(a) => a,
        None => panic!(
            "dtype mismatch in kernel call: {} tensor is {}, expected {}",
            role,
            tensor.dtype(),
            T::DTYPE
        ),
    }
}

fn unpack_mut<'a, T: TypedFeature>(role: &str, tensor: &'a mut FeatureTensor) -> &'a mut Array<T> {
    let dtype = tensor.dtype();
    match T::unpack_mut(tensor) {
        Some(a) => a,
        None => panic!(
            "dtype mismatch in kernel call: {} tensor is {}, expected {}",
            role,
            dtype,
            T::DTYPE
        ),
    }
}

/// Dtype-erased forward binary reduce.
#[allow(clippy::too_many_arguments)]
pub fn binary_reduce(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    lhs_tgt: Target,
    rhs_tgt: Target,
    lhs_mapping: &[usize],
    rhs_mapping: &[usize],
    lhs_data: &FeatureTensor,
    rhs_data: &FeatureTensor,
    out_mapping: &[usize],
    out_data: &mut FeatureTensor,
) -> Result<(), Error> {
    #[allow(clippy::too_many_arguments)]
    fn run<T: TypedFeature>(
        reducer: Reducer,
        op: BinaryOp,
        graph: &GraphCsr<'_>,
        lhs_tgt: Target,
        rhs_tgt: Target,
        lhs_mapping: &[usize],
        rhs_mapping: &[usize],
        lhs_data: &FeatureTensor,
        rhs_data: &FeatureTensor,
        out_mapping: &[usize],
        out_data: &mut FeatureTensor,
    ) -> Result<(), Error> {
        forward_impl(
            reducer,
            op,
            graph,
            lhs_tgt,
            rhs_tgt,
            lhs_mapping,
            rhs_mapping,
            unpack::<T>("lhs", lhs_data),
            unpack::<T>("rhs", rhs_data),
            out_mapping,
            unpack_mut::<T>("out", out_data),
        )
    }

    match out_data.dtype() {
        DType::Float32 => run::<f32>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, lhs_data, rhs_data,
            out_mapping, out_data,
        ),
        DType::Float64 => run::<f64>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, lhs_data, rhs_data,
            out_mapping, out_data,
        ),
        DType::Int32 => run::<i32>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, lhs_data, rhs_data,
            out_mapping, out_data,
        ),
        DType::Int64 => run::<i64>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, lhs_data, rhs_data,
            out_mapping, out_data,
        ),
    }
}

/// Dtype-erased backward binary reduce. `grad_lhs_data` / `grad_rhs_data`
/// select which operand gradients are produced.
#[allow(clippy::too_many_arguments)]
pub fn backward_binary_reduce(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    lhs_tgt: Target,
    rhs_tgt: Target,
    lhs_mapping: &[usize],
    rhs_mapping: &[usize],
    out_mapping: &[usize],
    lhs_data: &FeatureTensor,
    rhs_data: &FeatureTensor,
    out_data: &FeatureTensor,
    grad_out_data: &FeatureTensor,
    grad_lhs_data: Option<&mut FeatureTensor>,
    grad_rhs_data: Option<&mut FeatureTensor>,
) -> Result<(), Error> {
    #[allow(clippy::too_many_arguments)]
    fn run<T: TypedFeature>(
        reducer: Reducer,
        op: BinaryOp,
        graph: &GraphCsr<'_>,
        lhs_tgt: Target,
        rhs_tgt: Target,
        lhs_mapping: &[usize],
        rhs_mapping: &[usize],
        out_mapping: &[usize],
        lhs_data: &FeatureTensor,
        rhs_data: &FeatureTensor,
        out_data: &FeatureTensor,
        grad_out_data: &FeatureTensor,
        grad_lhs_data: Option<&mut FeatureTensor>,
        grad_rhs_data: Option<&mut FeatureTensor>,
    ) -> Result<(), Error> {
        backward_impl(
            reducer,
            op,
            graph,
            lhs_tgt,
            rhs_tgt,
            lhs_mapping,
            rhs_mapping,
            out_mapping,
            unpack::<T>("lhs", lhs_data),
            unpack::<T>("rhs", rhs_data),
            unpack::<T>("out", out_data),
            unpack::<T>("grad_out", grad_out_data),
            grad_lhs_data.map(|t| unpack_mut::<T>("grad_lhs", t)),
            grad_rhs_data.map(|t| unpack_mut::<T>("grad_rhs", t)),
        )
    }

    match out_data.dtype() {
        DType::Float32 => run::<f32>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, out_mapping, lhs_data,
            rhs_data, out_data, grad_out_data, grad_lhs_data, grad_rhs_data,
        ),
        DType::Float64 => run::<f64>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, out_mapping, lhs_data,
            rhs_data, out_data, grad_out_data, grad_lhs_data, grad_rhs_data,
        ),
        DType::Int32 => run::<i32>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, out_mapping, lhs_data,
            rhs_data, out_data, grad_out_data, grad_lhs_data, grad_rhs_data,
        ),
        DType::Int64 => run::<i64>(
            reducer, op, graph, lhs_tgt, rhs_tgt, lhs_mapping, rhs_mapping, out_mapping, lhs_data,
            rhs_data, out_data, grad_out_data, grad_lhs_data, grad_rhs_data,
        ),
    }
}
