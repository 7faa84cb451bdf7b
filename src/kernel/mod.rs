//! Binary-reduce kernel entry points.
//!
//! This module owns the selector enums, the argument validation performed
//! before any compute work starts, and the device routing in front of the
//! compute engines in [`cpu`] and [`cpu_backward`]. The dtype-erased layer
//! lives in [`dispatch`].

pub mod cpu;
pub mod cpu_backward;
pub mod dispatch;

use crate::array::Array;
use crate::bcast::calc_bcast;
use crate::dtype::Element;
use crate::error::Error;
use crate::graph::GraphCsr;
use crate::Device;
use std::fmt;
use std::str::FromStr;

/// Policy combining the values of a destination's in-edges into one output
/// row. `None` disables cross-edge reduction: every edge gets its own
/// output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reducer {
    Sum,
    Max,
    Min,
    Mean,
    None,
}

impl Reducer {
    pub(crate) fn is_extremum(self) -> bool {
        matches!(self, Reducer::Max | Reducer::Min)
    }
}

impl FromStr for Reducer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "sum" => Ok(Reducer::Sum),
            "max" => Ok(Reducer::Max),
            "min" => Ok(Reducer::Min),
            "mean" => Ok(Reducer::Mean),
            "none" => Ok(Reducer::None),
            other => Err(Error::UnsupportedSelector {
                kind: "reducer",
                value: other.to_string(),
                allowed: r#""sum", "max", "min", "mean", "none""#,
            }),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Sum => "sum",
            Reducer::Max => "max",
            Reducer::Min => "min",
            Reducer::Mean => "mean",
            Reducer::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Elementwise combine operator applied to the two operands of an edge.
///
/// The copy variants are the degenerate single-operand forms used by the
/// `copy_src_reduce`/`copy_edge_reduce` entry points; they are not part of
/// the parseable selector set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mul,
    Add,
    CopyLhs,
    CopyRhs,
}

impl FromStr for BinaryOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "mul" => Ok(BinaryOp::Mul),
            "add" => Ok(BinaryOp::Add),
            other => Err(Error::UnsupportedSelector {
                kind: "binary operator",
                value: other.to_string(),
                allowed: r#""mul", "add""#,
            }),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Mul => "mul",
            BinaryOp::Add => "add",
            BinaryOp::CopyLhs => "copy_lhs",
            BinaryOp::CopyRhs => "copy_rhs",
        };
        write!(f, "{}", name)
    }
}

/// Where an operand's rows come from: source-node, edge, or
/// destination-node feature storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Src,
    Edge,
    Dst,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Target::Src => "src",
            Target::Edge => "edge",
            Target::Dst => "dst",
        };
        write!(f, "{}", name)
    }
}

/// One edge as seen by the inner kernels: source node, forward edge id,
/// destination node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeCtx {
    pub u: usize,
    pub eid: usize,
    pub v: usize,
}

/// Resolves a logical node/edge id to a physical tensor row. An empty
/// mapping means identity numbering.
#[inline]
pub(crate) fn resolve(mapping: &[usize], id: usize) -> usize {
    if mapping.is_empty() {
        id
    } else {
        debug_assert!(id < mapping.len(), "logical id {} outside mapping", id);
        mapping[id]
    }
}

/// Logical row id feeding an operand for the given edge.
#[inline]
pub(crate) fn target_id(tgt: Target, e: &EdgeCtx) -> usize {
    match tgt {
        Target::Src => e.u,
        Target::Edge => e.eid,
        Target::Dst => e.v,
    }
}

#[inline]
pub(crate) fn combine<T: Element>(op: BinaryOp, l: T, r: T) -> T {
    match op {
        BinaryOp::Mul => l * r,
        BinaryOp::Add => l + r,
        BinaryOp::CopyLhs => l,
        BinaryOp::CopyRhs => r,
    }
}

/// Partial derivative of the combined value w.r.t. the left operand.
#[inline]
pub(crate) fn partial_lhs<T: Element>(op: BinaryOp, _l: T, r: T) -> T {
    match op {
        BinaryOp::Mul => r,
        BinaryOp::Add | BinaryOp::CopyLhs => T::one(),
        BinaryOp::CopyRhs => T::zero(),
    }
}

/// Partial derivative of the combined value w.r.t. the right operand.
#[inline]
pub(crate) fn partial_rhs<T: Element>(op: BinaryOp, l: T, _r: T) -> T {
    match op {
        BinaryOp::Mul => l,
        BinaryOp::Add | BinaryOp::CopyRhs => T::one(),
        BinaryOp::CopyLhs => T::zero(),
    }
}

/// Source node of a forward edge id, by binary search over the row offsets.
#[inline]
pub(crate) fn src_of(indptr: &[usize], eid: usize) -> usize {
    indptr.partition_point(|&off| off <= eid) - 1
}

// --- validation ---

fn logical_space(tgt: Target, graph: &GraphCsr<'_>) -> usize {
    match tgt {
        Target::Src | Target::Dst => graph.num_nodes(),
        Target::Edge => graph.num_edges(),
    }
}

/// A mapping array must either be empty (identity: the tensor has exactly
/// one row per logical id) or cover the logical space with in-bounds rows.
fn check_mapping(mapping: &[usize], space: usize, rows: usize) -> Result<(), Error> {
    if mapping.is_empty() {
        if rows != space {
            return Err(Error::ShapeMismatch {
                expected: vec![space],
                actual: vec![rows],
            });
        }
    } else {
        if mapping.len() != space {
            return Err(Error::ShapeMismatch {
                expected: vec![space],
                actual: vec![mapping.len()],
            });
        }
        if let Some(&row) = mapping.iter().find(|&&row| row >= rows) {
            return Err(Error::IndexOutOfBounds {
                index: row,
                size: rows,
            });
        }
    }
    Ok(())
}

fn expect_feature_shape<T: Element>(t: &Array<T>, want: &[usize]) -> Result<(), Error> {
    if t.feature_shape() != want {
        return Err(Error::ShapeMismatch {
            expected: want.to_vec(),
            actual: t.feature_shape().to_vec(),
        });
    }
    Ok(())
}

fn expect_same_shape<T: Element>(t: &Array<T>, reference: &Array<T>) -> Result<(), Error> {
    if t.shape() != reference.shape() {
        return Err(Error::ShapeMismatch {
            expected: reference.shape().to_vec(),
            actual: t.shape().to_vec(),
        });
    }
    Ok(())
}

/// All operands of one kernel call must live on the same device; anything
/// else is a configuration error, not bad input data.
fn unify_device(devices: &[Device]) -> Device {
    let first = devices[0];
    for d in &devices[1..] {
        if *d != first {
            panic!(
                "device mismatch across kernel operands: {:?} vs {:?}",
                first, d
            );
        }
    }
    first
}

// --- generic engine entry points ---

/// Validates and routes one forward binary-reduce call.
///
/// Index handling: mapping arrays and CSR entries are checked against the
/// graph and tensor extents here, before any compute work; the inner
/// kernels use plain slice indexing afterwards, so a violated invariant in
/// release builds panics rather than reading out of bounds.
#[allow(clippy::too_many_arguments)]
pub(crate) fn forward_impl<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    lhs_tgt: Target,
    rhs_tgt: Target,
    lhs_mapping: &[usize],
    rhs_mapping: &[usize],
    lhs: &Array<T>,
    rhs: &Array<T>,
    out_mapping: &[usize],
    out: &mut Array<T>,
) -> Result<(), Error> {
    graph.validate()?;
    let device = unify_device(&[lhs.device(), rhs.device(), out.device()]);
    check_mapping(lhs_mapping, logical_space(lhs_tgt, graph), lhs.rows())?;
    check_mapping(rhs_mapping, logical_space(rhs_tgt, graph), rhs.rows())?;
    let out_space = if reducer == Reducer::None {
        graph.num_edges()
    } else {
        graph.num_nodes()
    };
    check_mapping(out_mapping, out_space, out.rows())?;

    debug_println!(
        "binary_reduce: reducer={} op={} lhs={}({:?}) rhs={}({:?}) out={:?}",
        reducer,
        op,
        lhs_tgt,
        lhs.shape(),
        rhs_tgt,
        rhs.shape(),
        out.shape()
    );

    if lhs.feature_shape() == rhs.feature_shape() {
        expect_feature_shape(out, lhs.feature_shape())?;
        match device {
            Device::Cpu => cpu::binary_reduce(
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                lhs,
                rhs,
                out_mapping,
                out,
            ),
            dev => panic!("unsupported device type: {:?}", dev),
        }
    } else {
        let info = calc_bcast(lhs.feature_shape(), rhs.feature_shape())?;
        expect_feature_shape(out, &info.real_out_shape)?;
        match device {
            // Rank padding without actual broadcasting runs on the flat
            // kernel; all row lengths agree.
            Device::Cpu if info.is_trivial() => cpu::binary_reduce(
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                lhs,
                rhs,
                out_mapping,
                out,
            ),
            Device::Cpu => cpu::binary_reduce_bcast(
                &info,
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                lhs,
                rhs,
                out_mapping,
                out,
            ),
            dev => panic!("unsupported device type: {:?}", dev),
        }
    }
}

/// Validates and routes one backward binary-reduce call. `grad_lhs` /
/// `grad_rhs` select which operand gradients are produced; passing both
/// computes them in a single pass over the graph.
#[allow(clippy::too_many_arguments)]
pub(crate) fn backward_impl<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    lhs_tgt: Target,
    rhs_tgt: Target,
    lhs_mapping: &[usize],
    rhs_mapping: &[usize],
    out_mapping: &[usize],
    lhs: &Array<T>,
    rhs: &Array<T>,
    out: &Array<T>,
    grad_out: &Array<T>,
    grad_lhs: Option<&mut Array<T>>,
    grad_rhs: Option<&mut Array<T>>,
) -> Result<(), Error> {
    graph.validate()?;
    let mut devices = vec![lhs.device(), rhs.device(), out.device(), grad_out.device()];
    if let Some(gl) = grad_lhs.as_deref() {
        devices.push(gl.device());
    }
    if let Some(gr) = grad_rhs.as_deref() {
        devices.push(gr.device());
    }
    let device = unify_device(&devices);

    check_mapping(lhs_mapping, logical_space(lhs_tgt, graph), lhs.rows())?;
    check_mapping(rhs_mapping, logical_space(rhs_tgt, graph), rhs.rows())?;
    let out_space = if reducer == Reducer::None {
        graph.num_edges()
    } else {
        graph.num_nodes()
    };
    check_mapping(out_mapping, out_space, out.rows())?;
    expect_same_shape(grad_out, out)?;
    if let Some(gl) = grad_lhs.as_deref() {
        expect_same_shape(gl, lhs)?;
    }
    if let Some(gr) = grad_rhs.as_deref() {
        expect_same_shape(gr, rhs)?;
    }

    debug_println!(
        "backward_binary_reduce: reducer={} op={} lhs={}({:?}) rhs={}({:?}) wants=({}, {})",
        reducer,
        op,
        lhs_tgt,
        lhs.shape(),
        rhs_tgt,
        rhs.shape(),
        grad_lhs.is_some(),
        grad_rhs.is_some()
    );

    if lhs.feature_shape() == rhs.feature_shape() {
        expect_feature_shape(out, lhs.feature_shape())?;
        match device {
            Device::Cpu => cpu_backward::backward_binary_reduce(
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                out_mapping,
                lhs,
                rhs,
                out,
                grad_out,
                grad_lhs,
                grad_rhs,
            ),
            dev => panic!("unsupported device type: {:?}", dev),
        }
    } else {
        let info = calc_bcast(lhs.feature_shape(), rhs.feature_shape())?;
        expect_feature_shape(out, &info.real_out_shape)?;
        match device {
            Device::Cpu if info.is_trivial() => cpu_backward::backward_binary_reduce(
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                out_mapping,
                lhs,
                rhs,
                out,
                grad_out,
                grad_lhs,
                grad_rhs,
            ),
            Device::Cpu => cpu_backward::backward_binary_reduce_bcast(
                &info,
                reducer,
                op,
                graph,
                lhs_tgt,
                rhs_tgt,
                lhs_mapping,
                rhs_mapping,
                out_mapping,
                lhs,
                rhs,
                out,
                grad_out,
                grad_lhs,
                grad_rhs,
            ),
            dev => panic!("unsupported device type: {:?}", dev),
        }
    }
}

// --- public operation families ---

/// Combines src node data with edge data per edge and reduces per
/// destination.
///
/// If `reducer` is [`Reducer::None`] the output is an edge feature tensor
/// (one row per edge); otherwise it is a node feature tensor with one row
/// per destination node. Mapping arrays translate logical ids to tensor
/// rows and mean identity when empty. The output tensor must be
/// pre-allocated by the caller; the engine never resizes it.
#[allow(clippy::too_many_arguments)]
pub fn src_op_edge_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    edge_mapping: &[usize],
    src_data: &Array<T>,
    edge_data: &Array<T>,
    out_mapping: &[usize],
    out_data: &mut Array<T>,
) -> Result<(), Error> {
    forward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Edge,
        src_mapping,
        edge_mapping,
        src_data,
        edge_data,
        out_mapping,
        out_data,
    )
}

/// Combines src node data with dst node data per edge and reduces per
/// destination. No edge tensor is consumed.
#[allow(clippy::too_many_arguments)]
pub fn src_op_dst_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    dst_mapping: &[usize],
    src_data: &Array<T>,
    dst_data: &Array<T>,
    out_mapping: &[usize],
    out_data: &mut Array<T>,
) -> Result<(), Error> {
    forward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Dst,
        src_mapping,
        dst_mapping,
        src_data,
        dst_data,
        out_mapping,
        out_data,
    )
}

/// Copies src node data along each edge and reduces per destination.
pub fn copy_src_reduce<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    src_data: &Array<T>,
    out_mapping: &[usize],
    out_data: &mut Array<T>,
) -> Result<(), Error> {
    forward_impl(
        reducer,
        BinaryOp::CopyLhs,
        graph,
        Target::Src,
        Target::Src,
        src_mapping,
        src_mapping,
        src_data,
        src_data,
        out_mapping,
        out_data,
    )
}

/// Copies edge data and reduces per destination.
pub fn copy_edge_reduce<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    edge_mapping: &[usize],
    edge_data: &Array<T>,
    out_mapping: &[usize],
    out_data: &mut Array<T>,
) -> Result<(), Error> {
    forward_impl(
        reducer,
        BinaryOp::CopyLhs,
        graph,
        Target::Edge,
        Target::Edge,
        edge_mapping,
        edge_mapping,
        edge_data,
        edge_data,
        out_mapping,
        out_data,
    )
}

/// Backward of [`src_op_edge_reduce`] w.r.t. the src data.
///
/// `out_data` is the saved forward output and `grad_out_data` its incoming
/// gradient; both must have the shape the forward call produced.
#[allow(clippy::too_many_arguments)]
pub fn backward_lhs_src_op_edge_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    edge_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    edge_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_src_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Edge,
        src_mapping,
        edge_mapping,
        out_mapping,
        src_data,
        edge_data,
        out_data,
        grad_out_data,
        Some(grad_src_data),
        None,
    )
}

/// Backward of [`src_op_edge_reduce`] w.r.t. the edge data.
#[allow(clippy::too_many_arguments)]
pub fn backward_rhs_src_op_edge_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    edge_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    edge_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_edge_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Edge,
        src_mapping,
        edge_mapping,
        out_mapping,
        src_data,
        edge_data,
        out_data,
        grad_out_data,
        None,
        Some(grad_edge_data),
    )
}

/// Backward of [`src_op_edge_reduce`] computing both operand gradients in
/// one pass.
#[allow(clippy::too_many_arguments)]
pub fn backward_both_src_op_edge_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    edge_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    edge_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_src_data: &mut Array<T>,
    grad_edge_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Edge,
        src_mapping,
        edge_mapping,
        out_mapping,
        src_data,
        edge_data,
        out_data,
        grad_out_data,
        Some(grad_src_data),
        Some(grad_edge_data),
    )
}

/// Backward of [`src_op_dst_reduce`] w.r.t. the src data.
#[allow(clippy::too_many_arguments)]
pub fn backward_lhs_src_op_dst_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    dst_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    dst_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_src_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Dst,
        src_mapping,
        dst_mapping,
        out_mapping,
        src_data,
        dst_data,
        out_data,
        grad_out_data,
        Some(grad_src_data),
        None,
    )
}

/// Backward of [`src_op_dst_reduce`] w.r.t. the dst data.
#[allow(clippy::too_many_arguments)]
pub fn backward_rhs_src_op_dst_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    dst_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    dst_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_dst_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Dst,
        src_mapping,
        dst_mapping,
        out_mapping,
        src_data,
        dst_data,
        out_data,
        grad_out_data,
        None,
        Some(grad_dst_data),
    )
}

/// Backward of [`src_op_dst_reduce`] computing both operand gradients in
/// one pass.
#[allow(clippy::too_many_arguments)]
pub fn backward_both_src_op_dst_reduce<T: Element>(
    reducer: Reducer,
    op: BinaryOp,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    dst_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    dst_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_src_data: &mut Array<T>,
    grad_dst_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        op,
        graph,
        Target::Src,
        Target::Dst,
        src_mapping,
        dst_mapping,
        out_mapping,
        src_data,
        dst_data,
        out_data,
        grad_out_data,
        Some(grad_src_data),
        Some(grad_dst_data),
    )
}

/// Backward of [`copy_src_reduce`].
#[allow(clippy::too_many_arguments)]
pub fn backward_copy_src_reduce<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    src_mapping: &[usize],
    out_mapping: &[usize],
    src_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_src_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        BinaryOp::CopyLhs,
        graph,
        Target::Src,
        Target::Src,
        src_mapping,
        src_mapping,
        out_mapping,
        src_data,
        src_data,
        out_data,
        grad_out_data,
        Some(grad_src_data),
        None,
    )
}

/// Backward of [`copy_edge_reduce`].
#[allow(clippy::too_many_arguments)]
pub fn backward_copy_edge_reduce<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    edge_mapping: &[usize],
    out_mapping: &[usize],
    edge_data: &Array<T>,
    out_data: &Array<T>,
    grad_out_data: &Array<T>,
    grad_edge_data: &mut Array<T>,
) -> Result<(), Error> {
    backward_impl(
        reducer,
        BinaryOp::CopyLhs,
        graph,
        Target::Edge,
        Target::Edge,
        edge_mapping,
        edge_mapping,
        out_mapping,
        edge_data,
        edge_data,
        out_data,
        grad_out_data,
        Some(grad_edge_data),
        None,
    )
}
