//! CPU backward engine.
//!
//! Gradients flow back through two stages: the per-destination reduction
//! (identity partials for sum, 1/degree for mean, a single winning edge for
//! max/min, per-edge passthrough for none) and the per-edge combine (the
//! usual product-rule partials). Instead of materializing argmax state in
//! the forward pass, the winning edge of each output element is re-derived
//! here by replaying the combine against the saved forward output; ties
//! resolve to the lowest forward edge id, matching the forward fold order.
//!
//! Each operand gradient is scattered over the traversal in which its rows
//! are exclusively owned (sources, destinations, or edges), which keeps the
//! rayon sweeps free of atomics. Non-identity mappings may alias rows and
//! take a zero-fill-then-serial path.

use rayon::prelude::*;

use super::{
    combine, partial_lhs, partial_rhs, resolve, src_of, target_id, BinaryOp, EdgeCtx, Reducer,
    Target,
};
use crate::array::Array;
use crate::bcast::{bcast_offsets, BcastInfo};
use crate::dtype::Element;
use crate::error::Error;
use crate::graph::GraphCsr;

const NO_WINNER: usize = usize::MAX;

#[allow(clippy::too_many_arguments)]
pub(crate) fn backward_binary_reduce<T: Element>(
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
    let row_len = out.row_len();
    if out.size() == 0 || row_len == 0 {
        zero_requested(grad_lhs, grad_rhs);
        return Ok(());
    }
    let lhs_buf = lhs.as_slice();
    let rhs_buf = rhs.as_slice();
    let lhs_at =
        |e: &EdgeCtx, k: usize| lhs_buf[resolve(lhs_mapping, target_id(lhs_tgt, e)) * row_len + k];
    let rhs_at =
        |e: &EdgeCtx, k: usize| rhs_buf[resolve(rhs_mapping, target_id(rhs_tgt, e)) * row_len + k];
    let value = |e: &EdgeCtx, k: usize| combine(op, lhs_at(e, k), rhs_at(e, k));

    let winners = derive_winners(reducer, graph, out_mapping, row_len, out.as_slice(), &value);
    let grad_out_buf = grad_out.as_slice();
    let grad_elem = make_grad_elem(reducer, graph, out_mapping, row_len, grad_out_buf, &winners);

    if let Some(grad) = grad_lhs {
        let add_into = |e: &EdgeCtx, row: &mut [T]| {
            for (k, acc) in row.iter_mut().enumerate() {
                let p = partial_lhs(op, lhs_at(e, k), rhs_at(e, k));
                *acc = *acc + grad_elem(e, k) * p;
            }
        };
        scatter_grad(lhs_tgt, graph, lhs_mapping, row_len, grad.as_slice_mut(), &add_into);
    }
    if let Some(grad) = grad_rhs {
        let add_into = |e: &EdgeCtx, row: &mut [T]| {
            for (k, acc) in row.iter_mut().enumerate() {
                let p = partial_rhs(op, lhs_at(e, k), rhs_at(e, k));
                *acc = *acc + grad_elem(e, k) * p;
            }
        };
        scatter_grad(rhs_tgt, graph, rhs_mapping, row_len, grad.as_slice_mut(), &add_into);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn backward_binary_reduce_bcast<T: Element>(
    info: &BcastInfo,
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
    let out_len = info.out_len();
    if out.size() == 0 || out_len == 0 {
        zero_requested(grad_lhs, grad_rhs);
        return Ok(());
    }
    let lhs_len = info.lhs_len();
    let rhs_len = info.rhs_len();
    let lhs_buf = lhs.as_slice();
    let rhs_buf = rhs.as_slice();
    let lhs_at = |e: &EdgeCtx, lo: usize| {
        lhs_buf[resolve(lhs_mapping, target_id(lhs_tgt, e)) * lhs_len + lo]
    };
    let rhs_at = |e: &EdgeCtx, ro: usize| {
        rhs_buf[resolve(rhs_mapping, target_id(rhs_tgt, e)) * rhs_len + ro]
    };
    let value = |e: &EdgeCtx, k: usize| {
        let (lo, ro) = bcast_offsets(info, k);
        combine(op, lhs_at(e, lo), rhs_at(e, ro))
    };

    let winners = derive_winners(reducer, graph, out_mapping, out_len, out.as_slice(), &value);
    let grad_out_buf = grad_out.as_slice();
    let grad_elem = make_grad_elem(reducer, graph, out_mapping, out_len, grad_out_buf, &winners);

    // Gradients of broadcast (stride-0) dimensions accumulate over every
    // output position that read the same operand element.
    if let Some(grad) = grad_lhs {
        let add_into = |e: &EdgeCtx, row: &mut [T]| {
            for k in 0..out_len {
                let (lo, ro) = bcast_offsets(info, k);
                let p = partial_lhs(op, lhs_at(e, lo), rhs_at(e, ro));
                row[lo] = row[lo] + grad_elem(e, k) * p;
            }
        };
        scatter_grad(lhs_tgt, graph, lhs_mapping, lhs_len, grad.as_slice_mut(), &add_into);
    }
    if let Some(grad) = grad_rhs {
        let add_into = |e: &EdgeCtx, row: &mut [T]| {
            for k in 0..out_len {
                let (lo, ro) = bcast_offsets(info, k);
                let p = partial_rhs(op, lhs_at(e, lo), rhs_at(e, ro));
                row[ro] = row[ro] + grad_elem(e, k) * p;
            }
        };
        scatter_grad(rhs_tgt, graph, rhs_mapping, rhs_len, grad.as_slice_mut(), &add_into);
    }
    Ok(())
}

fn zero_requested<T: Element>(grad_lhs: Option<&mut Array<T>>, grad_rhs: Option<&mut Array<T>>) {
    if let Some(g) = grad_lhs {
        g.as_slice_mut().fill(T::zero());
    }
    if let Some(g) = grad_rhs {
        g.as_slice_mut().fill(T::zero());
    }
}

/// For max/min, finds the forward edge id whose combined value produced each
/// output element, keeping the lowest id on ties. Empty for other reducers.
fn derive_winners<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    out_mapping: &[usize],
    out_len: usize,
    out: &[T],
    value: &(impl Fn(&EdgeCtx, usize) -> T + Sync),
) -> Vec<usize> {
    if !reducer.is_extremum() {
        return Vec::new();
    }
    let mut winners = vec![NO_WINNER; graph.num_nodes() * out_len];
    winners
        .par_chunks_mut(out_len)
        .enumerate()
        .for_each(|(v, row)| {
            let base = resolve(out_mapping, v) * out_len;
            for slot in graph.rev_indptr[v]..graph.rev_indptr[v + 1] {
                let e = EdgeCtx {
                    u: graph.rev_indices[slot],
                    eid: graph.rev_edge_id(slot),
                    v,
                };
                for (k, win) in row.iter_mut().enumerate() {
                    if value(&e, k) == out[base + k] && e.eid < *win {
                        *win = e.eid;
                    }
                }
            }
        });
    winners
}

/// Gradient reaching one edge's combined value at one feature position,
/// after undoing the reduction stage.
fn make_grad_elem<'s, T: Element>(
    reducer: Reducer,
    graph: &'s GraphCsr<'s>,
    out_mapping: &'s [usize],
    out_len: usize,
    grad_out: &'s [T],
    winners: &'s [usize],
) -> impl Fn(&EdgeCtx, usize) -> T + Sync + 's {
    move |e: &EdgeCtx, k: usize| match reducer {
        Reducer::None => grad_out[resolve(out_mapping, e.eid) * out_len + k],
        Reducer::Sum => grad_out[resolve(out_mapping, e.v) * out_len + k],
        Reducer::Mean => grad_out[resolve(out_mapping, e.v) * out_len + k]
            .div_degree(graph.in_degree(e.v)),
        Reducer::Max | Reducer::Min => {
            if winners[e.v * out_len + k] == e.eid {
                grad_out[resolve(out_mapping, e.v) * out_len + k]
            } else {
                T::zero()
            }
        }
    }
}

/// Accumulates per-edge gradient contributions into the operand tensor,
/// walking the traversal in which the target's rows are disjoint: forward
/// rows for src operands, reverse rows for dst operands, single edges for
/// edge operands. The buffer is fully overwritten.
fn scatter_grad<T: Element>(
    tgt: Target,
    graph: &GraphCsr<'_>,
    mapping: &[usize],
    row_len: usize,
    grad: &mut [T],
    add_into: &(impl Fn(&EdgeCtx, &mut [T]) + Sync),
) {
    if mapping.is_empty() {
        match tgt {
            Target::Src => {
                grad.par_chunks_mut(row_len).enumerate().for_each(|(u, row)| {
                    row.fill(T::zero());
                    for eid in graph.indptr[u]..graph.indptr[u + 1] {
                        let e = EdgeCtx {
                            u,
                            eid,
                            v: graph.indices[eid],
                        };
                        add_into(&e, row);
                    }
                });
            }
            Target::Dst => {
                grad.par_chunks_mut(row_len).enumerate().for_each(|(v, row)| {
                    row.fill(T::zero());
                    for slot in graph.rev_indptr[v]..graph.rev_indptr[v + 1] {
                        let e = EdgeCtx {
                            u: graph.rev_indices[slot],
                            eid: graph.rev_edge_id(slot),
                            v,
                        };
                        add_into(&e, row);
                    }
                });
            }
            Target::Edge => {
                grad.par_chunks_mut(row_len)
                    .enumerate()
                    .for_each(|(eid, row)| {
                        row.fill(T::zero());
                        let e = EdgeCtx {
                            u: src_of(graph.indptr, eid),
                            eid,
                            v: graph.indices[eid],
                        };
                        add_into(&e, row);
                    });
            }
        }
    } else {
        // Mapped rows may be shared between logical ids.
        grad.fill(T::zero());
        for u in 0..graph.num_nodes() {
            for eid in graph.indptr[u]..graph.indptr[u + 1] {
                let e = EdgeCtx {
                    u,
                    eid,
                    v: graph.indices[eid],
                };
                let base = mapping[target_id(tgt, &e)] * row_len;
                add_into(&e, &mut grad[base..base + row_len]);
            }
        }
    }
}
