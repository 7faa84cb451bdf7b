//! CPU forward engine.
//!
//! The two entry points share one skeleton: build a closure producing the
//! combined value of an edge at a feature position, then sweep either the
//! destinations (reducing over each one's in-edges) or the edges (no
//! reduction). With an identity output mapping every output row is owned by
//! exactly one sweep iteration, so the sweeps parallelize over rows with
//! rayon; a caller-supplied mapping may alias rows and falls back to a
//! serial pass.

use rayon::prelude::*;

use super::{combine, resolve, src_of, target_id, BinaryOp, EdgeCtx, Reducer, Target};
use crate::array::Array;
use crate::bcast::{bcast_offsets, BcastInfo};
use crate::dtype::Element;
use crate::error::Error;
use crate::graph::GraphCsr;

#[allow(clippy::too_many_arguments)]
pub(crate) fn binary_reduce<T: Element>(
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
    let row_len = out.row_len();
    if out.size() == 0 || row_len == 0 {
        return Ok(());
    }
    let lhs_buf = lhs.as_slice();
    let rhs_buf = rhs.as_slice();
    let value = |e: &EdgeCtx, k: usize| {
        let l = lhs_buf[resolve(lhs_mapping, target_id(lhs_tgt, e)) * row_len + k];
        let r = rhs_buf[resolve(rhs_mapping, target_id(rhs_tgt, e)) * row_len + k];
        combine(op, l, r)
    };
    run_sweep(reducer, graph, out_mapping, row_len, out.as_slice_mut(), &value);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn binary_reduce_bcast<T: Element>(
    info: &BcastInfo,
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
    let row_len = info.out_len();
    if out.size() == 0 || row_len == 0 {
        return Ok(());
    }
    let lhs_len = info.lhs_len();
    let rhs_len = info.rhs_len();
    let lhs_buf = lhs.as_slice();
    let rhs_buf = rhs.as_slice();
    let value = |e: &EdgeCtx, k: usize| {
        let (lo, ro) = bcast_offsets(info, k);
        let l = lhs_buf[resolve(lhs_mapping, target_id(lhs_tgt, e)) * lhs_len + lo];
        let r = rhs_buf[resolve(rhs_mapping, target_id(rhs_tgt, e)) * rhs_len + ro];
        combine(op, l, r)
    };
    run_sweep(reducer, graph, out_mapping, row_len, out.as_slice_mut(), &value);
    Ok(())
}

fn run_sweep<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    out_mapping: &[usize],
    row_len: usize,
    out: &mut [T],
    value: &(impl Fn(&EdgeCtx, usize) -> T + Sync),
) {
    match reducer {
        Reducer::None => edge_sweep(graph, out_mapping, row_len, out, value),
        _ => dst_sweep(reducer, graph, out_mapping, row_len, out, value),
    }
}

/// One output row per destination node, folded over its in-edges.
fn dst_sweep<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    out_mapping: &[usize],
    row_len: usize,
    out: &mut [T],
    value: &(impl Fn(&EdgeCtx, usize) -> T + Sync),
) {
    if out_mapping.is_empty() {
        out.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(v, row)| fold_row(reducer, graph, v, row, value));
    } else {
        for v in 0..graph.num_nodes() {
            let base = out_mapping[v] * row_len;
            fold_row(reducer, graph, v, &mut out[base..base + row_len], value);
        }
    }
}

/// One output row per edge; no cross-edge reduction.
fn edge_sweep<T: Element>(
    graph: &GraphCsr<'_>,
    out_mapping: &[usize],
    row_len: usize,
    out: &mut [T],
    value: &(impl Fn(&EdgeCtx, usize) -> T + Sync),
) {
    if out_mapping.is_empty() {
        out.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(eid, row)| {
                let e = EdgeCtx {
                    u: src_of(graph.indptr, eid),
                    eid,
                    v: graph.indices[eid],
                };
                for (k, slot) in row.iter_mut().enumerate() {
                    *slot = value(&e, k);
                }
            });
    } else {
        for u in 0..graph.num_nodes() {
            for eid in graph.indptr[u]..graph.indptr[u + 1] {
                let e = EdgeCtx {
                    u,
                    eid,
                    v: graph.indices[eid],
                };
                let base = out_mapping[eid] * row_len;
                for k in 0..row_len {
                    out[base + k] = value(&e, k);
                }
            }
        }
    }
}

/// Reduces all in-edges of `v` into one output row. Destinations with no
/// in-edges produce zeros under sum/mean and leave the row untouched under
/// max/min.
fn fold_row<T: Element>(
    reducer: Reducer,
    graph: &GraphCsr<'_>,
    v: usize,
    row: &mut [T],
    value: &impl Fn(&EdgeCtx, usize) -> T,
) {
    let start = graph.rev_indptr[v];
    let end = graph.rev_indptr[v + 1];
    match reducer {
        Reducer::Sum | Reducer::Mean => {
            row.fill(T::zero());
            for slot in start..end {
                let e = EdgeCtx {
                    u: graph.rev_indices[slot],
                    eid: graph.rev_edge_id(slot),
                    v,
                };
                for (k, acc) in row.iter_mut().enumerate() {
                    *acc = *acc + value(&e, k);
                }
            }
            let degree = end - start;
            if reducer == Reducer::Mean && degree > 0 {
                for acc in row.iter_mut() {
                    *acc = acc.div_degree(degree);
                }
            }
        }
        Reducer::Max | Reducer::Min => {
            for slot in start..end {
                let e = EdgeCtx {
                    u: graph.rev_indices[slot],
                    eid: graph.rev_edge_id(slot),
                    v,
                };
                if slot == start {
                    for (k, acc) in row.iter_mut().enumerate() {
                        *acc = value(&e, k);
                    }
                } else {
                    for (k, acc) in row.iter_mut().enumerate() {
                        let cand = value(&e, k);
                        if improves(reducer, cand, *acc) {
                            *acc = cand;
                        }
                    }
                }
            }
        }
        Reducer::None => unreachable!("edge-wise output is handled by edge_sweep"),
    }
}

/// Strict comparison, so under the in-increasing-edge-id reverse traversal
/// the earliest (lowest-id) edge keeps a tied extremum.
#[inline]
pub(crate) fn improves<T: Element>(reducer: Reducer, cand: T, cur: T) -> bool {
    match reducer {
        Reducer::Max => cand > cur,
        Reducer::Min => cand < cur,
        _ => false,
    }
}
