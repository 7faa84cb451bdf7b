// tests/kernel_backward_tests.rs
use graph_kernel_lib::graph::CsrGraph;
use graph_kernel_lib::kernel::{
    backward_both_src_op_edge_reduce, backward_copy_edge_reduce, backward_copy_src_reduce,
    backward_lhs_src_op_dst_reduce, backward_lhs_src_op_edge_reduce,
    backward_rhs_src_op_edge_reduce, copy_src_reduce, src_op_edge_reduce, BinaryOp, Reducer,
};
use graph_kernel_lib::test_utils::assert_allclose;
use graph_kernel_lib::Array;

// 4 nodes, 5 edges in CSR order:
//   e0: 0 -> 2, e1: 0 -> 3, e2: 1 -> 1, e3: 1 -> 2, e4: 2 -> 3
fn fixture() -> CsrGraph {
    CsrGraph::from_edges(4, &[(0, 2), (0, 3), (1, 1), (1, 2), (2, 3)]).unwrap()
}

fn node_x() -> Array<f64> {
    Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4]).unwrap()
}

fn edge_w() -> Array<f64> {
    Array::from_vec(vec![10.0, 20.0, 30.0, 40.0, 50.0], &[5]).unwrap()
}

#[test]
fn test_copy_src_sum_backward() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap();

    let grad_out = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4]).unwrap();
    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_copy_src_reduce(Reducer::Sum, &g.view(), &[], &[], &x, &out, &grad_out, &mut grad_x)
        .unwrap();
    // grad_x[u] sums grad_out over u's out-neighbors:
    // node 0 -> {2, 3}; node 1 -> {1, 2}; node 2 -> {3}; node 3 -> {}.
    assert_eq!(grad_x.as_slice(), &[7.0, 5.0, 4.0, 0.0]);
}

#[test]
fn test_src_mul_edge_sum_backward_lhs_and_rhs() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[4]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();

    let grad_out = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4]).unwrap();

    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_lhs_src_op_edge_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_x,
    )
    .unwrap();
    // grad_x[u] = sum over edges u->v of w[e] * grad_out[v]:
    // node 0: 10*3 + 20*4; node 1: 30*2 + 40*3; node 2: 50*4.
    assert_eq!(grad_x.as_slice(), &[110.0, 180.0, 200.0, 0.0]);

    let mut grad_w = Array::<f64>::zeros(&[5]);
    backward_rhs_src_op_edge_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_w,
    )
    .unwrap();
    // grad_w[e] = x[u] * grad_out[v] per edge.
    assert_eq!(grad_w.as_slice(), &[3.0, 4.0, 4.0, 6.0, 12.0]);
}

#[test]
fn test_both_matches_separate_passes() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[4]);
    src_op_edge_reduce(Reducer::Mean, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();

    let grad_out = Array::from_vec(vec![0.5, -1.0, 2.0, 1.5], &[4]).unwrap();
    let mut grad_x_both = Array::<f64>::zeros(&[4]);
    let mut grad_w_both = Array::<f64>::zeros(&[5]);
    backward_both_src_op_edge_reduce(
        Reducer::Mean,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_x_both,
        &mut grad_w_both,
    )
    .unwrap();

    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_lhs_src_op_edge_reduce(
        Reducer::Mean,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_x,
    )
    .unwrap();
    let mut grad_w = Array::<f64>::zeros(&[5]);
    backward_rhs_src_op_edge_reduce(
        Reducer::Mean,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_w,
    )
    .unwrap();

    assert_allclose(&grad_x_both, &grad_x, 1e-12);
    assert_allclose(&grad_w_both, &grad_w, 1e-12);
}

#[test]
fn test_mean_backward_scales_by_in_degree() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Mean, &g.view(), &[], &x, &[], &mut out).unwrap();

    let grad_out = Array::<f64>::ones(&[4]);
    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_copy_src_reduce(Reducer::Mean, &g.view(), &[], &[], &x, &out, &grad_out, &mut grad_x)
        .unwrap();
    // Each edge carries 1/in_degree(v): node 0 feeds nodes 2 and 3 (both
    // degree 2), node 1 feeds node 1 (degree 1) and node 2, node 2 feeds
    // node 3.
    assert_eq!(grad_x.as_slice(), &[1.0, 1.5, 0.5, 0.0]);
}

#[test]
fn test_max_backward_routes_to_single_edge() {
    let g = fixture();
    let w = edge_w();
    let mut out = Array::from_vec(vec![0.0; 4], &[4]).unwrap();
    graph_kernel_lib::kernel::copy_edge_reduce(Reducer::Max, &g.view(), &[], &w, &[], &mut out)
        .unwrap();
    assert_eq!(out.as_slice(), &[0.0, 30.0, 40.0, 50.0]);

    let grad_out = Array::from_vec(vec![9.0, 1.0, 2.0, 3.0], &[4]).unwrap();
    let mut grad_w = Array::<f64>::zeros(&[5]);
    backward_copy_edge_reduce(Reducer::Max, &g.view(), &[], &[], &w, &out, &grad_out, &mut grad_w)
        .unwrap();
    // Winners: node 1 -> e2, node 2 -> e3 (40 beats 10), node 3 -> e4.
    assert_eq!(grad_w.as_slice(), &[0.0, 0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_max_backward_tie_goes_to_lowest_edge_id() {
    // Both in-edges of node 2 see the same value; the gradient must go to
    // e0 alone, not be split or doubled.
    let g = fixture();
    let x = Array::from_vec(vec![5.0, 5.0, 5.0, 5.0], &[4]).unwrap();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Max, &g.view(), &[], &x, &[], &mut out).unwrap();
    assert_eq!(out.as_slice(), &[0.0, 5.0, 5.0, 5.0]);

    let grad_out = Array::<f64>::ones(&[4]);
    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_copy_src_reduce(Reducer::Max, &g.view(), &[], &[], &x, &out, &grad_out, &mut grad_x)
        .unwrap();
    // Winners: node 1 -> e2 (src 1), node 2 -> e0 (src 0), node 3 -> e1
    // (src 0). Total gradient mass equals the number of reduced outputs.
    assert_eq!(grad_x.as_slice(), &[2.0, 1.0, 0.0, 0.0]);
    let total: f64 = grad_x.as_slice().iter().sum();
    assert_eq!(total, 3.0);
}

#[test]
fn test_none_backward_is_per_edge_passthrough() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[5]);
    src_op_edge_reduce(Reducer::None, BinaryOp::Add, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();

    let grad_out = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], &[5]).unwrap();
    let mut grad_x = Array::<f64>::zeros(&[4]);
    backward_lhs_src_op_edge_reduce(
        Reducer::None,
        BinaryOp::Add,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_x,
    )
    .unwrap();
    // grad_x[u] sums grad_out over u's edges: node 0: e0+e1, node 1: e2+e3,
    // node 2: e4.
    assert_eq!(grad_x.as_slice(), &[3.0, 7.0, 5.0, 0.0]);

    let mut grad_w = Array::<f64>::zeros(&[5]);
    backward_rhs_src_op_edge_reduce(
        Reducer::None,
        BinaryOp::Add,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_w,
    )
    .unwrap();
    assert_eq!(grad_w.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_dst_operand_gradient_accumulates_over_in_edges() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    graph_kernel_lib::kernel::src_op_dst_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &x,
        &x,
        &[],
        &mut out,
    )
    .unwrap();

    let grad_out = Array::<f64>::ones(&[4]);
    let mut grad_src = Array::<f64>::zeros(&[4]);
    backward_lhs_src_op_dst_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &x,
        &out,
        &grad_out,
        &mut grad_src,
    )
    .unwrap();
    // d/d src x[u] = sum over edges u->v of x[v]:
    // node 0: x[2]+x[3]; node 1: x[1]+x[2]; node 2: x[3].
    assert_eq!(grad_src.as_slice(), &[7.0, 5.0, 4.0, 0.0]);
}

#[test]
fn test_backward_shape_validation() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap();

    // grad_out shaped unlike out is rejected up front.
    let grad_out = Array::<f64>::ones(&[5]);
    let mut grad_x = Array::<f64>::zeros(&[4]);
    let err = backward_copy_src_reduce(
        Reducer::Sum,
        &g.view(),
        &[],
        &[],
        &x,
        &out,
        &grad_out,
        &mut grad_x,
    )
    .unwrap_err();
    assert!(matches!(err, graph_kernel_lib::Error::ShapeMismatch { .. }));
}

#[test]
fn test_broadcast_backward_sums_over_broadcast_dims() {
    // lhs features (2,), rhs features (3, 2). The lhs gradient must sum the
    // 3 output positions that reused each lhs element.
    let g = CsrGraph::from_edges(2, &[(0, 1)]).unwrap();
    let x = Array::from_vec(vec![1.0, 2.0, 0.0, 0.0], &[2, 2]).unwrap();
    let w = Array::from_vec((1..=6).map(|i| i as f64).collect(), &[1, 3, 2]).unwrap();
    let mut out = Array::<f64>::zeros(&[2, 3, 2]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();

    let grad_out = Array::<f64>::ones(&[2, 3, 2]);
    let mut grad_x = Array::<f64>::zeros(&[2, 2]);
    let mut grad_w = Array::<f64>::zeros(&[1, 3, 2]);
    backward_both_src_op_edge_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &[],
        &x,
        &w,
        &out,
        &grad_out,
        &mut grad_x,
        &mut grad_w,
    )
    .unwrap();
    // grad_x[0] = [w1+w3+w5, w2+w4+w6] = [9, 12]; node 1 has no out-edges.
    assert_eq!(grad_x.as_slice(), &[9.0, 12.0, 0.0, 0.0]);
    // grad_w = x[0] broadcast over the 3 positions.
    assert_eq!(grad_w.as_slice(), &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
}
