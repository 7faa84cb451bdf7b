// tests/kernel_forward_tests.rs
use approx::assert_abs_diff_eq;
use graph_kernel_lib::error::Error;
use graph_kernel_lib::graph::CsrGraph;
use graph_kernel_lib::kernel::{
    copy_edge_reduce, copy_src_reduce, src_op_dst_reduce, src_op_edge_reduce, BinaryOp, Reducer,
};
use graph_kernel_lib::test_utils::assert_allclose;
use graph_kernel_lib::Array;

// 4 nodes, 5 edges in CSR order:
//   e0: 0 -> 2, e1: 0 -> 3, e2: 1 -> 1, e3: 1 -> 2, e4: 2 -> 3
// In-edges: node 0: none; node 1: e2; node 2: e0, e3; node 3: e1, e4.
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
fn test_copy_src_sum() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap();
    // node 2 receives x[0] + x[1]; node 3 receives x[0] + x[2].
    assert_eq!(out.as_slice(), &[0.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_src_mul_edge_sum() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[4]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    // node 1: 2*30; node 2: 1*10 + 2*40; node 3: 1*20 + 3*50.
    assert_eq!(out.as_slice(), &[0.0, 60.0, 90.0, 170.0]);
}

#[test]
fn test_src_mul_edge_max_and_min() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();

    let mut out = Array::from_vec(vec![-1.0; 4], &[4]).unwrap();
    src_op_edge_reduce(Reducer::Max, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    // Zero in-degree leaves node 0 untouched.
    assert_eq!(out.as_slice(), &[-1.0, 60.0, 80.0, 150.0]);

    let mut out = Array::from_vec(vec![-1.0; 4], &[4]).unwrap();
    src_op_edge_reduce(Reducer::Min, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    assert_eq!(out.as_slice(), &[-1.0, 60.0, 10.0, 20.0]);
}

#[test]
fn test_mean_divides_by_in_degree() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[4]);
    src_op_edge_reduce(Reducer::Mean, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    // Zero in-degree rows stay zero rather than dividing by zero.
    assert_abs_diff_eq!(out.as_slice(), [0.0, 60.0, 45.0, 85.0].as_slice(), epsilon = 1e-12);
}

#[test]
fn test_none_reducer_writes_per_edge() {
    let g = fixture();
    let x = node_x();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[5]);
    src_op_edge_reduce(Reducer::None, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    assert_eq!(out.as_slice(), &[10.0, 20.0, 60.0, 80.0, 150.0]);
}

#[test]
fn test_src_add_dst_sum() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    src_op_dst_reduce(Reducer::Sum, BinaryOp::Add, &g.view(), &[], &[], &x, &x, &[], &mut out)
        .unwrap();
    // Per edge x[u] + x[v]: e0: 4, e1: 5, e2: 4, e3: 5, e4: 7.
    assert_eq!(out.as_slice(), &[0.0, 4.0, 9.0, 12.0]);
}

#[test]
fn test_copy_edge_sum() {
    let g = fixture();
    let w = edge_w();
    let mut out = Array::<f64>::zeros(&[4]);
    copy_edge_reduce(Reducer::Sum, &g.view(), &[], &w, &[], &mut out).unwrap();
    assert_eq!(out.as_slice(), &[0.0, 30.0, 50.0, 70.0]);
}

#[test]
fn test_in_degree_one_sum_is_elementwise() {
    // A path 0 -> 1 -> 2: every reached node has in-degree 1, so any
    // reducer degenerates to the plain binary operation.
    let g = CsrGraph::from_edges(3, &[(0, 1), (1, 2)]).unwrap();
    let x = Array::from_vec(vec![2.0, 3.0, 4.0], &[3]).unwrap();
    let w = Array::from_vec(vec![10.0, 100.0], &[2]).unwrap();
    for reducer in [Reducer::Sum, Reducer::Max, Reducer::Min, Reducer::Mean] {
        let mut out = Array::<f64>::zeros(&[3]);
        src_op_edge_reduce(reducer, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
            .unwrap();
        assert_eq!(&out.as_slice()[1..], &[20.0, 300.0]);
    }
}

#[test]
fn test_vector_features() {
    let g = fixture();
    let x = Array::from_vec((0..8).map(|i| i as f64).collect(), &[4, 2]).unwrap();
    let mut out = Array::<f64>::zeros(&[4, 2]);
    copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap();
    // node 2: x[0] + x[1] = [0+2, 1+3]; node 3: x[0] + x[2] = [0+4, 1+5].
    assert_eq!(out.as_slice(), &[0.0, 0.0, 2.0, 3.0, 2.0, 4.0, 4.0, 6.0]);
}

#[test]
fn test_broadcast_forward() {
    // lhs features (2,), rhs features (3, 2); out features (3, 2).
    let g = CsrGraph::from_edges(2, &[(0, 1)]).unwrap();
    let x = Array::from_vec(vec![1.0, 2.0, 0.0, 0.0], &[2, 2]).unwrap();
    let w = Array::from_vec((1..=6).map(|i| i as f64).collect(), &[1, 3, 2]).unwrap();
    let mut out = Array::<f64>::zeros(&[2, 3, 2]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    // Node 1 row: x[0] (= [1, 2]) broadcast over w's leading 3.
    let expected = Array::from_vec(
        vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 4.0, 3.0, 8.0, 5.0, 12.0],
        &[2, 3, 2],
    )
    .unwrap();
    assert_allclose(&out, &expected, 1e-12);
}

#[test]
fn test_rank_padding_without_broadcast() {
    // Scalar features against (1,) features: ranks differ but nothing
    // broadcasts, so the result matches the flat case.
    let g = fixture();
    let x = node_x();
    let w = Array::from_vec(vec![10.0, 20.0, 30.0, 40.0, 50.0], &[5, 1]).unwrap();
    let mut out = Array::<f64>::zeros(&[4, 1]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    assert_eq!(out.as_slice(), &[0.0, 60.0, 90.0, 170.0]);
}

#[test]
fn test_broadcast_rejects_incompatible_operands() {
    let g = CsrGraph::from_edges(2, &[(0, 1)]).unwrap();
    let x = Array::<f64>::zeros(&[2, 3]);
    let w = Array::<f64>::zeros(&[1, 4]);
    let mut out = Array::<f64>::zeros(&[2, 4]);
    let err = src_op_edge_reduce(
        Reducer::Sum,
        BinaryOp::Mul,
        &g.view(),
        &[],
        &[],
        &x,
        &w,
        &[],
        &mut out,
    )
    .unwrap_err();
    assert!(matches!(err, Error::IncompatibleShapes { .. }));
}

#[test]
fn test_mappings_translate_rows() {
    let g = fixture();
    // Physical src rows are a permutation of the node ids.
    let src_mapping = [3, 2, 1, 0];
    let x_perm = Array::from_vec(vec![4.0, 3.0, 2.0, 1.0], &[4]).unwrap();
    // Output rows likewise permuted.
    let out_mapping = [1, 0, 3, 2];
    let mut out = Array::<f64>::zeros(&[4]);
    copy_src_reduce(Reducer::Sum, &g.view(), &src_mapping, &x_perm, &out_mapping, &mut out)
        .unwrap();
    // Logical result [0, 2, 3, 4] lands at rows [1, 0, 3, 2].
    assert_eq!(out.as_slice(), &[2.0, 0.0, 4.0, 3.0]);
}

#[test]
fn test_identity_mapping_requires_exact_rows() {
    let g = fixture();
    let x = Array::<f64>::zeros(&[3]); // 4 nodes, only 3 rows
    let mut out = Array::<f64>::zeros(&[4]);
    let err = copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_mapping_rejects_out_of_range_rows() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]);
    let err =
        copy_src_reduce(Reducer::Sum, &g.view(), &[0, 1, 2, 9], &x, &[], &mut out).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfBounds { index: 9, size: 4 }));
}

#[test]
fn test_none_reducer_output_sized_by_edges() {
    let g = fixture();
    let x = node_x();
    let mut out = Array::<f64>::zeros(&[4]); // needs 5 rows
    let err = copy_src_reduce(Reducer::None, &g.view(), &[], &x, &[], &mut out).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_integer_kernels() {
    let g = fixture();
    let x = Array::<i32>::from_vec(vec![1, 2, 3, 4], &[4]).unwrap();
    let w = Array::<i32>::from_vec(vec![10, 20, 30, 40, 50], &[5]).unwrap();
    let mut out = Array::<i32>::zeros(&[4]);
    src_op_edge_reduce(Reducer::Sum, BinaryOp::Mul, &g.view(), &[], &[], &x, &w, &[], &mut out)
        .unwrap();
    assert_eq!(out.as_slice(), &[0, 60, 90, 170]);

    // Mean truncates toward zero for integer elements.
    let odd = Array::<i32>::from_vec(vec![1, 2, 3, 4, 5], &[5]).unwrap();
    let mut out = Array::<i32>::zeros(&[4]);
    copy_edge_reduce(Reducer::Mean, &g.view(), &[], &odd, &[], &mut out).unwrap();
    // node 2: (1 + 4) / 2 = 2; node 3: (2 + 5) / 2 = 3.
    assert_eq!(out.as_slice(), &[0, 3, 2, 3]);
}

#[test]
fn test_empty_feature_dim_is_a_no_op() {
    let g = fixture();
    let x = Array::<f64>::zeros(&[4, 0]);
    let mut out = Array::<f64>::zeros(&[4, 0]);
    copy_src_reduce(Reducer::Sum, &g.view(), &[], &x, &[], &mut out).unwrap();
    assert_eq!(out.size(), 0);
}
