//! Shared helpers for kernel tests: finite-difference gradient checking,
//! tolerance-based comparison, and random graph/feature generation.

use crate::array::Array;
use crate::dtype::Element;
use crate::error::Error;
use crate::graph::CsrGraph;
use rand::Rng;
use rand_distr::Normal;

/// Checks an analytical gradient against central finite differences.
///
/// # Arguments
/// * `forward`: Maps the input tensor to the kernel output. The implied loss
///   is the sum of all output elements, so the incoming output gradient is
///   all ones.
/// * `analytic`: Computes the gradient of that loss with respect to the
///   input, via the backward kernel under test.
/// * `input`: The point at which to check. Perturbed elementwise.
/// * `epsilon`: Finite difference step (e.g. 1e-5).
/// * `tolerance`: Maximum allowed relative difference per element.
///
/// # Returns
/// * `Ok(())` if the gradients match within the tolerance.
/// * `Err(Error::GradientCheckError)` describing the worst mismatch otherwise.
pub fn check_gradient<F, G>(
    forward: F,
    analytic: G,
    input: &Array<f64>,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), Error>
where
    F: Fn(&Array<f64>) -> Result<Array<f64>, Error>,
    G: Fn(&Array<f64>) -> Result<Array<f64>, Error>,
{
    let analytical_grad_vec = compute_analytical_gradient(&analytic, input)?;
    let numerical_grad_vec = compute_numerical_gradient(&forward, input, epsilon)?;
    compare_gradients(&analytical_grad_vec, &numerical_grad_vec, tolerance)
}

fn compute_analytical_gradient<G>(analytic: &G, input: &Array<f64>) -> Result<Vec<f64>, Error>
where
    G: Fn(&Array<f64>) -> Result<Array<f64>, Error>,
{
    let grad = analytic(input)?;
    if grad.shape() != input.shape() {
        return Err(Error::InternalLogicError(format!(
            "analytical gradient shape {:?} does not match input shape {:?}",
            grad.shape(),
            input.shape()
        )));
    }
    Ok(grad.into_raw_vec())
}

fn compute_numerical_gradient<F>(
    forward: &F,
    input: &Array<f64>,
    epsilon: f64,
) -> Result<Vec<f64>, Error>
where
    F: Fn(&Array<f64>) -> Result<Array<f64>, Error>,
{
    let shape = input.shape().to_vec();
    let original_data = input.clone().into_raw_vec();
    let mut numerical_grad_vec = vec![0.0; original_data.len()];

    for i in 0..original_data.len() {
        let mut data_plus = original_data.clone();
        data_plus[i] += epsilon;
        let loss_plus = loss_of(forward, data_plus, &shape)?;

        let mut data_minus = original_data.clone();
        data_minus[i] -= epsilon;
        let loss_minus = loss_of(forward, data_minus, &shape)?;

        // Central difference formula
        numerical_grad_vec[i] = (loss_plus - loss_minus) / (2.0 * epsilon);
    }
    Ok(numerical_grad_vec)
}

fn loss_of<F>(forward: &F, data: Vec<f64>, shape: &[usize]) -> Result<f64, Error>
where
    F: Fn(&Array<f64>) -> Result<Array<f64>, Error>,
{
    let perturbed = Array::from_vec(data, shape)?;
    let out = forward(&perturbed)?;
    Ok(out.get_data().iter().sum())
}

fn compare_gradients(analytical: &[f64], numerical: &[f64], tolerance: f64) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;

    for (i, (a, n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let abs_err = (a - n).abs();
        let rel_err = if a.abs() > 1e-8 && n.abs() > 1e-8 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };

        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

pub fn assert_allclose<T: Element>(a: &Array<T>, b: &Array<T>, tol: f64) {
    assert_eq!(a.shape(), b.shape(), "Shapes don't match");
    for (i, (a_val, b_val)) in a.get_data().iter().zip(b.get_data().iter()).enumerate() {
        let diff = (a_val.to_f64() - b_val.to_f64()).abs();
        assert!(
            diff < tol,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, diff={diff}, tol={tol}"
        );
    }
}

/// Random multigraph over `num_nodes` nodes (self-loops and parallel edges
/// allowed).
pub fn random_graph<R: Rng>(
    rng: &mut R,
    num_nodes: usize,
    num_edges: usize,
) -> Result<CsrGraph, Error> {
    let edges: Vec<(usize, usize)> = (0..num_edges)
        .map(|_| {
            (
                rng.random_range(0..num_nodes),
                rng.random_range(0..num_nodes),
            )
        })
        .collect();
    CsrGraph::from_edges(num_nodes, &edges)
}

/// Feature tensor with standard-normal entries (rounded through `from_f64`
/// for the integer element types).
pub fn random_features<T: Element, R: Rng>(
    rng: &mut R,
    shape: &[usize],
) -> Result<Array<T>, Error> {
    let dist = Normal::new(0.0f64, 1.0)
        .map_err(|e| Error::InvalidOperation(format!("bad normal distribution: {}", e)))?;
    let size = shape.iter().product::<usize>();
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
        data.push(T::from_f64(rng.sample(dist)));
    }
    Array::from_vec(data, shape)
}

/// Strictly positive features, handy when a test must avoid ties and zero
/// products.
pub fn random_positive_features<R: Rng>(rng: &mut R, shape: &[usize]) -> Result<Array<f64>, Error> {
    let size = shape.iter().product::<usize>();
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
        data.push(rng.random_range(0.5..2.0));
    }
    Array::from_vec(data, shape)
}
