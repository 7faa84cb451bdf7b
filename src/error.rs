use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Unsupported {kind} selector {value:?}; expected one of {allowed}")]
    UnsupportedSelector {
        kind: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("Index out of bounds: index {index}, size {size}")]
    IndexOutOfBounds {
        index: usize,
        size: usize,
    },

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Gradient check error: analytical={analytical:?}, numerical={numerical:?}, max_rel_error={max_rel_error}, max_abs_error={max_abs_error}, at_index={at_index}")]
    GradientCheckError {
        analytical: Vec<f64>,
        numerical: Vec<f64>,
        max_rel_error: f64,
        max_abs_error: f64,
        at_index: usize,
    },
}
