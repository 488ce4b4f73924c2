use thiserror::Error;

/// Errors raised while recording a trace. All of them are reported at
/// construction time, never during a later evaluation pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradError {
    /// An elementary operation was applied outside its domain, e.g.
    /// `log` of a non-positive value or division by zero.
    #[error("domain error: {op} is undefined at {value}")]
    Domain { op: &'static str, value: f64 },

    /// A seed element (or a value assigned to a leaf) is NaN or infinite.
    #[error("seed value {value} is not a finite number")]
    NonFiniteSeed { value: f64 },

    /// The seed contained no elements.
    #[error("seed must contain at least one value")]
    EmptySeed,

    /// The traced function returned an empty output vector.
    #[error("traced function returned no outputs")]
    EmptyOutput,
}
