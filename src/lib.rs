//! Tape-based automatic differentiation for scalar functions
//! f: R^k -> R^n, with exact gradients and Jacobians and no
//! finite-difference approximation.
//!
//! Evaluating a function with [`TapeTerm`] operands records every
//! elementary operation on a [`Tape`]; forward-mode derivatives are
//! accumulated eagerly as the graph is built, and reverse mode replays the
//! tape backwards from an output.
//!
//! ```
//! use gradtape::{trace, Mode, Tape};
//!
//! let tape = Tape::new();
//! let t = trace(
//!     &tape,
//!     |v| [v[0] + 3. * v[2].powf(2.), v[1] - v[0]],
//!     &[1., 2., 3.],
//!     Mode::Reverse,
//! )
//! .unwrap();
//! assert_eq!(t.values(), [28., 1.]);
//! assert_eq!(t.jacobian(), [[1., 0., 18.], [-1., 1., 0.]]);
//! ```

pub mod error;
mod functions;
mod ops;
mod tape;
mod trace;

pub use error::GradError;
pub use functions::{
    cos, cosh, exp, exp_base, log, log_base, sigmoid, sin, sinh, sqrt, tan, tanh, Elementwise,
};
pub use ops::Op;
pub use tape::{Derivative, Operand, Tape, TapeTerm};
pub use trace::{trace, trace1, Mode, Output, Trace};
