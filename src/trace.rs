//! The trace entry point: wrap a seed into leaf nodes, run the user
//! function over them to record the tape, and hand back the outputs with
//! gradient/Jacobian extraction in either mode.

use std::collections::HashMap;

use crate::{
    error::GradError,
    tape::{Tape, TapeTerm},
};

/// Which evaluator backs the derivatives reported by a [`Trace`].
///
/// Forward accumulation happens eagerly during construction, so `Forward`
/// only reads the per-node maps; `Reverse` runs one backpropagation pass
/// per output component. Both are always available for cross-checking via
/// [`Trace::jacobian_forward`] and [`Trace::jacobian_reverse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Forward,
    Reverse,
}

/// What a traced function returns: a single term or a vector of terms.
pub enum Output<'a> {
    Scalar(TapeTerm<'a>),
    Vector(Vec<TapeTerm<'a>>),
}

impl<'a> From<TapeTerm<'a>> for Output<'a> {
    fn from(t: TapeTerm<'a>) -> Self {
        Output::Scalar(t)
    }
}

impl<'a> From<Vec<TapeTerm<'a>>> for Output<'a> {
    fn from(v: Vec<TapeTerm<'a>>) -> Self {
        Output::Vector(v)
    }
}

impl<'a, const N: usize> From<[TapeTerm<'a>; N]> for Output<'a> {
    fn from(v: [TapeTerm<'a>; N]) -> Self {
        Output::Vector(v.into())
    }
}

/// The completed recording of one function evaluation.
pub struct Trace<'a> {
    leaves: Vec<TapeTerm<'a>>,
    outputs: Vec<TapeTerm<'a>>,
    scalar: bool,
    mode: Mode,
}

/// Record `f` evaluated at `seed` on `tape` and return the trace.
///
/// The tape is reset first; each seed element becomes one leaf (named `x`,
/// `y`, `z` for up to three inputs, `x1..xk` beyond that) and `f` receives
/// the leaves as a slice. A domain violation inside `f` aborts the session
/// with the error, yielding no trace.
///
/// ```
/// use gradtape::{trace, Mode, Tape};
///
/// let tape = Tape::new();
/// let t = trace(&tape, |v| v[0] * v[1], &[2., 3.], Mode::Forward).unwrap();
/// assert_eq!(t.value(), 6.);
/// assert_eq!(t.gradient()["x"], 3.);
/// assert_eq!(t.gradient()["y"], 2.);
/// ```
pub fn trace<'a, F, O>(
    tape: &'a Tape,
    f: F,
    seed: &[f64],
    mode: Mode,
) -> Result<Trace<'a>, GradError>
where
    F: FnOnce(&[TapeTerm<'a>]) -> O,
    O: Into<Output<'a>>,
{
    if seed.is_empty() {
        return Err(GradError::EmptySeed);
    }
    if let Some(&value) = seed.iter().find(|v| !v.is_finite()) {
        return Err(GradError::NonFiniteSeed { value });
    }
    tape.reset();
    let leaves: Vec<_> = seed
        .iter()
        .zip(leaf_names(seed.len()))
        .map(|(&v, name)| tape.var(name, v))
        .collect();
    let out = f(&leaves).into();
    if let Some(err) = tape.take_error() {
        return Err(err);
    }
    let (outputs, scalar) = match out {
        Output::Scalar(t) => (vec![t], true),
        Output::Vector(v) if v.is_empty() => return Err(GradError::EmptyOutput),
        Output::Vector(v) => (v, false),
    };
    Ok(Trace {
        leaves,
        outputs,
        scalar,
        mode,
    })
}

/// Single-scalar-seed convenience over [`trace`]: `f` receives the one
/// leaf directly instead of a slice.
pub fn trace1<'a, F, O>(tape: &'a Tape, f: F, seed: f64, mode: Mode) -> Result<Trace<'a>, GradError>
where
    F: FnOnce(TapeTerm<'a>) -> O,
    O: Into<Output<'a>>,
{
    trace(tape, |leaves| f(leaves[0]), &[seed], mode)
}

fn leaf_names(k: usize) -> Vec<String> {
    const NAMES: [&str; 3] = ["x", "y", "z"];
    if k <= NAMES.len() {
        NAMES[..k].iter().map(|s| s.to_string()).collect()
    } else {
        (1..=k).map(|i| format!("x{i}")).collect()
    }
}

impl<'a> Trace<'a> {
    /// The first (or only) output node.
    pub fn output(&self) -> TapeTerm<'a> {
        self.outputs[0]
    }

    pub fn outputs(&self) -> &[TapeTerm<'a>] {
        &self.outputs
    }

    /// The leaf nodes, in seed order.
    pub fn leaves(&self) -> &[TapeTerm<'a>] {
        &self.leaves
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    /// Value of the first (or only) output.
    pub fn value(&self) -> f64 {
        self.outputs[0].value()
    }

    pub fn values(&self) -> Vec<f64> {
        self.outputs.iter().map(|t| t.value()).collect()
    }

    /// Gradient of the first output with respect to every leaf, keyed by
    /// leaf name, computed by the selected mode.
    pub fn gradient(&self) -> HashMap<String, f64> {
        let row = self.row(self.outputs[0]);
        self.leaves
            .iter()
            .map(|l| l.name())
            .zip(row)
            .collect()
    }

    /// The full n-by-k Jacobian (one row per output, one column per leaf),
    /// computed by the selected mode.
    pub fn jacobian(&self) -> Vec<Vec<f64>> {
        match self.mode {
            Mode::Forward => self.jacobian_forward(),
            Mode::Reverse => self.jacobian_reverse(),
        }
    }

    /// Jacobian read from the eagerly accumulated forward maps.
    pub fn jacobian_forward(&self) -> Vec<Vec<f64>> {
        self.outputs
            .iter()
            .map(|out| self.leaves.iter().map(|l| out.deriv_wrt(*l)).collect())
            .collect()
    }

    /// Jacobian from one reverse pass per output component.
    pub fn jacobian_reverse(&self) -> Vec<Vec<f64>> {
        self.outputs
            .iter()
            .map(|out| {
                out.backprop();
                self.leaves.iter().map(|l| l.grad()).collect()
            })
            .collect()
    }

    fn row(&self, out: TapeTerm<'a>) -> Vec<f64> {
        match self.mode {
            Mode::Forward => self.leaves.iter().map(|l| out.deriv_wrt(*l)).collect(),
            Mode::Reverse => {
                out.backprop();
                self.leaves.iter().map(|l| l.grad()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_naming() {
        assert_eq!(leaf_names(1), ["x"]);
        assert_eq!(leaf_names(3), ["x", "y", "z"]);
        assert_eq!(leaf_names(4), ["x1", "x2", "x3", "x4"]);
    }

    #[test]
    fn seed_validation() {
        let tape = Tape::new();
        assert_eq!(
            trace(&tape, |v| v[0], &[], Mode::Forward).err(),
            Some(GradError::EmptySeed)
        );
        let err = trace(&tape, |v| v[0], &[f64::NAN], Mode::Forward).err();
        assert!(matches!(err, Some(GradError::NonFiniteSeed { .. })));
    }

    #[test]
    fn empty_output_rejected() {
        let tape = Tape::new();
        let res = trace(&tape, |_| Vec::new(), &[1.], Mode::Forward);
        assert_eq!(res.err(), Some(GradError::EmptyOutput));
    }
}
