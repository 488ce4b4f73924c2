//! Elementary transcendental functions over traced terms.
//!
//! Each function exists as an inherent method on [`TapeTerm`] and as a free
//! function generic over [`Elementwise`], so that `sin(v)` applied to a
//! vector of terms maps over the elements and returns a vector of the same
//! shape.

use crate::{ops::Op, tape::TapeTerm};

/// A term or a same-shaped collection of terms that a unary elementary
/// operation can be broadcast over.
pub trait Elementwise<'a>: Sized {
    fn apply(self, op: Op, param: Option<f64>) -> Self;
}

impl<'a> Elementwise<'a> for TapeTerm<'a> {
    fn apply(self, op: Op, param: Option<f64>) -> Self {
        self.apply_op(op, param)
    }
}

impl<'a> Elementwise<'a> for Vec<TapeTerm<'a>> {
    fn apply(self, op: Op, param: Option<f64>) -> Self {
        self.into_iter().map(|t| t.apply_op(op, param)).collect()
    }
}

impl<'a, const N: usize> Elementwise<'a> for [TapeTerm<'a>; N] {
    fn apply(self, op: Op, param: Option<f64>) -> Self {
        self.map(|t| t.apply_op(op, param))
    }
}

macro_rules! elementary {
    ($($(#[$meta:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $name<'a, T: Elementwise<'a>>(t: T) -> T {
                t.apply(Op::$op, None)
            }
        )*
        impl<'a> TapeTerm<'a> {
            $(
                $(#[$meta])*
                pub fn $name(self) -> Self {
                    self.apply_op(Op::$op, None)
                }
            )*
        }
    };
}

elementary! {
    sin => Sin,
    cos => Cos,
    tan => Tan,
    /// Natural exponential, `e^t`. See [`exp_base`] for other bases.
    exp => Exp,
    /// Natural logarithm. See [`log_base`] for other bases.
    log => Log,
    sinh => Sinh,
    cosh => Cosh,
    tanh => Tanh,
    sqrt => Sqrt,
    /// Logistic function `1 / (1 + e^-t)`.
    sigmoid => Sigmoid,
}

/// Exponential with an explicit base, `base^t`.
pub fn exp_base<'a, T: Elementwise<'a>>(t: T, base: f64) -> T {
    t.apply(Op::Exp, Some(base))
}

/// Logarithm with an explicit base.
pub fn log_base<'a, T: Elementwise<'a>>(t: T, base: f64) -> T {
    t.apply(Op::Log, Some(base))
}

impl<'a> TapeTerm<'a> {
    /// Exponential with an explicit base, `base^self`.
    pub fn exp_base(self, base: f64) -> Self {
        self.apply_op(Op::Exp, Some(base))
    }

    /// Logarithm with an explicit base.
    pub fn log_base(self, base: f64) -> Self {
        self.apply_op(Op::Log, Some(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;
    use approx::assert_relative_eq;

    #[test]
    fn methods_and_free_functions_agree() {
        let tape = Tape::new();
        let x = tape.var("x", 0.4);
        assert_eq!(x.sin().value(), sin(x).value());
        assert_eq!(x.log_base(2.).value(), log_base(x, 2.).value());
        assert_relative_eq!(x.sigmoid().value(), 1. / (1. + (-0.4f64).exp()));
    }

    #[test]
    fn broadcast_over_vector() {
        let tape = Tape::new();
        let v = vec![tape.var("x", 0.1), tape.var("y", 0.2), tape.var("z", 0.3)];
        let s = sin(v.clone());
        assert_eq!(s.len(), 3);
        for (si, vi) in s.iter().zip(&v) {
            assert_relative_eq!(si.value(), vi.value().sin());
            assert_relative_eq!(si.deriv_wrt(*vi), vi.value().cos());
        }
        // each output depends on its own leaf only
        assert_eq!(s[0].deriv_wrt(v[1]), 0.);
        assert_eq!(s[2].deriv_wrt(v[0]), 0.);
    }

    #[test]
    fn broadcast_over_array() {
        let tape = Tape::new();
        let v = [tape.var("x", 1.), tape.var("y", 4.)];
        let r = sqrt(v);
        assert_eq!(r[0].value(), 1.);
        assert_eq!(r[1].value(), 2.);
        assert_relative_eq!(r[1].deriv_wrt(v[1]), 0.25);
    }
}
