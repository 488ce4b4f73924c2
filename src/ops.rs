//! The elementary operation table: pure value and local-derivative rules,
//! plus the domain preconditions checked once at construction time.

use std::f64::consts::E;

use crate::error::GradError;

/// An elementary operation recorded on the tape.
///
/// A binary arithmetic op whose right operand is a plain constant is
/// recorded in unary form with the constant as the node's parameter, so
/// the unary tables below also cover `Add`..`Pow`. `SubR` and `DivR` are
/// the reversed forms (`constant - node`, `constant / node`) and only
/// exist with a parameter. `Exp` and `Log` take an optional base
/// parameter, defaulting to e.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    SubR,
    Mul,
    Div,
    DivR,
    Pow,
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Sigmoid,
}

fn sigmoid(a: f64) -> f64 {
    1. / (1. + (-a).exp())
}

impl Op {
    pub fn symbol(self) -> &'static str {
        use Op::*;
        match self {
            Add => "+",
            Sub | SubR | Neg => "-",
            Mul => "*",
            Div | DivR => "/",
            Pow => "^",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Exp => "exp",
            Log => "log",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Sqrt => "sqrt",
            Sigmoid => "sigmoid",
        }
    }

    fn base(param: Option<f64>) -> f64 {
        param.unwrap_or(E)
    }

    /// Precondition for a unary (or constant-degraded binary) application.
    /// Checked when the node is built; the value/partial rules below assume
    /// it has passed.
    pub(crate) fn check_unary(self, a: f64, param: Option<f64>) -> Result<(), GradError> {
        use Op::*;
        match self {
            Div if param == Some(0.) => Err(GradError::Domain { op: "/", value: 0. }),
            DivR if a == 0. => Err(GradError::Domain { op: "/", value: 0. }),
            Pow => {
                let p = param.unwrap_or(1.);
                if (a < 0. && p.fract() != 0.) || (a == 0. && p < 0.) {
                    Err(GradError::Domain { op: "^", value: a })
                } else {
                    Ok(())
                }
            }
            Exp if Self::base(param) <= 0. => Err(GradError::Domain {
                op: "exp",
                value: Self::base(param),
            }),
            Log => {
                let b = Self::base(param);
                if a <= 0. {
                    Err(GradError::Domain { op: "log", value: a })
                } else if b <= 0. || b == 1. {
                    Err(GradError::Domain { op: "log", value: b })
                } else {
                    Ok(())
                }
            }
            Sqrt if a < 0. => Err(GradError::Domain {
                op: "sqrt",
                value: a,
            }),
            _ => Ok(()),
        }
    }

    /// Precondition for a two-node application.
    pub(crate) fn check_binary(self, a: f64, b: f64) -> Result<(), GradError> {
        use Op::*;
        match self {
            Div if b == 0. => Err(GradError::Domain { op: "/", value: 0. }),
            // d(a^b)/db = a^b ln(a) needs a positive base.
            Pow if a <= 0. => Err(GradError::Domain { op: "^", value: a }),
            _ => Ok(()),
        }
    }

    /// Value of the operation applied to `a`, with the optional parameter.
    pub(crate) fn unary_value(self, a: f64, param: Option<f64>) -> f64 {
        use Op::*;
        match self {
            Add => a + param.unwrap_or(0.),
            Sub => a - param.unwrap_or(0.),
            SubR => param.unwrap_or(0.) - a,
            Mul => a * param.unwrap_or(1.),
            Div => a / param.unwrap_or(1.),
            DivR => param.unwrap_or(1.) / a,
            Pow => a.powf(param.unwrap_or(1.)),
            Neg => -a,
            Sin => a.sin(),
            Cos => a.cos(),
            Tan => a.tan(),
            Exp => Self::base(param).powf(a),
            Log => a.ln() / Self::base(param).ln(),
            Sinh => a.sinh(),
            Cosh => a.cosh(),
            Tanh => a.tanh(),
            Sqrt => a.sqrt(),
            Sigmoid => sigmoid(a),
        }
    }

    /// Local derivative with respect to `a`, evaluated at `a`.
    pub(crate) fn unary_partial(self, a: f64, param: Option<f64>) -> f64 {
        use Op::*;
        match self {
            Add | Sub => 1.,
            SubR | Neg => -1.,
            Mul => param.unwrap_or(1.),
            Div => 1. / param.unwrap_or(1.),
            DivR => {
                let c = param.unwrap_or(1.);
                -c / (a * a)
            }
            Pow => {
                let p = param.unwrap_or(1.);
                p * a.powf(p - 1.)
            }
            Sin => a.cos(),
            Cos => -a.sin(),
            Tan => {
                let c = a.cos();
                1. / (c * c)
            }
            Exp => {
                let b = Self::base(param);
                b.powf(a) * b.ln()
            }
            Log => 1. / (a * Self::base(param).ln()),
            Sinh => a.cosh(),
            Cosh => a.sinh(),
            Tanh => {
                let c = a.cosh();
                1. / (c * c)
            }
            Sqrt => 0.5 / a.sqrt(),
            Sigmoid => {
                let s = sigmoid(a);
                s * (1. - s)
            }
        }
    }

    /// Value of a two-node application. Identical to the unary rule with
    /// the right operand's value as the parameter.
    pub(crate) fn binary_value(self, a: f64, b: f64) -> f64 {
        self.unary_value(a, Some(b))
    }

    /// Local derivatives of a two-node application with respect to each
    /// operand, evaluated at `(a, b)`.
    pub(crate) fn binary_partials(self, a: f64, b: f64) -> (f64, f64) {
        use Op::*;
        let da = self.unary_partial(a, Some(b));
        let db = match self {
            Add => 1.,
            Sub => -1.,
            Mul => a,
            Div => -a / (b * b),
            Pow => a.powf(b) * a.ln(),
            // the transcendentals never appear as two-node applications
            _ => 0.,
        };
        (da, db)
    }

    /// Human-readable formula for a unary application to `operand`.
    pub(crate) fn formula(self, operand: &str, param: Option<f64>) -> String {
        use Op::*;
        match self {
            Add | Sub | Mul | Div => {
                format!("{operand} {} {}", self.symbol(), param.unwrap_or(0.))
            }
            SubR | DivR => format!("{} {} {operand}", param.unwrap_or(0.), self.symbol()),
            Pow => format!("{operand} ^ {}", param.unwrap_or(1.)),
            Neg => format!("-{operand}"),
            Exp => match param {
                None => format!("exp({operand})"),
                Some(b) => format!("{b} ^ ({operand})"),
            },
            Log => match param {
                None => format!("log({operand})"),
                Some(b) => format!("log_{b}({operand})"),
            },
            _ => format!("{}({operand})", self.symbol()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn arithmetic_rules() {
        assert_eq!(Op::Add.binary_value(2., 3.), 5.);
        assert_eq!(Op::Add.binary_partials(2., 3.), (1., 1.));
        assert_eq!(Op::Sub.binary_partials(2., 3.), (1., -1.));
        assert_eq!(Op::Mul.binary_value(2., 3.), 6.);
        assert_eq!(Op::Mul.binary_partials(2., 3.), (3., 2.));
        let (da, db) = Op::Div.binary_partials(1., 4.);
        assert_relative_eq!(da, 0.25);
        assert_relative_eq!(db, -1. / 16.);
    }

    #[test]
    fn power_rules() {
        assert_relative_eq!(Op::Pow.binary_value(2., 3.), 8.);
        let (da, db) = Op::Pow.binary_partials(2., 3.);
        assert_relative_eq!(da, 12.);
        assert_relative_eq!(db, 8. * 2f64.ln());
        // constant exponent
        assert_relative_eq!(Op::Pow.unary_partial(3., Some(2.)), 6.);
        // negative base is fine with an integer exponent
        assert!(Op::Pow.check_unary(-2., Some(3.)).is_ok());
        assert!(Op::Pow.check_unary(-2., Some(0.5)).is_err());
        assert!(Op::Pow.check_binary(-2., 3.).is_err());
    }

    #[test]
    fn transcendental_rules() {
        assert_relative_eq!(Op::Sin.unary_partial(1., None), 1f64.cos());
        assert_relative_eq!(Op::Cos.unary_partial(1., None), -(1f64.sin()));
        assert_relative_eq!(Op::Tan.unary_partial(0.3, None), 1. / 0.3f64.cos().powi(2));
        assert_relative_eq!(Op::Exp.unary_value(1., None), std::f64::consts::E);
        assert_relative_eq!(Op::Exp.unary_value(3., Some(2.)), 8.);
        assert_relative_eq!(Op::Exp.unary_partial(3., Some(2.)), 8. * 2f64.ln());
        assert_relative_eq!(Op::Log.unary_value(8., Some(2.)), 3.);
        assert_relative_eq!(Op::Log.unary_partial(8., Some(2.)), 1. / (8. * 2f64.ln()));
        assert_relative_eq!(Op::Sqrt.unary_partial(4., None), 0.25);
        let s = 1. / (1. + (-0.7f64).exp());
        assert_relative_eq!(Op::Sigmoid.unary_partial(0.7, None), s * (1. - s));
        assert_relative_eq!(Op::Tanh.unary_partial(0.7, None), 1. - 0.7f64.tanh().powi(2));
    }

    #[test]
    fn domain_checks() {
        assert!(Op::Log.check_unary(-1., None).is_err());
        assert!(Op::Log.check_unary(0., None).is_err());
        assert!(Op::Log.check_unary(2., Some(1.)).is_err());
        assert!(Op::Sqrt.check_unary(-0.1, None).is_err());
        assert!(Op::Sqrt.check_unary(0., None).is_ok());
        assert!(Op::Div.check_binary(1., 0.).is_err());
        assert!(Op::Div.check_unary(1., Some(0.)).is_err());
        assert!(Op::DivR.check_unary(0., Some(2.)).is_err());
        assert!(Op::Exp.check_unary(1., Some(-2.)).is_err());
        // tan is deliberately unguarded at its singularities
        assert!(Op::Tan
            .check_unary(std::f64::consts::FRAC_PI_2, None)
            .is_ok());
    }
}
