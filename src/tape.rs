//! Shared memory arena for the trace nodes, aka a tape.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation
//!
//! Creation order is the topological order: a node can only be built from
//! operands that already exist, so both evaluation passes simply walk the
//! arena, forward or in reverse, without sorting.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::Display,
    ops::{Add, Div, Mul, Neg, Sub},
};

use crate::{error::GradError, ops::Op};

/// Append-only registry of every node created during one trace session.
///
/// The tape owns all nodes; terms only reference them by index. It also
/// latches the first domain error of the session, since the overloaded
/// arithmetic operators have no `Result` to return it through. `reset`
/// clears both for a fresh session.
#[derive(Default, Debug)]
pub struct Tape {
    nodes: RefCell<Vec<TapeNode>>,
    error: RefCell<Option<GradError>>,
}

#[derive(Clone, Debug)]
struct TapeNode {
    name: String,
    formula: String,
    expr: Expr,
    value: f64,
    /// Forward-mode total derivative with respect to every leaf, keyed by
    /// leaf index. An absent key is a zero partial.
    der: HashMap<u32, f64>,
    /// Reverse-mode adjoint, filled in by `backprop`.
    grad: f64,
}

#[derive(Clone, Copy, Debug)]
enum Expr {
    Leaf,
    Unary { op: Op, a: u32, param: Option<f64> },
    Binary { op: Op, a: u32, b: u32 },
}

/// The right operand of a binary build: either another traced node or a
/// plain constant. A constant degrades the operation to its unary form
/// with the constant as the parameter.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    Term(TapeTerm<'a>),
    Constant(f64),
}

impl<'a> From<TapeTerm<'a>> for Operand<'a> {
    fn from(t: TapeTerm<'a>) -> Self {
        Operand::Term(t)
    }
}

impl From<f64> for Operand<'_> {
    fn from(v: f64) -> Self {
        Operand::Constant(v)
    }
}

/// A lightweight handle to one node on the tape.
#[derive(Clone, Copy)]
pub struct TapeTerm<'a> {
    tape: &'a Tape,
    idx: u32,
}

/// A node's full derivative: a bare scalar when it depends on exactly one
/// leaf, otherwise the gradient keyed by leaf name.
#[derive(Clone, Debug, PartialEq)]
pub enum Derivative {
    Scalar(f64),
    Gradient(HashMap<String, f64>),
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a leaf node from a seed value. Its forward derivative map is
    /// seeded with `d(self)/d(self) = 1`.
    pub fn var<'a>(&'a self, name: impl Into<String>, value: f64) -> TapeTerm<'a> {
        if !value.is_finite() {
            self.poison(GradError::NonFiniteSeed { value });
        }
        let name = name.into();
        let formula = name.clone();
        let idx = self.nodes.borrow().len() as u32;
        let der = HashMap::from([(idx, 1.)]);
        self.push(Some(name), formula, Expr::Leaf, value, der)
    }

    /// Clear all nodes and any latched error, starting a new session.
    pub fn reset(&self) {
        self.nodes.borrow_mut().clear();
        *self.error.borrow_mut() = None;
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Handles to all nodes in creation (= topological) order.
    pub fn nodes(&self) -> Vec<TapeTerm<'_>> {
        (0..self.len() as u32)
            .map(|idx| TapeTerm { tape: self, idx })
            .collect()
    }

    /// The first domain error recorded during this session, if any.
    pub fn error(&self) -> Option<GradError> {
        self.error.borrow().clone()
    }

    pub(crate) fn take_error(&self) -> Option<GradError> {
        self.error.borrow_mut().take()
    }

    fn poison(&self, err: GradError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn push(
        &self,
        name: Option<String>,
        formula: String,
        expr: Expr,
        value: f64,
        der: HashMap<u32, f64>,
    ) -> TapeTerm<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len() as u32;
        let name = name.unwrap_or_else(|| format!("v{}", idx + 1));
        nodes.push(TapeNode {
            name,
            formula,
            expr,
            value,
            der,
            grad: 0.,
        });
        TapeTerm { tape: self, idx }
    }

    /// Build a node from one parent. Computes the value and chain-rules the
    /// parent's derivative map through the local derivative, eagerly.
    pub(crate) fn unary<'a>(
        &'a self,
        a: TapeTerm<'a>,
        op: Op,
        param: Option<f64>,
    ) -> TapeTerm<'a> {
        let (av, ader, aname) = {
            let nodes = self.nodes.borrow();
            let an = &nodes[a.idx as usize];
            (an.value, an.der.clone(), an.name.clone())
        };
        let formula = op.formula(&aname, param);
        let expr = Expr::Unary {
            op,
            a: a.idx,
            param,
        };
        match op.check_unary(av, param) {
            Ok(()) => {
                let value = op.unary_value(av, param);
                let local = op.unary_partial(av, param);
                let der = ader.into_iter().map(|(leaf, d)| (leaf, local * d)).collect();
                self.push(None, formula, expr, value, der)
            }
            Err(err) => {
                self.poison(err);
                self.push(None, formula, expr, f64::NAN, HashMap::new())
            }
        }
    }

    /// Build a node from two parents, or degrade to the unary build when
    /// the right operand is a plain constant.
    ///
    /// Contributions from both parents are summed entrywise, so a term used
    /// as both operands (`x * x`) is attributed twice to the same leaf.
    pub(crate) fn binary<'a>(
        &'a self,
        a: TapeTerm<'a>,
        op: Op,
        rhs: Operand<'a>,
    ) -> TapeTerm<'a> {
        let b = match rhs {
            Operand::Constant(c) => return self.unary(a, op, Some(c)),
            Operand::Term(b) => b,
        };
        let (av, bv, formula) = {
            let nodes = self.nodes.borrow();
            let an = &nodes[a.idx as usize];
            let bn = &nodes[b.idx as usize];
            let formula = format!("{} {} {}", an.name, op.symbol(), bn.name);
            (an.value, bn.value, formula)
        };
        let expr = Expr::Binary {
            op,
            a: a.idx,
            b: b.idx,
        };
        match op.check_binary(av, bv) {
            Ok(()) => {
                let value = op.binary_value(av, bv);
                let (da, db) = op.binary_partials(av, bv);
                let mut der = HashMap::new();
                {
                    let nodes = self.nodes.borrow();
                    for (parent, local) in [(a.idx, da), (b.idx, db)] {
                        for (&leaf, &d) in &nodes[parent as usize].der {
                            *der.entry(leaf).or_insert(0.) += local * d;
                        }
                    }
                }
                self.push(None, formula, expr, value, der)
            }
            Err(err) => {
                self.poison(err);
                self.push(None, formula, expr, f64::NAN, HashMap::new())
            }
        }
    }

    /// Reverse pass: zero all adjoints, seed the output with 1 and
    /// distribute `adjoint * local-partial` onto each parent in reverse
    /// creation order. Local partials are recomputed from the stored
    /// operation and parent values; the domain checks already passed when
    /// the nodes were built.
    fn backward(&self, out: u32) {
        let mut nodes = self.nodes.borrow_mut();
        for node in nodes.iter_mut() {
            node.grad = 0.;
        }
        nodes[out as usize].grad = 1.;
        for i in (0..=out as usize).rev() {
            let g = nodes[i].grad;
            if g == 0. {
                continue;
            }
            match nodes[i].expr {
                Expr::Leaf => {}
                Expr::Unary { op, a, param } => {
                    let av = nodes[a as usize].value;
                    nodes[a as usize].grad += g * op.unary_partial(av, param);
                }
                Expr::Binary { op, a, b } => {
                    let av = nodes[a as usize].value;
                    let bv = nodes[b as usize].value;
                    let (da, db) = op.binary_partials(av, bv);
                    nodes[a as usize].grad += g * da;
                    nodes[b as usize].grad += g * db;
                }
            }
        }
    }
}

impl<'a> TapeTerm<'a> {
    pub fn value(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].value
    }

    /// The adjoint accumulated by the last `backprop` call.
    pub fn grad(&self) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize].grad
    }

    /// Run the reverse-mode pass with this node as the output. Afterwards
    /// every leaf's `grad` holds the partial of this node with respect to
    /// that leaf.
    pub fn backprop(&self) {
        self.tape.backward(self.idx);
    }

    /// Forward-mode partial derivative with respect to `var`. A leaf that
    /// this node does not depend on yields 0.
    pub fn deriv_wrt(&self, var: TapeTerm<'a>) -> f64 {
        self.tape.nodes.borrow()[self.idx as usize]
            .der
            .get(&var.idx)
            .copied()
            .unwrap_or(0.)
    }

    /// The full forward-mode derivative: a bare scalar when exactly one
    /// leaf contributes, otherwise the gradient keyed by leaf name.
    pub fn derivative(&self) -> Derivative {
        let nodes = self.tape.nodes.borrow();
        let der = &nodes[self.idx as usize].der;
        if der.len() == 1 {
            let (_, &d) = der.iter().next().unwrap_or((&0, &0.));
            Derivative::Scalar(d)
        } else {
            Derivative::Gradient(
                der.iter()
                    .map(|(&leaf, &d)| (nodes[leaf as usize].name.clone(), d))
                    .collect(),
            )
        }
    }

    pub fn name(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].name.clone()
    }

    /// Rename the node for readability, e.g. calling the output `"Cost"`.
    /// Has no effect on derivatives.
    pub fn rename(&self, name: impl Into<String>) {
        self.tape.nodes.borrow_mut()[self.idx as usize].name = name.into();
    }

    pub fn formula(&self) -> String {
        self.tape.nodes.borrow()[self.idx as usize].formula.clone()
    }

    pub(crate) fn apply_op(self, op: Op, param: Option<f64>) -> Self {
        self.tape.unary(self, op, param)
    }

    /// Raise to a constant power.
    pub fn powf(self, p: f64) -> Self {
        self.tape.unary(self, Op::Pow, Some(p))
    }

    /// Raise to a traced power.
    pub fn pow(self, rhs: TapeTerm<'a>) -> Self {
        self.tape.binary(self, Op::Pow, Operand::Term(rhs))
    }
}

impl Display for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::fmt::Debug for TapeTerm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeTerm")
            .field("idx", &self.idx)
            .field("name", &self.name())
            .field("value", &self.value())
            .finish()
    }
}

impl<'a> Add for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.tape.binary(self, Op::Add, Operand::Term(rhs))
    }
}

impl<'a> Sub for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.tape.binary(self, Op::Sub, Operand::Term(rhs))
    }
}

impl<'a> Mul for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        self.tape.binary(self, Op::Mul, Operand::Term(rhs))
    }
}

impl<'a> Div for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        self.tape.binary(self, Op::Div, Operand::Term(rhs))
    }
}

impl<'a> Neg for TapeTerm<'a> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self.tape.unary(self, Op::Neg, None)
    }
}

impl<'a> Add<f64> for TapeTerm<'a> {
    type Output = Self;
    fn add(self, rhs: f64) -> Self::Output {
        self.tape.binary(self, Op::Add, Operand::Constant(rhs))
    }
}

impl<'a> Sub<f64> for TapeTerm<'a> {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self::Output {
        self.tape.binary(self, Op::Sub, Operand::Constant(rhs))
    }
}

impl<'a> Mul<f64> for TapeTerm<'a> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        self.tape.binary(self, Op::Mul, Operand::Constant(rhs))
    }
}

impl<'a> Div<f64> for TapeTerm<'a> {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        self.tape.binary(self, Op::Div, Operand::Constant(rhs))
    }
}

impl<'a> Add<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn add(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs + self
    }
}

impl<'a> Mul<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn mul(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs * self
    }
}

impl<'a> Sub<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn sub(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.unary(rhs, Op::SubR, Some(self))
    }
}

impl<'a> Div<TapeTerm<'a>> for f64 {
    type Output = TapeTerm<'a>;
    fn div(self, rhs: TapeTerm<'a>) -> Self::Output {
        rhs.tape.unary(rhs, Op::DivR, Some(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn eager_values_and_names() {
        let tape = Tape::new();
        let x = tape.var("x", 2.);
        let y = x * 3. + 1.;
        assert_eq!(y.value(), 7.);
        assert_eq!(x.name(), "x");
        assert_eq!(y.name(), "v3");
        assert_eq!((x * 3.).formula(), "x * 3");
        y.rename("Cost");
        assert_eq!(y.name(), "Cost");
        assert_eq!(tape.len(), 4);
    }

    #[test]
    fn forward_maps_compose() {
        let tape = Tape::new();
        let x = tape.var("x", 2.);
        let y = tape.var("y", 3.);
        let f = x * y + x;
        assert_eq!(f.value(), 8.);
        assert_eq!(f.deriv_wrt(x), 4.);
        assert_eq!(f.deriv_wrt(y), 2.);
    }

    #[test]
    fn self_aliasing_sums_contributions() {
        let tape = Tape::new();
        let x = tape.var("x", 3.);
        let sq = x * x;
        assert_eq!(sq.value(), 9.);
        assert_eq!(sq.deriv_wrt(x), 6.);
        sq.backprop();
        assert_eq!(x.grad(), 6.);
    }

    #[test]
    fn reverse_operand_order() {
        let tape = Tape::new();
        let x = tape.var("x", 4.);
        let a = 3. - x;
        let b = 2. / x;
        assert_eq!(a.value(), -1.);
        assert_eq!(a.deriv_wrt(x), -1.);
        assert_eq!(b.value(), 0.5);
        assert_relative_eq!(b.deriv_wrt(x), -2. / 16.);
        let n = -x;
        assert_eq!(n.value(), -4.);
        assert_eq!(n.deriv_wrt(x), -1.);
        assert_eq!(n.formula(), "-x");
    }

    #[test]
    fn diamond_backprop() {
        let tape = Tape::new();
        let a = tape.var("a", 1.);
        let b = tape.var("b", 3.);
        let c = tape.var("c", 5.);
        let ab = a + b;
        let ac = a + c;
        let abac = ab + ac;
        abac.backprop();
        assert_eq!(a.grad(), 2.);
        assert_eq!(b.grad(), 1.);
        assert_eq!(c.grad(), 1.);
    }

    #[test]
    fn division_by_zero_poisons_tape() {
        let tape = Tape::new();
        let x = tape.var("x", 1.);
        let y = tape.var("y", 0.);
        let q = x / y;
        assert!(q.value().is_nan());
        assert_eq!(
            tape.error(),
            Some(GradError::Domain { op: "/", value: 0. })
        );
        tape.reset();
        assert!(tape.error().is_none());
        assert!(tape.is_empty());
    }

    #[test]
    fn derivative_scalar_vs_gradient() {
        let tape = Tape::new();
        let x = tape.var("x", 2.);
        let y = tape.var("y", 3.);
        assert_eq!((x * 2.).derivative(), Derivative::Scalar(2.));
        match (x * y).derivative() {
            Derivative::Gradient(g) => {
                assert_eq!(g["x"], 3.);
                assert_eq!(g["y"], 2.);
            }
            d => panic!("expected gradient, got {d:?}"),
        }
    }

    #[test]
    fn backprop_matches_forward_on_deep_graph() {
        let tape = Tape::new();
        let x = tape.var("x", 0.8);
        let f = (x.sin() * x + 1.).log() / (x.cosh() + 2.);
        f.backprop();
        assert_relative_eq!(x.grad(), f.deriv_wrt(x), epsilon = 1e-12);
    }
}
