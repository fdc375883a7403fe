//! Symbolic expression trees.
//!
//! `Expr` values are kept in a canonical form by their constructors:
//! sums and products are flattened and sorted, numeric constants are folded,
//! like terms (`2*x + 3*x`) and like bases (`x * x^2`) are collected. Two
//! expressions that differ only by ordering therefore compare equal, which is
//! what common-subexpression elimination and like-term collection rely on.

use crate::traits::Scalar;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Elementary functions understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Function {
    Exp,
    Ln,
    Sin,
    Cos,
    Sqrt,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Exp => "exp",
            Function::Ln => "log",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Sqrt => "sqrt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Function::Exp),
            "log" | "ln" => Some(Function::Ln),
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "sqrt" => Some(Function::Sqrt),
            _ => None,
        }
    }

    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Sqrt => x.sqrt(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(f64),
    Symbol(String),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Func(Function, Box<Expr>),
}

/// Returns the value as an `i32` when it is an exactly representable integer.
pub(crate) fn as_integer(value: f64) -> Option<i32> {
    if value.fract() == 0.0 && value.abs() <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

impl Expr {
    pub fn num(value: f64) -> Expr {
        // -0.0 and 0.0 must hash identically.
        Expr::Const(if value == 0.0 { 0.0 } else { value })
    }

    pub fn symbol(name: impl Into<String>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn symbols(names: &[&str]) -> Vec<Expr> {
        names.iter().map(|n| Expr::symbol(*n)).collect()
    }

    pub fn zero() -> Expr {
        Expr::Const(0.0)
    }

    pub fn one() -> Expr {
        Expr::Const(1.0)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 0.0)
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 1.0)
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Canonical n-ary sum.
    pub fn sum(terms: Vec<Expr>) -> Expr {
        let mut constant_part = 0.0;
        let mut collected: Vec<(Expr, f64)> = Vec::new();
        let mut pending = terms;

        while let Some(term) = pending.pop() {
            match term {
                Expr::Add(inner) => pending.extend(inner),
                Expr::Const(c) => constant_part += c,
                other => {
                    let (coeff, rest) = other.split_coefficient();
                    match collected.iter_mut().find(|(e, _)| *e == rest) {
                        Some((_, c)) => *c += coeff,
                        None => collected.push((rest, coeff)),
                    }
                }
            }
        }

        let mut out: Vec<Expr> = collected
            .into_iter()
            .filter(|(_, c)| *c != 0.0)
            .map(|(rest, c)| {
                if c == 1.0 {
                    rest
                } else {
                    Expr::product(vec![Expr::num(c), rest])
                }
            })
            .collect();
        out.sort();
        // Constants trail the symbolic terms, unlike products where the
        // coefficient leads.
        if constant_part != 0.0 {
            out.push(Expr::num(constant_part));
        }

        match out.len() {
            0 => Expr::zero(),
            1 => out.pop().unwrap_or_else(Expr::zero),
            _ => Expr::Add(out),
        }
    }

    /// Canonical n-ary product.
    pub fn product(factors: Vec<Expr>) -> Expr {
        let mut coeff = 1.0;
        let mut bases: Vec<(Expr, Expr)> = Vec::new();
        let mut pending = factors;

        while let Some(factor) = pending.pop() {
            let (base, exponent) = match factor {
                Expr::Mul(inner) => {
                    pending.extend(inner);
                    continue;
                }
                Expr::Const(c) => {
                    coeff *= c;
                    continue;
                }
                Expr::Pow(base, exponent) => (*base, *exponent),
                other => (other, Expr::one()),
            };
            match bases.iter_mut().find(|(b, _)| *b == base) {
                Some((_, e)) => *e = Expr::sum(vec![e.clone(), exponent]),
                None => bases.push((base, exponent)),
            }
        }

        if coeff == 0.0 {
            return Expr::zero();
        }

        let mut out = Vec::with_capacity(bases.len() + 1);
        for (base, exponent) in bases {
            match Expr::pow(base, exponent) {
                Expr::Const(c) => coeff *= c,
                Expr::Mul(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        if coeff != 1.0 {
            out.push(Expr::num(coeff));
        }

        match out.len() {
            0 => Expr::num(coeff),
            1 => out.pop().unwrap_or_else(Expr::one),
            _ => {
                out.sort();
                Expr::Mul(out)
            }
        }
    }

    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        match (&base, &exponent) {
            (_, Expr::Const(e)) if *e == 0.0 => Expr::one(),
            (_, Expr::Const(e)) if *e == 1.0 => base,
            (Expr::Const(b), Expr::Const(e)) => Expr::num(b.powf(*e)),
            (Expr::Const(b), _) if *b == 1.0 => Expr::one(),
            (Expr::Pow(inner_base, inner_exp), Expr::Const(e)) if as_integer(*e).is_some() => {
                let combined = Expr::product(vec![(**inner_exp).clone(), exponent.clone()]);
                Expr::pow((**inner_base).clone(), combined)
            }
            _ => Expr::Pow(Box::new(base), Box::new(exponent)),
        }
    }

    pub fn powi(self, n: i32) -> Expr {
        Expr::pow(self, Expr::num(n as f64))
    }

    pub fn func(function: Function, arg: Expr) -> Expr {
        match (function, &arg) {
            (_, Expr::Const(c)) => Expr::num(function.apply(*c)),
            (Function::Ln, Expr::Func(Function::Exp, inner)) => (**inner).clone(),
            _ => Expr::Func(function, Box::new(arg)),
        }
    }

    pub fn exp(self) -> Expr {
        Expr::func(Function::Exp, self)
    }

    pub fn ln(self) -> Expr {
        Expr::func(Function::Ln, self)
    }

    pub fn sin(self) -> Expr {
        Expr::func(Function::Sin, self)
    }

    pub fn cos(self) -> Expr {
        Expr::func(Function::Cos, self)
    }

    pub fn sqrt(self) -> Expr {
        Expr::func(Function::Sqrt, self)
    }

    /// Splits `c * rest` into `(c, rest)`; expressions without a numeric
    /// factor return a coefficient of one.
    pub fn split_coefficient(self) -> (f64, Expr) {
        match self {
            Expr::Const(c) => (c, Expr::one()),
            Expr::Mul(mut factors) => match factors.first() {
                Some(Expr::Const(c)) => {
                    let c = *c;
                    factors.remove(0);
                    let rest = if factors.len() == 1 {
                        factors.pop().unwrap_or_else(Expr::one)
                    } else {
                        Expr::Mul(factors)
                    };
                    (c, rest)
                }
                _ => (1.0, Expr::Mul(factors)),
            },
            other => (1.0, other),
        }
    }

    /// Symbolic partial derivative with respect to the symbol `var`.
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Const(_) => Expr::zero(),
            Expr::Symbol(name) => {
                if name == var {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Add(terms) => Expr::sum(terms.iter().map(|t| t.diff(var)).collect()),
            Expr::Mul(factors) => {
                let mut terms = Vec::new();
                for (i, factor) in factors.iter().enumerate() {
                    let d = factor.diff(var);
                    if d.is_zero() {
                        continue;
                    }
                    let mut parts: Vec<Expr> = factors
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, f)| f.clone())
                        .collect();
                    parts.push(d);
                    terms.push(Expr::product(parts));
                }
                Expr::sum(terms)
            }
            Expr::Pow(base, exponent) => {
                let db = base.diff(var);
                let de = exponent.diff(var);
                if de.is_zero() {
                    if db.is_zero() {
                        return Expr::zero();
                    }
                    let reduced = Expr::sum(vec![(**exponent).clone(), Expr::num(-1.0)]);
                    Expr::product(vec![
                        (**exponent).clone(),
                        Expr::pow((**base).clone(), reduced),
                        db,
                    ])
                } else {
                    // d(b^e) = b^e * (e' ln b + e b' / b)
                    let log_term = Expr::product(vec![de, (**base).clone().ln()]);
                    let base_term = Expr::product(vec![
                        (**exponent).clone(),
                        db,
                        (**base).clone().powi(-1),
                    ]);
                    Expr::product(vec![self.clone(), Expr::sum(vec![log_term, base_term])])
                }
            }
            Expr::Func(function, arg) => {
                let da = arg.diff(var);
                if da.is_zero() {
                    return Expr::zero();
                }
                let outer = match function {
                    Function::Exp => self.clone(),
                    Function::Ln => (**arg).clone().powi(-1),
                    Function::Sin => (**arg).clone().cos(),
                    Function::Cos => -(**arg).clone().sin(),
                    Function::Sqrt => Expr::product(vec![Expr::num(0.5), self.clone().powi(-1)]),
                };
                Expr::product(vec![outer, da])
            }
        }
    }

    /// Evaluates the tree against a name -> value environment.
    /// Returns `None` if a symbol has no binding.
    pub fn eval(&self, env: &HashMap<&str, f64>) -> Option<f64> {
        Some(match self {
            Expr::Const(c) => *c,
            Expr::Symbol(name) => *env.get(name.as_str())?,
            Expr::Add(terms) => {
                let mut acc = 0.0;
                for term in terms {
                    acc += term.eval(env)?;
                }
                acc
            }
            Expr::Mul(factors) => {
                let mut acc = 1.0;
                for factor in factors {
                    acc *= factor.eval(env)?;
                }
                acc
            }
            Expr::Pow(base, exponent) => {
                let b = base.eval(env)?;
                match exponent.as_const().and_then(as_integer) {
                    Some(n) => b.powi(n),
                    None => b.powf(exponent.eval(env)?),
                }
            }
            Expr::Func(function, arg) => function.apply::<f64>(arg.eval(env)?),
        })
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Symbol(name) => {
                out.insert(name.clone());
            }
            Expr::Add(items) | Expr::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Expr::Pow(base, exponent) => {
                base.collect_symbols(out);
                exponent.collect_symbols(out);
            }
            Expr::Func(_, arg) => arg.collect_symbols(out),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Expr::Const(_) => 0,
            Expr::Symbol(_) => 1,
            Expr::Pow(..) => 2,
            Expr::Func(..) => 3,
            Expr::Mul(_) => 4,
            Expr::Add(_) => 5,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(_) => 1,
            Expr::Mul(_) => 2,
            Expr::Const(c) if *c < 0.0 => 2,
            Expr::Pow(..) => 3,
            _ => 4,
        }
    }
}

/// Symbolic Jacobian of `exprs` with respect to `vars`, one row per expression.
pub fn jacobian(exprs: &[Expr], vars: &[String]) -> Vec<Vec<Expr>> {
    exprs
        .iter()
        .map(|e| vars.iter().map(|v| e.diff(v)).collect())
        .collect()
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Expr {}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Expr::Const(a), Expr::Const(b)) => a.total_cmp(b),
            (Expr::Symbol(a), Expr::Symbol(b)) => a.cmp(b),
            (Expr::Add(a), Expr::Add(b)) | (Expr::Mul(a), Expr::Mul(b)) => a.cmp(b),
            (Expr::Pow(ab, ae), Expr::Pow(bb, be)) => ab.cmp(bb).then_with(|| ae.cmp(be)),
            (Expr::Func(fa, a), Expr::Func(fb, b)) => fa.cmp(fb).then_with(|| a.cmp(b)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Expr::Const(c) => c.to_bits().hash(state),
            Expr::Symbol(name) => name.hash(state),
            Expr::Add(items) | Expr::Mul(items) => items.hash(state),
            Expr::Pow(base, exponent) => {
                base.hash(state);
                exponent.hash(state);
            }
            Expr::Func(function, arg) => {
                function.hash(state);
                arg.hash(state);
            }
        }
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(vec![self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum(vec![self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(vec![self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::product(vec![self, rhs.powi(-1)])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product(vec![Expr::num(-1.0), self])
    }
}

impl Mul<Expr> for f64 {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(vec![Expr::num(self), rhs])
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::num(value)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::symbol(name)
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:?}", value)
    }
}

fn write_child(f: &mut fmt::Formatter<'_>, child: &Expr, min_precedence: u8) -> fmt::Result {
    if child.precedence() < min_precedence {
        write!(f, "({child})")
    } else {
        write!(f, "{child}")
    }
}

fn write_factors(f: &mut fmt::Formatter<'_>, factors: &[Expr]) -> fmt::Result {
    for (i, factor) in factors.iter().enumerate() {
        if i > 0 {
            write!(f, "*")?;
        }
        write_child(f, factor, 3)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", format_number(*c)),
            Expr::Symbol(name) => write!(f, "{name}"),
            Expr::Add(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    let (coeff, rest) = term.clone().split_coefficient();
                    if i == 0 {
                        write!(f, "{term}")?;
                    } else if coeff < 0.0 {
                        let positive = Expr::product(vec![Expr::num(-coeff), rest]);
                        write!(f, " - ")?;
                        write_child(f, &positive, 2)?;
                    } else {
                        write!(f, " + ")?;
                        write_child(f, term, 2)?;
                    }
                }
                Ok(())
            }
            Expr::Mul(factors) => {
                let mut numerator = Vec::new();
                let mut denominator = Vec::new();
                let mut negate = false;
                for factor in factors {
                    match factor {
                        Expr::Const(c) if *c < 0.0 => {
                            negate = true;
                            if *c != -1.0 {
                                numerator.push(Expr::num(-c));
                            }
                        }
                        Expr::Pow(base, exponent) => match exponent.as_const() {
                            Some(e) if e < 0.0 => {
                                denominator.push(Expr::pow((**base).clone(), Expr::num(-e)))
                            }
                            _ => numerator.push(factor.clone()),
                        },
                        other => numerator.push(other.clone()),
                    }
                }
                if negate {
                    write!(f, "-")?;
                }
                if numerator.is_empty() {
                    write!(f, "1")?;
                } else {
                    write_factors(f, &numerator)?;
                }
                if !denominator.is_empty() {
                    write!(f, "/")?;
                    if denominator.len() == 1 {
                        write_child(f, &denominator[0], 4)?;
                    } else {
                        write!(f, "(")?;
                        write_factors(f, &denominator)?;
                        write!(f, ")")?;
                    }
                }
                Ok(())
            }
            Expr::Pow(base, exponent) => {
                write_child(f, base, 4)?;
                write!(f, "^")?;
                write_child(f, exponent, 4)
            }
            Expr::Func(function, arg) => write!(f, "{}({arg})", function.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn x() -> Expr {
        Expr::symbol("x")
    }

    fn y() -> Expr {
        Expr::symbol("y")
    }

    #[test]
    fn sums_collect_like_terms_and_fold_constants() {
        let e = 2.0 * x() + Expr::num(3.0) + 3.0 * x() - Expr::num(3.0);
        assert_eq!(e, 5.0 * x());
        assert!((x() - x()).is_zero());
    }

    #[test]
    fn products_collect_like_bases() {
        let e = x() * x().powi(2) * y() / y();
        assert_eq!(e, x().powi(3));
        assert_eq!(x() * Expr::zero(), Expr::zero());
    }

    #[test]
    fn ordering_does_not_matter_for_equality() {
        assert_eq!(x() * y() + y(), y() + y() * x());
    }

    #[test]
    fn derivative_of_mass_action_rate() {
        let k = Expr::symbol("k");
        let rate = -(k.clone() * x().powi(2) * y());
        assert_eq!(rate.diff("x"), -2.0 * k.clone() * x() * y());
        assert_eq!(rate.diff("y"), -(k * x().powi(2)));
        assert!(rate.diff("z").is_zero());
    }

    #[test]
    fn derivative_of_elementary_functions() {
        let env: HashMap<&str, f64> = [("x", 0.7), ("y", 1.3)].into_iter().collect();
        let e = (x() * y()).exp() + x().ln() * y().sin() + x().sqrt() - x().cos();
        let d = e.diff("x");
        let expected = 1.3 * (0.7_f64 * 1.3).exp() + 1.3_f64.sin() / 0.7
            + 0.5 / 0.7_f64.sqrt()
            + 0.7_f64.sin();
        assert_relative_eq!(d.eval(&env).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn derivative_with_symbolic_exponent() {
        let env: HashMap<&str, f64> = [("x", 1.5), ("y", 2.5)].into_iter().collect();
        let d = Expr::pow(x(), y()).diff("y");
        let expected = 1.5_f64.powf(2.5) * 1.5_f64.ln();
        assert_relative_eq!(d.eval(&env).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn eval_reports_unbound_symbols() {
        let env: HashMap<&str, f64> = [("x", 2.0)].into_iter().collect();
        assert_eq!((x() * x()).eval(&env), Some(4.0));
        assert_eq!((x() + y()).eval(&env), None);
    }

    #[test]
    fn display_is_readable() {
        let k = Expr::symbol("k");
        assert_eq!(format!("{}", -(k.clone() * x())), "-k*x");
        assert_eq!(format!("{}", x() - 2.0 * y()), "x - 2*y");
        assert_eq!(format!("{}", x() / (y() + Expr::one())), "x/(y + 1)");
        assert_eq!(format!("{}", (x() + y()).powi(2)), "(x + y)^2");
    }

    #[test]
    fn jacobian_has_one_row_per_expression() {
        let vars = vec!["x".to_string(), "y".to_string()];
        let jac = jacobian(&[x() * y(), x() + y()], &vars);
        assert_eq!(jac.len(), 2);
        assert_eq!(jac[0], vec![y(), x()]);
        assert_eq!(jac[1], vec![Expr::one(), Expr::one()]);
    }

    #[test]
    fn free_symbols_are_sorted_and_unique() {
        let e = y() * x() + x().exp();
        let names: Vec<String> = e.free_symbols().into_iter().collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }
}
