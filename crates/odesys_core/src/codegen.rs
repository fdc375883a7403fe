//! C source generation for the ahead-of-time backend.

use crate::error::BackendError;
use crate::symbolic::{as_integer, Expr, Function};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::hash::{Hash, Hasher};

/// Integer powers up to this magnitude are expanded into multiplications.
const MAX_EXPANDED_POWER: i32 = 8;

/// Result of common-subexpression elimination over a batch of expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Cse {
    /// Temporaries in dependency order: each may refer to earlier ones.
    pub replacements: Vec<(String, Expr)>,
    pub reduced: Vec<Expr>,
}

fn is_composite(expr: &Expr) -> bool {
    !matches!(expr, Expr::Const(_) | Expr::Symbol(_))
}

fn count_subtrees(expr: &Expr, counts: &mut HashMap<Expr, usize>) {
    if !is_composite(expr) {
        return;
    }
    let seen = counts.entry(expr.clone()).or_insert(0);
    *seen += 1;
    if *seen > 1 {
        // children were already counted through the first occurrence
        return;
    }
    match expr {
        Expr::Add(items) | Expr::Mul(items) => {
            for item in items {
                count_subtrees(item, counts);
            }
        }
        Expr::Pow(base, exponent) => {
            count_subtrees(base, counts);
            count_subtrees(exponent, counts);
        }
        Expr::Func(_, arg) => count_subtrees(arg, counts),
        Expr::Const(_) | Expr::Symbol(_) => {}
    }
}

struct CseBuilder<'a> {
    counts: HashMap<Expr, usize>,
    reserved: &'a HashSet<String>,
    prefix: &'a str,
    next: usize,
    memo: HashMap<Expr, Expr>,
    replacements: Vec<(String, Expr)>,
}

impl CseBuilder<'_> {
    fn fresh_name(&mut self) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if !self.reserved.contains(&name) {
                return name;
            }
        }
    }

    fn rebuild(&mut self, expr: &Expr) -> Expr {
        if !is_composite(expr) {
            return expr.clone();
        }
        if let Some(symbol) = self.memo.get(expr) {
            return symbol.clone();
        }
        // Children are rebuilt structurally; re-canonicalising could merge
        // a temporary back into its parent.
        let rebuilt = match expr {
            Expr::Add(items) => Expr::Add(items.iter().map(|i| self.rebuild(i)).collect()),
            Expr::Mul(items) => Expr::Mul(items.iter().map(|i| self.rebuild(i)).collect()),
            Expr::Pow(base, exponent) => {
                Expr::Pow(Box::new(self.rebuild(base)), Box::new(self.rebuild(exponent)))
            }
            Expr::Func(function, arg) => Expr::Func(*function, Box::new(self.rebuild(arg))),
            Expr::Const(_) | Expr::Symbol(_) => expr.clone(),
        };
        if self.counts.get(expr).copied().unwrap_or(0) > 1 {
            let name = self.fresh_name();
            let symbol = Expr::Symbol(name.clone());
            self.replacements.push((name, rebuilt));
            self.memo.insert(expr.clone(), symbol.clone());
            symbol
        } else {
            rebuilt
        }
    }
}

/// Replaces every composite subexpression that occurs more than once across
/// `exprs` with a temporary named `{prefix}{n}`, skipping names in `reserved`.
pub fn cse(exprs: &[Expr], reserved: &HashSet<String>, prefix: &str) -> Cse {
    let mut counts = HashMap::new();
    for expr in exprs {
        count_subtrees(expr, &mut counts);
    }
    let mut builder = CseBuilder {
        counts,
        reserved,
        prefix,
        next: 0,
        memo: HashMap::new(),
        replacements: Vec::new(),
    };
    let reduced = exprs.iter().map(|e| builder.rebuild(e)).collect();
    Cse {
        replacements: builder.replacements,
        reduced,
    }
}

fn c_number(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
    } else if value < 0.0 {
        format!("({:?})", value)
    } else {
        format!("{:?}", value)
    }
}

/// Prints expressions as C99 using `math.h`.
pub struct CPrinter {
    symbols: HashMap<String, String>,
}

impl CPrinter {
    /// States print as `y[i]`, parameters as `p[i]`, the time symbol as `t`.
    pub fn new(states: &[String], params: &[String], time: Option<&str>) -> Self {
        let mut symbols = HashMap::new();
        for (i, name) in params.iter().enumerate() {
            symbols.insert(name.clone(), format!("p[{i}]"));
        }
        for (i, name) in states.iter().enumerate() {
            symbols.insert(name.clone(), format!("y[{i}]"));
        }
        if let Some(time) = time {
            symbols.insert(time.to_string(), "t".to_string());
        }
        Self { symbols }
    }

    /// Binds a CSE temporary to a C local of the same name.
    pub fn bind_local(&mut self, name: &str) {
        self.symbols.insert(name.to_string(), name.to_string());
    }

    pub fn print(&self, expr: &Expr) -> Result<String, BackendError> {
        Ok(match expr {
            Expr::Const(c) => c_number(*c),
            Expr::Symbol(name) => self
                .symbols
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::UnboundSymbol(name.clone()))?,
            Expr::Add(terms) => {
                let parts = terms
                    .iter()
                    .map(|t| self.print(t))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", parts.join(" + "))
            }
            Expr::Mul(factors) => {
                let (negate, rest) = match factors.split_first() {
                    Some((Expr::Const(c), rest)) if *c == -1.0 && !rest.is_empty() => (true, rest),
                    _ => (false, factors.as_slice()),
                };
                let parts = rest
                    .iter()
                    .map(|f| self.print(f))
                    .collect::<Result<Vec<_>, _>>()?;
                if negate {
                    format!("(-{})", parts.join("*"))
                } else {
                    format!("({})", parts.join("*"))
                }
            }
            Expr::Pow(base, exponent) => {
                let b = self.print(base)?;
                match exponent.as_const() {
                    Some(e) => match as_integer(e) {
                        Some(n) if n > 0 && n <= MAX_EXPANDED_POWER => {
                            format!("({})", vec![b; n as usize].join("*"))
                        }
                        Some(n) if n < 0 && -n <= MAX_EXPANDED_POWER => {
                            format!("(1.0/({}))", vec![b; (-n) as usize].join("*"))
                        }
                        _ if e == 0.5 => format!("sqrt({b})"),
                        _ => format!("pow({b}, {})", c_number(e)),
                    },
                    None => format!("pow({b}, {})", self.print(exponent)?),
                }
            }
            Expr::Func(function, arg) => {
                let name = match function {
                    Function::Exp => "exp",
                    Function::Ln => "log",
                    Function::Sin => "sin",
                    Function::Cos => "cos",
                    Function::Sqrt => "sqrt",
                };
                format!("{name}({})", self.print(arg)?)
            }
        })
    }
}

/// Bodies of the two kernels of a compiled module:
/// `void <name>_f(double t, const double *y, const double *p, double *out)`
/// and `<name>_j` writing the row-major Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub struct CModule {
    pub rhs_body: String,
    pub jac_body: String,
}

fn render_body(
    exprs: &[Expr],
    states: &[String],
    params: &[String],
    time: Option<&str>,
) -> Result<String, BackendError> {
    let mut reserved: HashSet<String> = states.iter().chain(params).cloned().collect();
    if let Some(time) = time {
        reserved.insert(time.to_string());
    }
    // C identifiers the generated code already uses.
    for name in ["t", "y", "p", "out"] {
        reserved.insert(name.to_string());
    }

    let reduced = cse(exprs, &reserved, "x");
    let mut printer = CPrinter::new(states, params, time);
    let mut body = String::new();
    for (name, expr) in &reduced.replacements {
        let code = printer.print(expr)?;
        printer.bind_local(name);
        // writing to a String cannot fail
        let _ = writeln!(body, "    const double {name} = {code};");
    }
    for (i, expr) in reduced.reduced.iter().enumerate() {
        let _ = writeln!(body, "    out[{i}] = {};", printer.print(expr)?);
    }
    Ok(body)
}

impl CModule {
    /// `jacobian` is row-major, `states.len()` columns per row.
    pub fn generate(
        rhs: &[Expr],
        jacobian: &[Expr],
        states: &[String],
        params: &[String],
        time: Option<&str>,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            rhs_body: render_body(rhs, states, params, time)?,
            jac_body: render_body(jacobian, states, params, time)?,
        })
    }

    /// Stable fingerprint of the generated code, used to name the module.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.rhs_body.hash(&mut hasher);
        self.jac_body.hash(&mut hasher);
        hasher.finish()
    }

    pub fn source(&self, module: &str) -> String {
        let signature = "(double t, const double *restrict y, const double *restrict p, double *restrict out)";
        format!(
            "/* generated module {module} */\n\
             #include <math.h>\n\n\
             void {module}_f{signature}\n{{\n    (void)t; (void)y; (void)p;\n{}}}\n\n\
             void {module}_j{signature}\n{{\n    (void)t; (void)y; (void)p;\n{}}}\n",
            self.rhs_body, self.jac_body
        )
    }
}
