use crate::error::BackendError;
use crate::symbolic::{as_integer, Expr, Function};
use crate::traits::{constant, Scalar};
use std::collections::HashMap;

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pushes the current time.
    LoadTime,
    /// Pops `n` values, pushes their sum.
    Add(usize),
    /// Pops `n` values, pushes their product.
    Mul(usize),
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes a^n for a compile-time integer n.
    PowI(i32),
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Function),
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: instructions to run.
/// - `t`, `vars`, `params`: time, state vector and parameter vector (read-only).
/// - `stack`: a mutable buffer for intermediate computations.
///
/// Returns the value left on the stack.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        t: T,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(constant(val)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Add(n) => {
                    let mut acc = T::zero();
                    for _ in 0..n {
                        acc = acc + pop(stack);
                    }
                    stack.push(acc);
                }
                OpCode::Mul(n) => {
                    let mut acc = T::one();
                    for _ in 0..n {
                        acc = acc * pop(stack);
                    }
                    stack.push(acc);
                }
                OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a.powf(b));
                }
                OpCode::PowI(n) => {
                    let a = pop(stack);
                    stack.push(a.powi(n));
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(function) => {
                    let a = pop(stack);
                    stack.push(function.apply(a));
                }
            }
        }

        // An empty program evaluates to zero.
        stack.pop().unwrap_or_else(T::zero)
    }
}

/// Compiles symbolic expressions into `Bytecode`.
/// Resolves state, parameter and time symbols to load instructions.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
    pub time: Option<String>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String], time: Option<&str>) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Self {
            var_map,
            param_map,
            time: time.map(str::to_string),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, BackendError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), BackendError> {
        match expr {
            Expr::Const(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Symbol(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if self.time.as_deref() == Some(name.as_str()) {
                    ops.push(OpCode::LoadTime);
                } else {
                    return Err(BackendError::UnboundSymbol(name.clone()));
                }
            }
            Expr::Add(terms) => {
                for term in terms {
                    self.compile_recursive(term, ops)?;
                }
                ops.push(OpCode::Add(terms.len()));
            }
            Expr::Mul(factors) => {
                // A leading -1 coefficient becomes a negation.
                let (negate, rest) = match factors.split_first() {
                    Some((Expr::Const(c), rest)) if *c == -1.0 => (true, rest),
                    _ => (false, factors.as_slice()),
                };
                for factor in rest {
                    self.compile_recursive(factor, ops)?;
                }
                if rest.len() > 1 {
                    ops.push(OpCode::Mul(rest.len()));
                }
                if negate {
                    ops.push(OpCode::Neg);
                }
            }
            Expr::Pow(base, exponent) => {
                self.compile_recursive(base, ops)?;
                match exponent.as_const().and_then(as_integer) {
                    Some(n) => ops.push(OpCode::PowI(n)),
                    None => {
                        self.compile_recursive(exponent, ops)?;
                        ops.push(OpCode::Pow);
                    }
                }
            }
            Expr::Func(function, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(*function));
            }
        }
        Ok(())
    }
}

/// One compiled program per right-hand-side component.
#[derive(Debug, Clone)]
pub struct EquationSystem {
    pub equations: Vec<Bytecode>,
}

impl EquationSystem {
    pub fn compile(compiler: &Compiler, exprs: &[Expr]) -> Result<Self, BackendError> {
        let equations = exprs
            .iter()
            .map(|e| compiler.compile(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { equations })
    }

    pub fn dimension(&self) -> usize {
        self.equations.len()
    }

    pub fn op_count(&self) -> usize {
        self.equations.iter().map(|b| b.ops.len()).sum()
    }

    pub fn apply<T: Scalar>(
        &self,
        t: T,
        x: &[T],
        params: &[T],
        stack: &mut Vec<T>,
        out: &mut [T],
    ) {
        for (slot, eq) in out.iter_mut().zip(&self.equations) {
            *slot = VM::execute(eq, t, x, params, stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;
    use crate::parser::parse;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn executes_mass_action_rate() {
        let compiler = Compiler::new(&names(&["A", "B"]), &names(&["k"]), None);
        let code = compiler
            .compile(&parse("-k*A^2*B + 1").expect("parse"))
            .expect("compile");
        let mut stack = Vec::new();
        let value = VM::execute::<f64>(&code, 0.0, &[2.0, 3.0], &[0.5], &mut stack);
        assert!((value - (1.0 - 0.5 * 4.0 * 3.0)).abs() < 1e-14);
    }

    #[test]
    fn loads_time_when_declared() {
        let compiler = Compiler::new(&names(&["x"]), &[], Some("t"));
        let code = compiler.compile(&parse("sin(t)*x").expect("parse")).expect("compile");
        let mut stack = Vec::new();
        let value = VM::execute::<f64>(&code, 0.5, &[2.0], &[], &mut stack);
        assert!((value - 2.0 * 0.5_f64.sin()).abs() < 1e-15);
    }

    #[test]
    fn rejects_unbound_symbols() {
        let compiler = Compiler::new(&names(&["x"]), &[], None);
        let err = compiler
            .compile(&parse("x + y").expect("parse"))
            .expect_err("y is unbound");
        assert!(matches!(err, BackendError::UnboundSymbol(name) if name == "y"));
    }

    #[test]
    fn same_program_runs_on_dual_numbers() {
        let compiler = Compiler::new(&names(&["x"]), &names(&["a"]), None);
        let system =
            EquationSystem::compile(&compiler, &[parse("a*x^3").expect("parse")]).expect("compile");
        let mut stack = Vec::new();
        let mut out = [Dual::constant(0.0)];
        system.apply(
            Dual::constant(0.0),
            &[Dual::new(2.0, 1.0)],
            &[Dual::constant(3.0)],
            &mut stack,
            &mut out,
        );
        assert_eq!(out[0].val, 24.0);
        assert_eq!(out[0].eps, 36.0);
    }
}
