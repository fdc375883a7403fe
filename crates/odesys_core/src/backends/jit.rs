use super::Evaluator;
use crate::autodiff::{forward_jacobian, Dual};
use crate::equation_engine::{Bytecode, Compiler, EquationSystem, OpCode};
use crate::odesys::SymbolicSystem;
use crate::symbolic::Expr;
use log::{debug, warn};
use std::cell::{OnceCell, RefCell};
use std::time::Instant;

/// Bytecode evaluator specialised on first use.
///
/// The right-hand side is compiled once, the first time either f or J is
/// requested. The Jacobian is obtained by running the same program on dual
/// numbers, one column per run, so it never needs the symbolic Jacobian.
pub struct JitBackend {
    rhs: Vec<Expr>,
    states: Vec<String>,
    params: Vec<String>,
    time: Option<String>,
    program: OnceCell<EquationSystem>,
    stack: RefCell<Vec<f64>>,
    dual_stack: RefCell<Vec<Dual>>,
    dual_params: RefCell<Vec<Dual>>,
}

impl JitBackend {
    pub fn new(system: &SymbolicSystem) -> Self {
        Self {
            rhs: system.rhs().to_vec(),
            states: system.states().to_vec(),
            params: system.params().to_vec(),
            time: system.time().map(str::to_string),
            program: OnceCell::new(),
            stack: RefCell::new(Vec::new()),
            dual_stack: RefCell::new(Vec::new()),
            dual_params: RefCell::new(Vec::new()),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.program.get().is_some()
    }

    fn program(&self) -> &EquationSystem {
        self.program.get_or_init(|| {
            let started = Instant::now();
            let compiler = Compiler::new(&self.states, &self.params, self.time.as_deref());
            match EquationSystem::compile(&compiler, &self.rhs) {
                Ok(program) => {
                    debug!(
                        "jit: compiled {} equations into {} ops in {:?}",
                        program.dimension(),
                        program.op_count(),
                        started.elapsed()
                    );
                    program
                }
                Err(err) => {
                    // Only reachable when constructed without `Backend::setup`.
                    warn!("jit: compilation failed ({err}); evaluating to NaN");
                    let poisoned = Bytecode {
                        ops: vec![OpCode::LoadConst(f64::NAN)],
                    };
                    EquationSystem {
                        equations: vec![poisoned; self.rhs.len()],
                    }
                }
            }
        })
    }
}

impl Evaluator for JitBackend {
    fn f_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        let program = self.program();
        let mut stack = self.stack.borrow_mut();
        program.apply(t, y, params, &mut *stack, out);
    }

    fn j_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        let program = self.program();
        let mut stack = self.dual_stack.borrow_mut();
        let mut dual_params = self.dual_params.borrow_mut();
        dual_params.clear();
        dual_params.extend(params.iter().map(|&p| Dual::constant(p)));

        let time = Dual::constant(t);
        forward_jacobian(y, out, |x, column| {
            program.apply(time, x, &dual_params[..], &mut *stack, column);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_lazily_on_first_call() {
        let _ = env_logger::builder().is_test(true).try_init();
        let system = SymbolicSystem::from_strings(&["-k*A*B", "k*A*B"], &["A", "B"], &["k"], None)
            .expect("valid system");
        let backend = JitBackend::new(&system);
        assert!(!backend.is_compiled());

        let mut j = [0.0; 4];
        backend.j_eval(0.0, &[2.0, 3.0], &[0.5], &mut j);
        assert!(backend.is_compiled());
        assert_eq!(j, [-1.5, -1.0, 1.5, 1.0]);

        let mut f = [0.0; 2];
        backend.f_eval(0.0, &[2.0, 3.0], &[0.5], &mut f);
        assert_eq!(f, [-3.0, 3.0]);
    }
}
