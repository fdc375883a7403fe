use super::Evaluator;
use crate::odesys::SymbolicSystem;
use crate::symbolic::Expr;
use std::collections::HashMap;

/// Tree-walking evaluator. Each call binds names to values and evaluates the
/// expressions as they are.
pub struct DirectBackend {
    rhs: Vec<Expr>,
    jacobian: Vec<Expr>,
    states: Vec<String>,
    params: Vec<String>,
    time: Option<String>,
}

impl DirectBackend {
    pub fn new(system: &SymbolicSystem) -> Self {
        Self {
            rhs: system.rhs().to_vec(),
            jacobian: system.jacobian().iter().flatten().cloned().collect(),
            states: system.states().to_vec(),
            params: system.params().to_vec(),
            time: system.time().map(str::to_string),
        }
    }

    fn environment(&self, t: f64, y: &[f64], params: &[f64]) -> HashMap<&str, f64> {
        let mut env: HashMap<&str, f64> =
            HashMap::with_capacity(self.states.len() + self.params.len() + 1);
        for (name, value) in self.params.iter().zip(params) {
            env.insert(name, *value);
        }
        for (name, value) in self.states.iter().zip(y) {
            env.insert(name, *value);
        }
        if let Some(time) = &self.time {
            env.insert(time, t);
        }
        env
    }

    fn evaluate_into(exprs: &[Expr], env: &HashMap<&str, f64>, out: &mut [f64]) {
        for (slot, expr) in out.iter_mut().zip(exprs) {
            *slot = expr.eval(env).unwrap_or(f64::NAN);
        }
    }
}

impl Evaluator for DirectBackend {
    fn f_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        let env = self.environment(t, y, params);
        Self::evaluate_into(&self.rhs, &env, out);
    }

    fn j_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        let env = self.environment(t, y, params);
        Self::evaluate_into(&self.jacobian, &env, out);
    }
}
