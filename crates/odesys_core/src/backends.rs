//! Numeric evaluation backends for a `SymbolicSystem`.
//!
//! Every backend exposes the same `Evaluator` interface. They differ in how
//! the expressions are turned into numbers:
//! - `Direct` walks the expression trees on each call.
//! - `Compiled` generates C, builds a shared library with the system
//!   compiler and calls into it.
//! - `Jit` compiles the right-hand side to bytecode on first use and runs it
//!   with `f64` for f and with dual numbers for J.

pub mod compiled;
pub mod direct;
pub mod jit;

pub use compiled::{CompiledBackend, Toolchain};
pub use direct::DirectBackend;
pub use jit::JitBackend;

use crate::error::BackendError;
use crate::odesys::SymbolicSystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric view of an ODE right-hand side and its Jacobian.
///
/// `y` has one entry per state, `params` one per parameter. `f_eval` writes
/// dy/dt into `out`; `j_eval` writes df/dy row-major into `out` (dim*dim).
pub trait Evaluator {
    fn f_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]);
    fn j_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Direct,
    Compiled,
    Jit,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Direct, BackendKind::Compiled, BackendKind::Jit];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Direct => "direct",
            BackendKind::Compiled => "compiled",
            BackendKind::Jit => "jit",
        };
        write!(f, "{name}")
    }
}

pub enum Backend {
    Direct(DirectBackend),
    Compiled(CompiledBackend),
    Jit(JitBackend),
}

impl Backend {
    /// Binds `system` to the requested backend. Fails if an expression uses a
    /// symbol that is neither a state, a parameter nor the time variable.
    pub fn setup(
        kind: BackendKind,
        system: &SymbolicSystem,
        toolchain: &Toolchain,
    ) -> Result<Self, BackendError> {
        check_bound(system)?;
        Ok(match kind {
            BackendKind::Direct => Backend::Direct(DirectBackend::new(system)),
            BackendKind::Compiled => Backend::Compiled(CompiledBackend::new(system, toolchain)?),
            BackendKind::Jit => Backend::Jit(JitBackend::new(system)),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Direct(_) => BackendKind::Direct,
            Backend::Compiled(_) => BackendKind::Compiled,
            Backend::Jit(_) => BackendKind::Jit,
        }
    }
}

impl Evaluator for Backend {
    fn f_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        match self {
            Backend::Direct(b) => b.f_eval(t, y, params, out),
            Backend::Compiled(b) => b.f_eval(t, y, params, out),
            Backend::Jit(b) => b.f_eval(t, y, params, out),
        }
    }

    fn j_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        match self {
            Backend::Direct(b) => b.j_eval(t, y, params, out),
            Backend::Compiled(b) => b.j_eval(t, y, params, out),
            Backend::Jit(b) => b.j_eval(t, y, params, out),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

fn check_bound(system: &SymbolicSystem) -> Result<(), BackendError> {
    for expr in system.rhs() {
        for name in expr.free_symbols() {
            let known = system.states().contains(&name)
                || system.params().contains(&name)
                || system.time() == Some(name.as_str());
            if !known {
                return Err(BackendError::UnboundSymbol(name));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odesys::SymbolicSystem;
    use approx::assert_relative_eq;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn nonlinear_system() -> SymbolicSystem {
        SymbolicSystem::from_strings(
            &["-k1*A + k2*B*C^2", "k1*A - k2*B*C^2 - exp(-B)*sin(t)", "2*k2*B*C^2 - sqrt(C)/(A + 1)"],
            &["A", "B", "C"],
            &["k1", "k2"],
            Some("t"),
        )
        .expect("valid system")
    }

    fn available_kinds() -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| *kind != BackendKind::Compiled || Toolchain::from_env().is_available())
            .collect()
    }

    #[test]
    fn setup_rejects_unbound_symbols() {
        init();
        let system =
            SymbolicSystem::from_strings(&["-k*A*D"], &["A"], &["k"], None).expect("parses");
        for kind in BackendKind::ALL {
            let err = Backend::setup(kind, &system, &Toolchain::default())
                .expect_err("D is not declared");
            assert!(matches!(err, BackendError::UnboundSymbol(ref name) if name == "D"));
        }
    }

    #[test]
    fn backends_agree_on_rhs_and_jacobian() {
        init();
        let system = nonlinear_system();
        let toolchain = Toolchain::from_env();
        let y = [0.7, 1.3, 0.4];
        let params = [2.5, 0.3];
        let t = 0.9;

        let reference = Backend::setup(BackendKind::Direct, &system, &toolchain).expect("direct");
        let mut f_ref = [0.0; 3];
        let mut j_ref = [0.0; 9];
        reference.f_eval(t, &y, &params, &mut f_ref);
        reference.j_eval(t, &y, &params, &mut j_ref);

        for kind in available_kinds() {
            let backend = Backend::setup(kind, &system, &toolchain).expect("backend setup");
            assert_eq!(backend.kind(), kind);
            let mut f = [0.0; 3];
            let mut j = [0.0; 9];
            backend.f_eval(t, &y, &params, &mut f);
            backend.j_eval(t, &y, &params, &mut j);
            for i in 0..3 {
                assert_relative_eq!(f[i], f_ref[i], epsilon = 1e-12, max_relative = 1e-12);
            }
            for i in 0..9 {
                assert_relative_eq!(j[i], j_ref[i], epsilon = 1e-12, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn direct_jacobian_matches_hand_derivative() {
        let system =
            SymbolicSystem::from_strings(&["-k*A^2"], &["A"], &["k"], None).expect("parses");
        let backend =
            Backend::setup(BackendKind::Direct, &system, &Toolchain::default()).expect("direct");
        let mut j = [0.0];
        backend.j_eval(0.0, &[3.0], &[0.5], &mut j);
        assert_eq!(j[0], -3.0);
    }

    #[test]
    fn backend_kind_serializes_lowercase() {
        let json = serde_json::to_string(&BackendKind::Jit).expect("serialize");
        assert_eq!(json, "\"jit\"");
        let kind: BackendKind = serde_json::from_str("\"compiled\"").expect("deserialize");
        assert_eq!(kind, BackendKind::Compiled);
        assert_eq!(BackendKind::default().to_string(), "direct");
    }
}
