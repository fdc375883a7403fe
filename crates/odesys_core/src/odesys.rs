//! ODE systems: symbolic right-hand sides bound to a numeric backend.

use crate::backends::{Backend, BackendKind, Evaluator, Toolchain};
use crate::error::{ModelError, Result};
use crate::integrate::{integrate, IntegratorSettings, Method, Trajectory};
use crate::parser::parse;
use crate::reaction::{rate_equations, Reaction};
use crate::symbolic::{self, Expr};
use crate::traits::DynamicalSystem;
use log::info;
use nalgebra::{DMatrix, DVector};
use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};

/// Right-hand side expressions together with the names they are written in.
///
/// The symbolic Jacobian is derived on first request and cached.
#[derive(Debug, Clone)]
pub struct SymbolicSystem {
    rhs: Vec<Expr>,
    states: Vec<String>,
    params: Vec<String>,
    time: Option<String>,
    jacobian: OnceCell<Vec<Vec<Expr>>>,
}

impl SymbolicSystem {
    /// Declares dy/dt = rhs over `states` with parameters `params`.
    pub fn new(
        rhs: Vec<Expr>,
        states: Vec<String>,
        params: Vec<String>,
    ) -> std::result::Result<Self, ModelError> {
        if rhs.len() != states.len() {
            return Err(ModelError::DimensionMismatch {
                what: "right-hand side",
                expected: states.len(),
                got: rhs.len(),
            });
        }
        let mut seen = HashSet::new();
        for name in states.iter().chain(&params) {
            if !seen.insert(name.as_str()) {
                return Err(ModelError::DuplicateSymbol(name.clone()));
            }
        }
        Ok(Self::from_parts(rhs, states, params, None))
    }

    pub(crate) fn from_parts(
        rhs: Vec<Expr>,
        states: Vec<String>,
        params: Vec<String>,
        time: Option<String>,
    ) -> Self {
        Self {
            rhs,
            states,
            params,
            time,
            jacobian: OnceCell::new(),
        }
    }

    /// Makes the system non-autonomous: `name` refers to the time variable.
    pub fn with_time(mut self, name: &str) -> std::result::Result<Self, ModelError> {
        if self.states.iter().chain(&self.params).any(|s| s == name) {
            return Err(ModelError::DuplicateSymbol(name.to_string()));
        }
        self.time = Some(name.to_string());
        Ok(self)
    }

    /// Parses one equation string per state.
    pub fn from_strings(
        rhs: &[&str],
        states: &[&str],
        params: &[&str],
        time: Option<&str>,
    ) -> Result<Self> {
        let exprs = rhs.iter().map(|s| parse(s)).collect::<std::result::Result<Vec<_>, _>>()?;
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let system = Self::new(exprs, owned(states), owned(params))?;
        Ok(match time {
            Some(name) => system.with_time(name)?,
            None => system,
        })
    }

    pub fn rhs(&self) -> &[Expr] {
        &self.rhs
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn dimension(&self) -> usize {
        self.states.len()
    }

    /// d rhs_i / d state_j, one row per equation.
    pub fn jacobian(&self) -> &[Vec<Expr>] {
        self.jacobian
            .get_or_init(|| symbolic::jacobian(&self.rhs, &self.states))
    }
}

/// A symbolic system with an attached evaluation backend.
#[derive(Debug)]
pub struct OdeSys {
    system: SymbolicSystem,
    backend: Backend,
}

impl OdeSys {
    /// Binds `system` to a backend, taking the C toolchain from the environment.
    pub fn new(system: SymbolicSystem, kind: BackendKind) -> Result<Self> {
        Self::with_toolchain(system, kind, &Toolchain::from_env())
    }

    pub fn with_toolchain(
        system: SymbolicSystem,
        kind: BackendKind,
        toolchain: &Toolchain,
    ) -> Result<Self> {
        let backend = Backend::setup(kind, &system, toolchain)?;
        Ok(Self { system, backend })
    }

    /// Mass-action kinetics for `reactions`; the parameters are the rate
    /// constants in order of first use.
    pub fn from_reactions<S: AsRef<str>>(
        reactions: &[Reaction],
        species: &[S],
        kind: BackendKind,
    ) -> Result<Self> {
        let equations = rate_equations(reactions, species)?;
        Self::new(equations.into_system(), kind)
    }

    pub fn system(&self) -> &SymbolicSystem {
        &self.system
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn states(&self) -> &[String] {
        self.system.states()
    }

    pub fn params(&self) -> &[String] {
        self.system.params()
    }

    pub fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn check_lengths(&self, y: &[f64], params: &[f64]) -> std::result::Result<(), ModelError> {
        if y.len() != self.dimension() {
            return Err(ModelError::DimensionMismatch {
                what: "state",
                expected: self.dimension(),
                got: y.len(),
            });
        }
        if params.len() != self.params().len() {
            return Err(ModelError::DimensionMismatch {
                what: "parameter",
                expected: self.params().len(),
                got: params.len(),
            });
        }
        Ok(())
    }

    /// dy/dt at (y, t).
    pub fn f_eval(
        &self,
        y: &[f64],
        t: f64,
        params: &[f64],
    ) -> std::result::Result<DVector<f64>, ModelError> {
        self.check_lengths(y, params)?;
        let mut out = DVector::zeros(self.dimension());
        self.backend.f_eval(t, y, params, out.as_mut_slice());
        Ok(out)
    }

    /// Jacobian df/dy at (y, t).
    pub fn j_eval(
        &self,
        y: &[f64],
        t: f64,
        params: &[f64],
    ) -> std::result::Result<DMatrix<f64>, ModelError> {
        self.check_lengths(y, params)?;
        let n = self.dimension();
        let mut out = vec![0.0; n * n];
        self.backend.j_eval(t, y, params, &mut out);
        Ok(DMatrix::from_row_slice(n, n, &out))
    }

    /// Ratio of the largest to the smallest non-zero eigenvalue magnitude of
    /// the Jacobian. Returns 1 when the Jacobian has no non-zero eigenvalue.
    pub fn stiffness_ratio(
        &self,
        y: &[f64],
        t: f64,
        params: &[f64],
    ) -> std::result::Result<f64, ModelError> {
        let jacobian = self.j_eval(y, t, params)?;
        let magnitudes: Vec<f64> = jacobian
            .complex_eigenvalues()
            .iter()
            .map(|lambda| lambda.norm())
            .collect();
        let largest = magnitudes.iter().copied().fold(0.0, f64::max);
        let smallest = magnitudes
            .iter()
            .copied()
            .filter(|m| *m > largest * 1e-12)
            .fold(f64::INFINITY, f64::min);
        if largest > 0.0 && smallest.is_finite() {
            Ok(largest / smallest)
        } else {
            Ok(1.0)
        }
    }

    /// Orders a name -> value map by the system's parameter list.
    pub fn params_from_map(
        &self,
        values: &HashMap<String, f64>,
    ) -> std::result::Result<Vec<f64>, ModelError> {
        if let Some(unknown) = values.keys().find(|k| !self.params().contains(*k)) {
            return Err(ModelError::UnknownParameter(unknown.clone()));
        }
        self.params()
            .iter()
            .map(|name| {
                values
                    .get(name)
                    .copied()
                    .ok_or_else(|| ModelError::MissingParameter(name.clone()))
            })
            .collect()
    }

    /// Orders initial conditions by state; states not mentioned start at 0.
    pub fn initial_state(
        &self,
        values: &HashMap<String, f64>,
    ) -> std::result::Result<Vec<f64>, ModelError> {
        if let Some(unknown) = values.keys().find(|k| !self.states().contains(*k)) {
            return Err(ModelError::UnknownInitialCondition(unknown.clone()));
        }
        Ok(self
            .states()
            .iter()
            .map(|name| values.get(name).copied().unwrap_or(0.0))
            .collect())
    }

    /// Integrates from `tout[0]` and reports the state at each time in `tout`.
    pub fn integrate(
        &self,
        tout: &[f64],
        y0: &[f64],
        params: &[f64],
        method: Method,
        settings: &IntegratorSettings,
    ) -> Result<Trajectory> {
        if params.len() != self.params().len() {
            return Err(ModelError::DimensionMismatch {
                what: "parameter",
                expected: self.params().len(),
                got: params.len(),
            }
            .into());
        }
        let bound = BoundSystem {
            backend: &self.backend,
            params,
            dim: self.dimension(),
            autonomous: self.system.time().is_none(),
        };
        let trajectory = integrate(&bound, tout, y0, method, settings)?;
        info!(
            "integrated {} states over [{}, {}] with {:?} on the {} backend: {}",
            self.dimension(),
            tout[0],
            tout[tout.len() - 1],
            method,
            self.backend_kind(),
            trajectory.stats
        );
        Ok(trajectory)
    }

    /// `integrate` with initial conditions and parameters given by name.
    pub fn integrate_named(
        &self,
        tout: &[f64],
        initial: &HashMap<String, f64>,
        params: &HashMap<String, f64>,
        method: Method,
        settings: &IntegratorSettings,
    ) -> Result<Trajectory> {
        let y0 = self.initial_state(initial)?;
        let p = self.params_from_map(params)?;
        self.integrate(tout, &y0, &p, method, settings)
    }
}

/// An `OdeSys` with its parameters fixed, as seen by the solvers.
struct BoundSystem<'a> {
    backend: &'a Backend,
    params: &'a [f64],
    dim: usize,
    autonomous: bool,
}

impl DynamicalSystem<f64> for BoundSystem<'_> {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.backend.f_eval(t, x, self.params, out);
    }

    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) -> bool {
        self.backend.j_eval(t, x, self.params, out);
        true
    }

    fn is_autonomous(&self) -> bool {
        self.autonomous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_relative_eq;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn decay(kind: BackendKind) -> OdeSys {
        let reactions = vec![Reaction::new("k", [("A", 1)], [("A", -1), ("B", 1)])];
        OdeSys::from_reactions(&reactions, &["A", "B"], kind).expect("valid network")
    }

    fn kinds() -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| *kind != BackendKind::Compiled || Toolchain::from_env().is_available())
            .collect()
    }

    /// Tighter tolerances for the second-order Rosenbrock23 so every method
    /// meets the same accuracy bound.
    fn settings_for(method: Method) -> IntegratorSettings {
        match method {
            Method::Rosenbrock23 => IntegratorSettings {
                rtol: 1e-10,
                atol: 1e-10,
                ..IntegratorSettings::default()
            },
            _ => IntegratorSettings::default(),
        }
    }

    fn map(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn system_declaration_is_validated() {
        let err = SymbolicSystem::new(
            vec![Expr::symbol("x")],
            vec!["x".to_string(), "y".to_string()],
            vec![],
        )
        .expect_err("one equation for two states");
        assert!(matches!(err, ModelError::DimensionMismatch { expected: 2, got: 1, .. }));

        assert_err_contains(
            SymbolicSystem::from_strings(&["-k*x"], &["x"], &["x"], None),
            "declared more than once",
        );
        assert_err_contains(
            SymbolicSystem::from_strings(&["-k*x"], &["x"], &["k"], Some("k")),
            "declared more than once",
        );
        assert_err_contains(
            SymbolicSystem::from_strings(&["-k*"], &["x"], &["k"], None),
            "unexpected end of input",
        );
    }

    #[test]
    fn symbolic_jacobian_is_cached() {
        let system =
            SymbolicSystem::from_strings(&["-k*x*y", "k*x*y"], &["x", "y"], &["k"], None)
                .expect("valid");
        let first = system.jacobian().as_ptr();
        let second = system.jacobian().as_ptr();
        assert_eq!(first, second);
        assert_eq!(system.jacobian()[0][0], parse("-k*y").expect("parse"));
    }

    #[test]
    fn f_and_j_have_system_shapes() {
        let sys = decay(BackendKind::Direct);
        let f = sys.f_eval(&[2.0, 0.0], 0.0, &[0.5]).expect("f");
        assert_eq!(f, DVector::from_vec(vec![-1.0, 1.0]));
        let j = sys.j_eval(&[2.0, 0.0], 0.0, &[0.5]).expect("j");
        assert_eq!(j, DMatrix::from_row_slice(2, 2, &[-0.5, 0.0, 0.5, 0.0]));

        let err = sys.f_eval(&[1.0], 0.0, &[0.5]).expect_err("short state");
        assert_eq!(
            err,
            ModelError::DimensionMismatch {
                what: "state",
                expected: 2,
                got: 1
            }
        );
        assert!(sys.j_eval(&[1.0, 1.0], 0.0, &[]).is_err());
    }

    #[test]
    fn named_inputs_are_ordered_and_checked() {
        let sys = decay(BackendKind::Direct);
        assert_eq!(sys.initial_state(&map(&[("A", 1.5)])).expect("ok"), vec![1.5, 0.0]);
        assert_eq!(
            sys.initial_state(&map(&[("Z", 1.0)])),
            Err(ModelError::UnknownInitialCondition("Z".to_string()))
        );
        assert_eq!(sys.params_from_map(&map(&[("k", 2.0)])).expect("ok"), vec![2.0]);
        assert_eq!(
            sys.params_from_map(&map(&[])),
            Err(ModelError::MissingParameter("k".to_string()))
        );
        assert_eq!(
            sys.params_from_map(&map(&[("k", 1.0), ("q", 1.0)])),
            Err(ModelError::UnknownParameter("q".to_string()))
        );
    }

    #[test]
    fn first_order_decay_matches_analytic_solution() {
        init();
        let tout: Vec<f64> = (0..=10).map(|i| i as f64 * 0.3).collect();
        for kind in kinds() {
            let sys = decay(kind);
            for method in [
                Method::Rk4 { dt: 1e-3 },
                Method::Tsit5,
                Method::Rosenbrock23,
                Method::Auto,
            ] {
                let traj = sys
                    .integrate_named(
                        &tout,
                        &map(&[("A", 2.0)]),
                        &map(&[("k", 0.7)]),
                        method,
                        &settings_for(method),
                    )
                    .expect("integrates");
                for (i, t) in tout.iter().enumerate() {
                    let a = 2.0 * (-0.7 * t).exp();
                    assert_relative_eq!(traj.states[(i, 0)], a, epsilon = 1e-6);
                    assert_relative_eq!(traj.states[(i, 1)], 2.0 - a, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn non_autonomous_systems_see_the_time_variable() {
        let system =
            SymbolicSystem::from_strings(&["cos(t)"], &["x"], &[], Some("t")).expect("valid");
        for kind in kinds() {
            let sys = OdeSys::new(system.clone(), kind).expect("backend");
            for method in [Method::Tsit5, Method::Rosenbrock23] {
                let traj = sys
                    .integrate(&[0.0, 2.0], &[0.0], &[], method, &settings_for(method))
                    .expect("integrates");
                assert_relative_eq!(traj.final_state()[0], 2.0_f64.sin(), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn integrate_rejects_wrong_parameter_count() {
        let sys = decay(BackendKind::Jit);
        let result = sys.integrate(
            &[0.0, 1.0],
            &[1.0, 0.0],
            &[],
            Method::Tsit5,
            &IntegratorSettings::default(),
        );
        assert!(matches!(result, Err(Error::Model(ModelError::DimensionMismatch { .. }))));
        assert_err_contains(
            sys.integrate(
                &[1.0, 0.0],
                &[1.0, 0.0],
                &[1.0],
                Method::Tsit5,
                &IntegratorSettings::default(),
            ),
            "strictly increasing",
        );
    }

    #[test]
    fn stiffness_ratio_of_diagonal_system() {
        let system = SymbolicSystem::from_strings(
            &["-a*x", "-b*y", "0"],
            &["x", "y", "z"],
            &["a", "b"],
            None,
        )
        .expect("valid");
        let sys = OdeSys::new(system, BackendKind::Direct).expect("backend");
        let ratio = sys
            .stiffness_ratio(&[1.0, 1.0, 1.0], 0.0, &[1e4, 2.0])
            .expect("ratio");
        assert_relative_eq!(ratio, 5e3, max_relative = 1e-9);
    }
}
