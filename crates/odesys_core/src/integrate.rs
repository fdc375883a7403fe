//! Integration driver: runs a solver over a `DynamicalSystem` and reports
//! the state at each requested output time.

use crate::error::IntegrationError;
use crate::solvers::{AdaptiveStepper, Rosenbrock23, Tolerances, Tsit5, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::time::Instant;

/// Consecutive accepted steps with `h * rho` above the stability bound
/// before Tsit5 declares the problem stiff.
const STIFF_STEPS: usize = 15;
const STIFF_BOUND: f64 = 3.25;
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Method {
    /// Fixed-step classic Runge-Kutta. Each output interval is divided into
    /// equal substeps no longer than `dt`.
    Rk4 { dt: f64 },
    /// Adaptive explicit 5(4) pair. Fails with `StiffnessDetected` when the
    /// step size is limited by stability.
    Tsit5,
    /// Adaptive linearly implicit 2(3) method using the Jacobian.
    Rosenbrock23,
    /// Starts with Tsit5 and switches to Rosenbrock23 for the rest of the
    /// run once stiffness is detected.
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub rtol: f64,
    pub atol: f64,
    pub first_step: Option<f64>,
    pub max_steps: usize,
    /// Smallest step before giving up; 0 means ten ulps of the current time.
    pub min_step: f64,
    /// Use the backend's analytic Jacobian instead of finite differences.
    pub use_jacobian: bool,
    /// Lets `Method::Tsit5` report `StiffnessDetected`.
    pub stiffness_check: bool,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-8,
            first_step: None,
            max_steps: 100_000,
            min_step: 0.0,
            use_jacobian: true,
            stiffness_check: true,
        }
    }
}

/// Counters collected during one integration call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    /// Right-hand side evaluations, including finite-difference Jacobians.
    pub nfev: usize,
    /// Analytic Jacobian evaluations.
    pub njev: usize,
    pub nlu: usize,
    pub naccepted: usize,
    pub nrejected: usize,
    pub method_switches: usize,
    /// Wall-clock seconds.
    pub elapsed: f64,
}

impl fmt::Display for SolverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nfev={} njev={} nlu={} accepted={} rejected={} switches={} time={:.3e}s",
            self.nfev,
            self.njev,
            self.nlu,
            self.naccepted,
            self.nrejected,
            self.method_switches,
            self.elapsed
        )
    }
}

/// States at the requested output times, one row per time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: DMatrix<f64>,
    pub stats: SolverStats,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_state(&self) -> Vec<f64> {
        let last = self.states.nrows().saturating_sub(1);
        self.states.row(last).iter().copied().collect()
    }

    /// Time series of one state component.
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.states.column(index).iter().copied().collect()
    }
}

/// Counts right-hand side and Jacobian calls made by the solvers.
pub(crate) struct CountingSystem<'a, S> {
    inner: &'a S,
    use_jacobian: bool,
    nfev: Cell<usize>,
    njev: Cell<usize>,
}

impl<'a, S: DynamicalSystem<f64>> CountingSystem<'a, S> {
    pub(crate) fn new(inner: &'a S, use_jacobian: bool) -> Self {
        Self {
            inner,
            use_jacobian,
            nfev: Cell::new(0),
            njev: Cell::new(0),
        }
    }
}

impl<S: DynamicalSystem<f64>> DynamicalSystem<f64> for CountingSystem<'_, S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.nfev.set(self.nfev.get() + 1);
        self.inner.apply(t, x, out);
    }

    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) -> bool {
        if !self.use_jacobian {
            return false;
        }
        let available = self.inner.jacobian(t, x, out);
        if available {
            self.njev.set(self.njev.get() + 1);
        }
        available
    }

    fn is_autonomous(&self) -> bool {
        self.inner.is_autonomous()
    }
}

fn validate(
    dim: usize,
    tout: &[f64],
    y0: &[f64],
    method: Method,
    settings: &IntegratorSettings,
) -> Result<(), IntegrationError> {
    let invalid = |msg: String| Err(IntegrationError::InvalidInput(msg));
    if tout.is_empty() {
        return invalid("at least one output time is required".to_string());
    }
    if tout.iter().any(|t| !t.is_finite()) {
        return invalid("output times must be finite".to_string());
    }
    if tout.windows(2).any(|w| w[1] <= w[0]) {
        return invalid("output times must be strictly increasing".to_string());
    }
    if y0.len() != dim {
        return invalid(format!(
            "initial state has {} entries, system has {dim} states",
            y0.len()
        ));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return invalid("initial state must be finite".to_string());
    }
    if !(settings.rtol > 0.0) || !(settings.atol > 0.0) {
        return invalid("rtol and atol must be positive".to_string());
    }
    if settings.max_steps == 0 {
        return invalid("max_steps must be positive".to_string());
    }
    if let Some(h) = settings.first_step {
        if !(h > 0.0) || !h.is_finite() {
            return invalid("first_step must be positive".to_string());
        }
    }
    if let Method::Rk4 { dt } = method {
        if !(dt > 0.0) || !dt.is_finite() {
            return invalid("dt must be positive".to_string());
        }
    }
    Ok(())
}

/// Integrates `system` from `tout[0]`, where the state is `y0`, and records
/// the state at every time in `tout`.
///
/// No trajectory is returned if the solver fails anywhere along the way.
pub fn integrate<S: DynamicalSystem<f64>>(
    system: &S,
    tout: &[f64],
    y0: &[f64],
    method: Method,
    settings: &IntegratorSettings,
) -> Result<Trajectory, IntegrationError> {
    let dim = system.dimension();
    validate(dim, tout, y0, method, settings)?;

    let started = Instant::now();
    let counting = CountingSystem::new(system, settings.use_jacobian);
    let mut run = Run {
        system: &counting,
        tout,
        settings,
        tol: Tolerances {
            rtol: settings.rtol,
            atol: settings.atol,
        },
        states: DMatrix::zeros(tout.len(), dim),
        stats: SolverStats::default(),
        t: tout[0],
        y: y0.to_vec(),
        h: 0.0,
        next_output: 1,
        steps: 0,
    };
    run.record(0);

    match method {
        Method::Rk4 { dt } => run.fixed_step(dt)?,
        Method::Tsit5 => {
            let mut stepper = Tsit5::new(dim);
            if let Outcome::Stiff = run.adaptive(&mut stepper, settings.stiffness_check)? {
                return Err(IntegrationError::StiffnessDetected { t: run.t });
            }
        }
        Method::Rosenbrock23 => {
            let mut stepper = Rosenbrock23::new(dim, settings.use_jacobian);
            run.adaptive(&mut stepper, false)?;
            run.stats.nlu += stepper.lu_count();
        }
        Method::Auto => {
            let mut explicit = Tsit5::new(dim);
            if let Outcome::Stiff = run.adaptive(&mut explicit, true)? {
                info!("stiffness detected at t = {:.6e}; switching to Rosenbrock23", run.t);
                run.stats.method_switches += 1;
                let mut implicit = Rosenbrock23::new(dim, settings.use_jacobian);
                run.adaptive(&mut implicit, false)?;
                run.stats.nlu += implicit.lu_count();
            }
        }
    }

    let Run {
        states, mut stats, ..
    } = run;
    stats.nfev = counting.nfev.get();
    stats.njev = counting.njev.get();
    stats.elapsed = started.elapsed().as_secs_f64();
    debug!("integration finished: {stats}");

    Ok(Trajectory {
        times: tout.to_vec(),
        states,
        stats,
    })
}

enum Outcome {
    Finished,
    Stiff,
}

struct Run<'a, S> {
    system: &'a S,
    tout: &'a [f64],
    settings: &'a IntegratorSettings,
    tol: Tolerances,
    states: DMatrix<f64>,
    stats: SolverStats,
    t: f64,
    y: Vec<f64>,
    /// Proposed size of the next adaptive step; 0 until initialised.
    h: f64,
    next_output: usize,
    steps: usize,
}

impl<S: DynamicalSystem<f64>> Run<'_, S> {
    fn record(&mut self, row: usize) {
        for (j, value) in self.y.iter().enumerate() {
            self.states[(row, j)] = *value;
        }
    }

    fn fixed_step(&mut self, dt: f64) -> Result<(), IntegrationError> {
        let mut solver = RK4::new(self.y.len());
        while self.next_output < self.tout.len() {
            let start = self.t;
            let target = self.tout[self.next_output];
            let substeps = ((target - start) / dt).ceil().max(1.0) as usize;
            if self.steps.saturating_add(substeps) > self.settings.max_steps {
                return Err(IntegrationError::TooManySteps {
                    t: self.t,
                    target,
                    max_steps: self.settings.max_steps,
                });
            }
            let h = (target - start) / substeps as f64;
            for i in 0..substeps {
                // accumulate from the interval start to avoid drift in t
                let mut t = start + i as f64 * h;
                solver.step(self.system, &mut t, &mut self.y, h);
            }
            self.steps += substeps;
            self.stats.naccepted += substeps;
            self.t = target;
            if self.y.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::NonFinite { t: target });
            }
            self.record(self.next_output);
            self.next_output += 1;
        }
        Ok(())
    }

    /// Hairer, Norsett & Wanner, Solving ODEs I, II.4.
    fn initial_step(&self, f0: &[f64], order: i32) -> f64 {
        let span = self.tout[self.tout.len() - 1] - self.t;
        let d0 = self.tol.scaled_norm(&self.y, &self.y);
        let d1 = self.tol.scaled_norm(&self.y, f0);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(span);

        let y1: Vec<f64> = self.y.iter().zip(f0).map(|(y, f)| y + h0 * f).collect();
        let mut f1 = vec![0.0; f0.len()];
        self.system.apply(self.t + h0, &y1, &mut f1);
        let diff: Vec<f64> = f1.iter().zip(f0).map(|(a, b)| a - b).collect();
        let d2 = self.tol.scaled_norm(&self.y, &diff) / h0;

        let dmax = d1.max(d2);
        let h1 = if dmax <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / dmax).powf(1.0 / f64::from(order + 1))
        };
        let h = (100.0 * h0).min(h1).min(span);
        if h.is_finite() && h > 0.0 {
            h
        } else {
            h0
        }
    }

    fn adaptive<A: AdaptiveStepper>(
        &mut self,
        stepper: &mut A,
        detect_stiffness: bool,
    ) -> Result<Outcome, IntegrationError> {
        let dim = self.y.len();
        let mut f0 = vec![0.0; dim];
        self.system.apply(self.t, &self.y, &mut f0);
        stepper.reset(&f0);

        let order = stepper.error_order();
        if self.h <= 0.0 {
            self.h = self
                .settings
                .first_step
                .unwrap_or_else(|| self.initial_step(&f0, order));
        }
        let exponent = -1.0 / f64::from(order + 1);

        let mut y_new = vec![0.0; dim];
        let mut err = vec![0.0; dim];
        let mut stiff_steps = 0;

        while self.next_output < self.tout.len() {
            let target = self.tout[self.next_output];
            while self.t < target {
                if self.steps >= self.settings.max_steps {
                    return Err(IntegrationError::TooManySteps {
                        t: self.t,
                        target,
                        max_steps: self.settings.max_steps,
                    });
                }
                let remaining = target - self.t;
                let min_step = self
                    .settings
                    .min_step
                    .max(10.0 * f64::EPSILON * self.t.abs().max(target.abs()));
                let clipped = 1.01 * self.h >= remaining;
                let h = if clipped { remaining } else { self.h };

                stepper.attempt(self.system, self.t, &self.y, h, &mut y_new, &mut err)?;
                self.steps += 1;

                let finite = y_new.iter().chain(&err).all(|v| v.is_finite());
                let norm = if finite {
                    self.tol.error_norm(&self.y, &y_new, &err)
                } else {
                    f64::INFINITY
                };

                if norm <= 1.0 {
                    self.t = if clipped { target } else { self.t + h };
                    self.y.copy_from_slice(&y_new);
                    stepper.accept();
                    self.stats.naccepted += 1;

                    let factor = if norm == 0.0 {
                        MAX_FACTOR
                    } else {
                        (SAFETY * norm.powf(exponent)).clamp(MIN_FACTOR, MAX_FACTOR)
                    };
                    // a step shortened to land on an output time says
                    // nothing about the usable step size
                    self.h = if clipped {
                        self.h.max(h * factor)
                    } else {
                        h * factor
                    };
                    if self.h < min_step {
                        return Err(IntegrationError::StepSizeTooSmall {
                            t: self.t,
                            h: self.h,
                        });
                    }

                    if detect_stiffness {
                        match stepper.stiffness_estimate() {
                            Some(estimate) if estimate > STIFF_BOUND => stiff_steps += 1,
                            _ => stiff_steps = 0,
                        }
                        if stiff_steps >= STIFF_STEPS {
                            debug!("h*rho above {STIFF_BOUND} for {STIFF_STEPS} steps at t = {}", self.t);
                            return Ok(Outcome::Stiff);
                        }
                    }
                } else {
                    self.stats.nrejected += 1;
                    let factor = if finite {
                        (SAFETY * norm.powf(exponent)).clamp(MIN_FACTOR, 1.0)
                    } else {
                        MIN_FACTOR
                    };
                    self.h = h * factor;
                    if self.h < min_step {
                        return Err(if finite {
                            IntegrationError::StepSizeTooSmall {
                                t: self.t,
                                h: self.h,
                            }
                        } else {
                            IntegrationError::NonFinite { t: self.t }
                        });
                    }
                }
            }
            self.record(self.next_output);
            self.next_output += 1;
        }
        Ok(Outcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn assert_err_contains<T: std::fmt::Debug>(
        result: Result<T, IntegrationError>,
        needle: &str,
    ) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// y' = -k y, with an analytic Jacobian.
    struct Decay {
        k: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.k * x[0];
        }
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) -> bool {
            out[0] = -self.k;
            true
        }
        fn is_autonomous(&self) -> bool {
            true
        }
    }

    /// y' = y^2 blows up at t = 1 for y(0) = 1.
    struct BlowUp;

    impl DynamicalSystem<f64> for BlowUp {
        fn dimension(&self) -> usize {
            1
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    /// Rosenbrock23 is second order, so its global error sits roughly a
    /// hundred times above the tolerance; tighten it for accuracy checks.
    fn accurate_settings(method: Method) -> IntegratorSettings {
        match method {
            Method::Rosenbrock23 => IntegratorSettings {
                rtol: 1e-10,
                atol: 1e-10,
                ..IntegratorSettings::default()
            },
            _ => IntegratorSettings::default(),
        }
    }

    fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    #[test]
    fn every_method_follows_exponential_decay() {
        init();
        let system = Decay { k: 2.0 };
        let tout = linspace(0.0, 2.0, 21);
        for method in [
            Method::Rk4 { dt: 1e-3 },
            Method::Tsit5,
            Method::Rosenbrock23,
            Method::Auto,
        ] {
            let settings = accurate_settings(method);
            let traj = integrate(&system, &tout, &[3.0], method, &settings).expect("integrates");
            assert_eq!(traj.len(), 21);
            for (i, t) in tout.iter().enumerate() {
                let exact = 3.0 * (-2.0 * t).exp();
                assert_relative_eq!(traj.states[(i, 0)], exact, epsilon = 1e-6, max_relative = 1e-6);
            }
            assert_eq!(traj.times, tout);
            assert!(traj.stats.nfev > 0);
        }
    }

    #[test]
    fn output_times_are_hit_exactly() {
        let system = Decay { k: 1.0 };
        let tout = [0.0, 0.1, 0.35, 10.0];
        let traj = integrate(&system, &tout, &[1.0], Method::Tsit5, &IntegratorSettings::default())
            .expect("integrates");
        assert_relative_eq!(traj.final_state()[0], (-10.0_f64).exp(), epsilon = 1e-7);
        assert_eq!(traj.component(0)[0], 1.0);
    }

    #[test]
    fn single_output_time_returns_initial_state() {
        let traj = integrate(
            &Decay { k: 1.0 },
            &[5.0],
            &[0.25],
            Method::Auto,
            &IntegratorSettings::default(),
        )
        .expect("trivial run");
        assert_eq!(traj.final_state(), vec![0.25]);
        assert_eq!(traj.stats.naccepted, 0);
    }

    #[test]
    fn rejects_invalid_input() {
        let system = Decay { k: 1.0 };
        let settings = IntegratorSettings::default();
        assert_err_contains(
            integrate(&system, &[], &[1.0], Method::Tsit5, &settings),
            "at least one output time",
        );
        assert_err_contains(
            integrate(&system, &[0.0, 1.0, 1.0], &[1.0], Method::Tsit5, &settings),
            "strictly increasing",
        );
        assert_err_contains(
            integrate(&system, &[0.0, 1.0], &[1.0, 2.0], Method::Tsit5, &settings),
            "initial state has 2 entries",
        );
        assert_err_contains(
            integrate(&system, &[0.0, 1.0], &[f64::NAN], Method::Tsit5, &settings),
            "must be finite",
        );
        assert_err_contains(
            integrate(&system, &[0.0, 1.0], &[1.0], Method::Rk4 { dt: 0.0 }, &settings),
            "dt must be positive",
        );
        let negative = IntegratorSettings {
            rtol: -1.0,
            ..IntegratorSettings::default()
        };
        assert_err_contains(
            integrate(&system, &[0.0, 1.0], &[1.0], Method::Tsit5, &negative),
            "rtol and atol",
        );
    }

    #[test]
    fn tsit5_reports_stiffness_and_auto_switches() {
        init();
        let system = Decay { k: 1e4 };
        let tout = [0.0, 1.0];
        let settings = IntegratorSettings::default();

        let err = integrate(&system, &tout, &[1.0], Method::Tsit5, &settings)
            .expect_err("stiff for an explicit method");
        assert!(matches!(err, IntegrationError::StiffnessDetected { .. }));

        let traj = integrate(&system, &tout, &[1.0], Method::Auto, &settings).expect("auto");
        assert_eq!(traj.stats.method_switches, 1);
        assert!(traj.stats.nlu > 0);
        assert!(traj.final_state()[0].abs() < 1e-6);
    }

    #[test]
    fn stiffness_check_can_be_disabled() {
        let settings = IntegratorSettings {
            stiffness_check: false,
            rtol: 1e-6,
            atol: 1e-6,
            ..IntegratorSettings::default()
        };
        let traj = integrate(&Decay { k: 1e3 }, &[0.0, 0.2], &[1.0], Method::Tsit5, &settings)
            .expect("slow but stable");
        assert_eq!(traj.stats.method_switches, 0);
        assert!(traj.stats.naccepted > 50);
    }

    #[test]
    fn blow_up_is_reported_not_returned() {
        let result = integrate(
            &BlowUp,
            &[0.0, 2.0],
            &[1.0],
            Method::Tsit5,
            &IntegratorSettings::default(),
        );
        let err = result.expect_err("solution leaves every bound at t = 1");
        assert!(matches!(
            err,
            IntegrationError::StepSizeTooSmall { .. }
                | IntegrationError::NonFinite { .. }
                | IntegrationError::StiffnessDetected { .. }
        ));
    }

    #[test]
    fn step_size_never_drops_below_the_floor() {
        let err = integrate(&BlowUp, &[0.0, 2.0], &[1.0], Method::Auto, &IntegratorSettings::default())
            .expect_err("singular at t = 1");
        match err {
            IntegrationError::StepSizeTooSmall { t, h } => {
                assert!((t - 1.0).abs() < 1e-6, "t = {t}");
                // the floor is 10 ulps of the target; one rejection undershoots it by at most 0.2
                assert!(h >= 0.2 * 10.0 * f64::EPSILON * 2.0, "h = {h:e}");
            }
            other => panic!("expected StepSizeTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = IntegratorSettings {
            max_steps: 5,
            ..IntegratorSettings::default()
        };
        assert_err_contains(
            integrate(&Decay { k: 1.0 }, &[0.0, 100.0], &[1.0], Method::Tsit5, &settings),
            "exceeded 5 steps",
        );
        assert_err_contains(
            integrate(
                &Decay { k: 1.0 },
                &[0.0, 1.0],
                &[1.0],
                Method::Rk4 { dt: 0.1 },
                &settings,
            ),
            "exceeded 5 steps",
        );
    }

    #[test]
    fn huge_substep_counts_exceed_the_budget_without_overflow() {
        let result = integrate(
            &Decay { k: 1.0 },
            &[0.0, 1e-299, 1e10],
            &[1.0],
            Method::Rk4 { dt: 1e-300 },
            &IntegratorSettings::default(),
        );
        assert!(matches!(
            result,
            Err(IntegrationError::TooManySteps { target, .. }) if target == 1e10
        ));
    }

    #[test]
    fn analytic_jacobian_only_changes_call_counts() {
        let system = Decay { k: 50.0 };
        let tout = linspace(0.0, 0.5, 6);
        let analytic = integrate(
            &system,
            &tout,
            &[1.0],
            Method::Rosenbrock23,
            &IntegratorSettings::default(),
        )
        .expect("analytic");
        let numeric = integrate(
            &system,
            &tout,
            &[1.0],
            Method::Rosenbrock23,
            &IntegratorSettings {
                use_jacobian: false,
                ..IntegratorSettings::default()
            },
        )
        .expect("finite differences");
        assert!(analytic.stats.njev > 0);
        assert_eq!(numeric.stats.njev, 0);
        assert!(numeric.stats.nfev > analytic.stats.nfev);
        for i in 0..tout.len() {
            assert_relative_eq!(
                analytic.states[(i, 0)],
                numeric.states[(i, 0)],
                epsilon = 1e-7
            );
        }
    }

    #[test]
    fn settings_and_methods_deserialize_from_partial_json() {
        let settings: IntegratorSettings =
            serde_json::from_str(r#"{"rtol": 1e-6, "use_jacobian": false}"#).expect("settings");
        assert_eq!(settings.rtol, 1e-6);
        assert_eq!(settings.atol, 1e-8);
        assert!(!settings.use_jacobian);
        assert_eq!(settings.max_steps, 100_000);

        let method: Method =
            serde_json::from_str(r#"{"method": "rk4", "dt": 0.5}"#).expect("method");
        assert_eq!(method, Method::Rk4 { dt: 0.5 });
        let method: Method = serde_json::from_str(r#"{"method": "rosenbrock23"}"#).expect("method");
        assert_eq!(method, Method::Rosenbrock23);
    }

    #[test]
    fn stats_display_is_one_line() {
        let stats = SolverStats {
            nfev: 10,
            njev: 2,
            ..SolverStats::default()
        };
        let line = stats.to_string();
        assert!(line.starts_with("nfev=10 njev=2 nlu=0"));
        assert!(!line.contains('\n'));
    }
}
