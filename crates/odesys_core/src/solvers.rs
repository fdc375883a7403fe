use crate::error::IntegrationError;
use crate::traits::{constant, DynamicalSystem, Scalar, Steppable};
use nalgebra::{DMatrix, DVector};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half: T = constant(0.5);
        let sixth: T = constant(1.0 / 6.0);
        let two: T = constant(2.0);
        let t0 = *t;
        let n = state.len();

        system.apply(t0, state, &mut self.k1);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * half * self.k1[i];
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * half * self.k2[i];
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        for i in 0..n {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * (self.k2[i] + self.k3[i]) + self.k4[i]);
        }
        *t = t0 + dt;
    }
}

/// Mixed absolute/relative tolerance used by the adaptive steppers.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerances {
    /// Weighted RMS norm of `err`, scaled by `atol + rtol * max(|y|, |y_new|)`.
    pub fn error_norm(&self, y: &[f64], y_new: &[f64], err: &[f64]) -> f64 {
        if err.is_empty() {
            return 0.0;
        }
        let sum: f64 = err
            .iter()
            .zip(y.iter().zip(y_new))
            .map(|(e, (a, b))| {
                let scale = self.atol + self.rtol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / err.len() as f64).sqrt()
    }

    /// Same weighting for a single vector, used by the initial step guess.
    pub fn scaled_norm(&self, reference: &[f64], v: &[f64]) -> f64 {
        self.error_norm(reference, reference, v)
    }
}

/// An embedded-error single-step method driven by `integrate`.
pub(crate) trait AdaptiveStepper {
    /// Order q of the error estimate; step factors use the exponent -1/(q+1).
    fn error_order(&self) -> i32;

    /// Starts (or restarts) from a point where f evaluates to `f0`.
    fn reset(&mut self, f0: &[f64]);

    /// Tries a step of size `h` from (t, y). Writes the candidate state into
    /// `y_new` and the local error estimate into `err`.
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        y: &[f64],
        h: f64,
        y_new: &mut [f64],
        err: &mut [f64],
    ) -> Result<(), IntegrationError>;

    /// Commits the last attempt.
    fn accept(&mut self);

    /// `h * rho` for the last attempt, where rho estimates the dominant
    /// eigenvalue magnitude of the Jacobian.
    fn stiffness_estimate(&self) -> Option<f64> {
        None
    }

    fn lu_count(&self) -> usize {
        0
    }
}

// Tsitouras (2011) 5(4) pair.
const TSIT5_C: [f64; 5] = [0.161, 0.327, 0.9, 0.9800255409045097, 1.0];
const TSIT5_A: [[f64; 6]; 6] = [
    [0.161, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0, 0.0],
    [2.897153057105493, -6.359448489975075, 4.3622954328695815, 0.0, 0.0, 0.0],
    [
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
        0.0,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
        0.0,
    ],
    [
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ],
];
/// Difference between the 5th and the embedded 4th order weights.
const TSIT5_BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    1.0 / 66.0,
];

/// Tsitouras 5/4 solver with FSAL and Hairer-style stiffness estimation.
pub struct Tsit5 {
    /// k[0] holds f at the current point, k[6] f at the candidate point.
    k: [Vec<f64>; 7],
    tmp: Vec<f64>,
    stiffness: Option<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
            stiffness: None,
        }
    }
}

impl AdaptiveStepper for Tsit5 {
    fn error_order(&self) -> i32 {
        4
    }

    fn reset(&mut self, f0: &[f64]) {
        self.k[0].copy_from_slice(f0);
        self.stiffness = None;
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        y: &[f64],
        h: f64,
        y_new: &mut [f64],
        err: &mut [f64],
    ) -> Result<(), IntegrationError> {
        let n = y.len();
        for stage in 1..=6 {
            let row = &TSIT5_A[stage - 1];
            for i in 0..n {
                let mut acc = 0.0;
                for (j, a) in row.iter().enumerate().take(stage) {
                    acc += a * self.k[j][i];
                }
                self.tmp[i] = y[i] + h * acc;
            }
            if stage < 6 {
                system.apply(t + TSIT5_C[stage - 1] * h, &self.tmp, &mut self.k[stage]);
            }
        }
        // the last row holds the solution weights
        y_new.copy_from_slice(&self.tmp);
        system.apply(t + h, y_new, &mut self.k[6]);

        for i in 0..n {
            let mut acc = 0.0;
            for (j, b) in TSIT5_BTILDE.iter().enumerate() {
                acc += b * self.k[j][i];
            }
            err[i] = h * acc;
        }

        self.stiffness = self.estimate_stiffness(y, h, y_new);
        Ok(())
    }

    fn accept(&mut self) {
        self.k.swap(0, 6);
    }

    fn stiffness_estimate(&self) -> Option<f64> {
        self.stiffness
    }
}

impl Tsit5 {
    /// rho = |k7 - k6| / |y_new - y6|, where y6 is the input of the sixth
    /// stage. Both points are at t + h.
    fn estimate_stiffness(&self, y: &[f64], h: f64, y_new: &[f64]) -> Option<f64> {
        let row = &TSIT5_A[4];
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..y.len() {
            let mut acc = 0.0;
            for (j, a) in row.iter().enumerate().take(5) {
                acc += a * self.k[j][i];
            }
            let y6 = y[i] + h * acc;
            num += (self.k[6][i] - self.k[5][i]).powi(2);
            den += (y_new[i] - y6).powi(2);
        }
        if den > 0.0 {
            Some(h * (num / den).sqrt())
        } else {
            None
        }
    }
}

const ROS_D: f64 = 0.2928932188134525; // 1 / (2 + sqrt(2))
const ROS_E32: f64 = 7.414213562373095; // 6 + sqrt(2)

/// Shampine-Reichelt Rosenbrock 2(3) method (ode23s). L-stable, one LU
/// factorisation per attempted step.
pub struct Rosenbrock23 {
    use_jacobian: bool,
    jacobian: DMatrix<f64>,
    dfdt: DVector<f64>,
    jacobian_stale: bool,
    f0: DVector<f64>,
    f_new: DVector<f64>,
    scratch: Vec<f64>,
    nlu: usize,
}

impl Rosenbrock23 {
    pub fn new(dim: usize, use_jacobian: bool) -> Self {
        Self {
            use_jacobian,
            jacobian: DMatrix::zeros(dim, dim),
            dfdt: DVector::zeros(dim),
            jacobian_stale: true,
            f0: DVector::zeros(dim),
            f_new: DVector::zeros(dim),
            scratch: vec![0.0; dim],
            nlu: 0,
        }
    }

    fn update_jacobian(&mut self, system: &impl DynamicalSystem<f64>, t: f64, y: &[f64]) {
        let n = y.len();
        let mut analytic = vec![0.0; n * n];
        if self.use_jacobian && system.jacobian(t, y, &mut analytic) {
            self.jacobian = DMatrix::from_row_slice(n, n, &analytic);
        } else {
            let sqrt_eps = f64::EPSILON.sqrt();
            let mut perturbed = y.to_vec();
            for j in 0..n {
                let delta = sqrt_eps * y[j].abs().max(1e-6);
                perturbed[j] = y[j] + delta;
                let step = perturbed[j] - y[j];
                system.apply(t, &perturbed, &mut self.scratch);
                for i in 0..n {
                    self.jacobian[(i, j)] = (self.scratch[i] - self.f0[i]) / step;
                }
                perturbed[j] = y[j];
            }
        }

        if system.is_autonomous() {
            self.dfdt.fill(0.0);
        } else {
            let delta = f64::EPSILON.sqrt() * t.abs().max(1e-6);
            system.apply(t + delta, y, &mut self.scratch);
            for i in 0..n {
                self.dfdt[i] = (self.scratch[i] - self.f0[i]) / delta;
            }
        }
        self.jacobian_stale = false;
    }
}

impl AdaptiveStepper for Rosenbrock23 {
    fn error_order(&self) -> i32 {
        2
    }

    fn reset(&mut self, f0: &[f64]) {
        self.f0.copy_from_slice(f0);
        self.jacobian_stale = true;
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        y: &[f64],
        h: f64,
        y_new: &mut [f64],
        err: &mut [f64],
    ) -> Result<(), IntegrationError> {
        if self.jacobian_stale {
            self.update_jacobian(system, t, y);
        }
        let n = y.len();
        let dh = ROS_D * h;
        let w = DMatrix::<f64>::identity(n, n) - &self.jacobian * dh;
        let lu = w.lu();
        self.nlu += 1;
        let solve = |rhs: DVector<f64>| lu.solve(&rhs).ok_or(IntegrationError::SingularMatrix { t });

        let y0 = DVector::from_column_slice(y);
        let k1 = solve(&self.f0 + &self.dfdt * dh)?;

        let mid = &y0 + &k1 * (0.5 * h);
        system.apply(t + 0.5 * h, mid.as_slice(), &mut self.scratch);
        let f1 = DVector::from_column_slice(&self.scratch);

        let k2 = solve(&f1 - &k1)? + &k1;
        let candidate = &y0 + &k2 * h;
        y_new.copy_from_slice(candidate.as_slice());

        system.apply(t + h, y_new, self.f_new.as_mut_slice());
        let k3 = solve(
            &self.f_new - (&k2 - &f1) * ROS_E32 - (&k1 - &self.f0) * 2.0 + &self.dfdt * dh,
        )?;

        for i in 0..n {
            err[i] = h / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }
        Ok(())
    }

    fn accept(&mut self) {
        std::mem::swap(&mut self.f0, &mut self.f_new);
        self.jacobian_stale = true;
    }

    fn lu_count(&self) -> usize {
        self.nlu
    }
}
