use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars when evaluating a system.
/// Implemented by `f64` and by the dual numbers used for forward-mode Jacobians.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Lifts an `f64` constant into any scalar type.
pub(crate) fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// A system of first-order ODEs dy/dt = f(t, y).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the right-hand side.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);

    /// Writes the row-major Jacobian df/dx into `out` (length dim*dim).
    /// Returns false when no analytic Jacobian is available, in which case
    /// callers fall back to finite differences.
    fn jacobian(&self, _t: T, _x: &[T], _out: &mut [T]) -> bool {
        false
    }

    /// True when f does not depend on t explicitly.
    fn is_autonomous(&self) -> bool {
        false
    }
}

/// A trait for fixed-step solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
