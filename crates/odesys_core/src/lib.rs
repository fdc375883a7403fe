pub mod autodiff;
pub mod backends;
pub mod codegen;
pub mod dataset;
pub mod equation_engine;
pub mod error;
pub mod integrate;
pub mod odesys;
pub mod parser;
pub mod reaction;
pub mod solvers;
pub mod symbolic;
/// The `odesys_core` crate turns chemical reaction networks into ODE systems
/// and integrates them.
///
/// Key components:
/// - **Symbolic**: `Expr` trees with canonical simplification, differentiation and a text parser.
/// - **Reaction**: mass-action rate equations built from declarative reaction lists.
/// - **Backends**: direct tree evaluation, C compiled to a shared library, and a
///   lazily compiled bytecode VM that also yields Jacobians via dual numbers.
/// - **Integrate**: RK4, Tsit5 with stiffness detection, Rosenbrock23, and an automatic switch.
/// - **Dataset**: JSON reaction datasets, including the bundled Robertson problem.
pub mod traits;

pub use backends::{BackendKind, Evaluator, Toolchain};
pub use dataset::ReactionDataset;
pub use error::{Error, Result};
pub use integrate::{integrate, IntegratorSettings, Method, SolverStats, Trajectory};
pub use odesys::{OdeSys, SymbolicSystem};
pub use reaction::{rate_equations, Reaction};
pub use symbolic::Expr;
