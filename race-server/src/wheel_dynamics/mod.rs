//! wheel_dynamics - engine-agnostic wheel + chassis helpers (pure types + solvers)

pub mod types;
pub mod friction;
pub mod drivetrain;
pub mod traction;
pub mod anti_roll;
pub mod stability;
pub mod solve;

pub use types::*;
pub use friction::FrictionCurve;
pub use solve::solve_tires;
