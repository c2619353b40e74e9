pub mod analysis;
pub mod model;
pub mod residual;
pub mod solve;

pub use analysis::{analyze, Determination, StructuralReport};
pub use model::{SolverConstraint, SolverEntity};
pub use solve::{solve, ConflictSet, SolveOptions, SolveReport};
