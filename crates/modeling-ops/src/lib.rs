//! The solid-modeling pipeline: creation and boolean operations over the
//! geometry kernel, with operand validation, topology checks, face
//! budgets, cached mass properties and staged progress reporting.

pub mod boolean;
pub mod create;
pub mod pattern;
pub mod profile;
pub mod types;

pub use boolean::{execute_boolean, BooleanKind};
pub use create::{
    execute_extrude, execute_loft, execute_primitive, execute_revolve, execute_sweep,
    finish_solid,
};
pub use pattern::{execute_mirror, execute_pattern_circular, execute_pattern_linear};
pub use profile::{profile_from_entity, EntityResolver};
pub use types::{silent, OpError, OpOutcome, ProgressSink, ProgressStage};
