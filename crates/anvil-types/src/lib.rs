pub mod config;
pub mod constraint;
pub mod entity;
pub mod error;
pub mod ids;
pub mod operation;
pub mod roles;
pub mod workspace;

pub use config::*;
pub use constraint::*;
pub use entity::*;
pub use error::*;
pub use ids::*;
pub use operation::*;
pub use roles::*;
pub use workspace::*;
