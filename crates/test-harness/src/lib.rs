//! Test scaffolding: an in-process client that drives the dispatcher the
//! way a connected agent would, plus numeric assertion helpers.

pub mod assertions;
pub mod client;

pub use assertions::assert_close;
pub use client::{Exchange, TestClient};
