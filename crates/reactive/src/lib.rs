//! Generic, single-threaded reactive primitives: C3 (`ReactiveValue`) and C4
//! (the dependency-tracking effect loop).
//!
//! This crate has no filesystem, CLI, or kernel knowledge — those live in
//! `reactive-fs` and `kernel` respectively, built on top of the
//! [`DepRegistry`]/[`Context`]/[`ReactiveValue`] primitives exported here.

mod context;
mod effect;
mod registry;
mod value;

pub use context::{in_context, Context};
pub use effect::run_effect;
pub use registry::{DepId, DepRegistry};
pub use value::ReactiveValue;
