//! C7 (Kernel) and C8 (Subscription Bridge): the in-memory engine that
//! composes `reactive`/`reactive-fs`/`openspec-cli` into named, warm-started
//! workspace state, plus the push-stream wrapper consumed by `server`.

mod bridge;
mod entity;
mod error;
mod glob_match;
mod kernel;
mod keys;
mod schema;
mod state;
mod types;

pub use bridge::{SubscriptionBridge, SubscriptionHandle};
pub use error::KernelError;
pub use kernel::Kernel;
pub use keys as state_keys;
pub use state::StateValue;
pub use types::*;
