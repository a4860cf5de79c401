#![allow(clippy::module_inception)]

mod identity;
mod key;
mod stats;

pub use identity::{Identity, Pacer};
pub use key::IdentityKey;
pub use stats::{IdentityStats, IdentityStatsMap, REQUEST_TIME_WINDOW};
