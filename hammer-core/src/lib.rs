//! Hammer Core - Types shared by every hammer crate.
//!
//! Holds the value types that flow between workers and the analysis task,
//! and the process-wide shutdown signal every long-running task listens on.
//!
//! # Design Principles
//!
//! - **Explicit types**: log positions are `u64`, never `usize`
//! - **One shutdown signal**: every blocking wait selects against it
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod leaf;
mod shutdown;

pub use leaf::Leaf;
pub use shutdown::{Shutdown, ShutdownTrigger};
