//! Flow control for the hammer load generator.
//!
//! Readers and writers never touch the network until they hold a token from
//! a [`Throttle`]. Each throttle issues at most its target rate of tokens per
//! wall-clock second, and an operator can nudge the rate up or down while
//! the hammer runs.
//!
//! # Token Supply
//!
//! ```text
//!   every 1s                    bounded queue (cap = rate)
//! ┌───────────┐  push ≤ rate  ┌──────────────────────┐  acquire  ┌─────────┐
//! │  refill   │──────────────▶│ ● ● ● ● ● ○ ○ ○ ○ ○  │──────────▶│ workers │
//! └───────────┘               └──────────────────────┘           └─────────┘
//!        │ tokens that do not fit before the second ends are dropped
//!        ▼ and reported as oversupply
//! ```
//!
//! # Example
//!
//! ```rust
//! use hammer_flow::Throttle;
//!
//! let throttle = Throttle::new(20);
//! throttle.increase();
//! assert_eq!(throttle.ops_per_second(), 22);
//! throttle.decrease();
//! assert_eq!(throttle.ops_per_second(), 20);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod throttle;

pub use error::{FlowError, FlowResult};
pub use throttle::{Throttle, ThrottleStats, REFILL_INTERVAL};
