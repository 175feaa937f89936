//! relaygrid-limits — per-caller admission control.
//!
//! - [`ConcurrencyMonitor`] is a hard limiter: a sliding 60 s window of
//!   admission timestamps per caller, capped at a configured ceiling.
//! - [`FloodMonitor`] is a soft limiter: a per-caller counter of jobs in
//!   flight that decays over time so idle callers are forgiven.
//!
//! Both report decisions as `bool`; neither ever errors.

pub mod concurrency;
pub mod flood;

pub use concurrency::{ConcurrencyMonitor, WINDOW};
pub use flood::{DECAY_INTERVAL, FloodMonitor};
