//! Retry handling for chain operations of the HTLC bridge coordinator
//!
//! - `ExponentialBackoff`: capped exponential delay curve with optional jitter
//! - `RetryPolicy`: attempt budget and curve parameters
//! - `RetryExecutor`: runs an async operation until it succeeds, fails permanently,
//!   or exhausts its budget

pub mod backoff;
pub mod executor;
pub mod policy;

pub use backoff::ExponentialBackoff;
pub use executor::{RetryError, RetryExecutor, RetryObserver};
pub use policy::{RetryPolicy, Retryable};
