//! Rate-limited retrieval of profile, rating history and submissions.
//!
//! This crate provides:
//! - `ActivitySource` trait, the seam the sync engine fetches through
//! - `CodeforcesClient`, the HTTP implementation with request timeouts
//! - `RateGovernor`, the single outbound gate shared by all handles

pub mod client;
pub mod error;
pub mod gate;
pub mod source;
mod wire;

pub use client::CodeforcesClient;
pub use error::FetchError;
pub use gate::RateGovernor;
pub use source::{ActivitySource, FetchedActivity};
