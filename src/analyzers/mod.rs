//! Trip emission aggregation.
//!
//! Computes the heaviest and lightest temporal groups and the single largest
//! trip per vehicle class, and the per-year emission totals used for plotting.

pub mod analyzer;
pub mod extremal;
pub mod timeseries;
pub mod types;
pub mod utility;
