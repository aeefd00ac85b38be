//! Deterministic simulation of index workloads.
//!
//! - [`invariants`]: snapshot of the stored tree and a structural checker;
//! - [`workload`]: seeded random operations compared against a model, with
//!   optional fault injection in the backend.
//!
//! Given the same seed, a run performs the same operations and sees the
//! same faults.

pub mod invariants;
pub mod workload;

pub use invariants::assert_invariants;
