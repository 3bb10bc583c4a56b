//! Domain models for Berth.
//!
//! Canonical definitions for the values threaded through the pipeline:
//! - `DeploymentAttempt`: append-only record of one deployment
//! - `HealthProbeResult`: one poll cycle of the health verifier
//! - `DiagnosticReport`: structured result of the diagnostic sweep
//! - `ContentDigest`: SHA-256 digest for artifacts and journal entries

pub mod attempt;
pub mod digest;
pub mod error;
pub mod report;

pub use attempt::{AttemptOutcome, DeploymentAttempt, HealthProbeResult};
pub use digest::ContentDigest;
pub use error::{DeployError, Result, Stage};
pub use report::{DiagnosticReport, Finding};
