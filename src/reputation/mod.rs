//! Reputation Scoring
//!
//! Scores objects (IP addresses, email addresses) on a 0-100 scale from the
//! violations reported against them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ ViolationCatalog │────►│ ReputationManager │◄────│ KeyNormalizer    │
//! │ (penalties)      │     │ (scoring service) │     │ (type + value)   │
//! └──────────────────┘     └───────────────────┘     └──────────────────┘
//!                                   │
//!                                   ▼
//!                          ┌───────────────────┐
//!                          │ ReputationStore   │
//!                          │ (JSON per key,    │
//!                          │  two week TTL)    │
//!                          └───────────────────┘
//! ```
//!
//! ## Score Model
//!
//! - New objects start at 100
//! - Each violation subtracts its penalty, never going below its decrease limit
//! - Decay recovers points per whole interval since the last write
//! - `decayafter` holds recovery until the given instant
//! - Decay is computed on read and never persisted by reads

pub mod error;
pub mod key;
mod manager;
mod score;
pub mod violation;

pub use error::{ReputationError, Result};
pub use key::{KeyNormalizer, ObjectType, TYPE_EMAIL, TYPE_IP, validate_type};
pub use manager::{ReputationManager, STORAGE_TTL, ViolationOutcome};
pub use score::{DecaySettings, MAX_SCORE, MIN_SCORE, Reputation};
pub use violation::{MAX_SUPPRESS_RECOVERY_SECS, Violation, ViolationCatalog, ViolationRequest};
