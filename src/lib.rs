//! iprepd
//!
//! Reputation service for IP addresses and email addresses. Clients report
//! violations against an object, the service lowers its score within the
//! violation's limits, and scores recover over time.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── bin/repd.rs    - Operator CLI
//! ├── config.rs      - Configuration management
//! ├── client.rs      - HTTP client for the API
//! ├── exceptions.rs  - Exception list (addresses never reported)
//! ├── metrics.rs     - Prometheus latency histograms
//! ├── tool.rs        - Support code for the `repd` CLI
//! ├── reputation/    - Scoring
//! │   ├── error.rs     - Error types
//! │   ├── key.rs       - Object types, validators, storage keys
//! │   ├── score.rs     - Reputation entries, violations, decay
//! │   ├── violation.rs - Violation catalog & requests
//! │   └── manager.rs   - Scoring service
//! ├── store/         - Key-value storage
//! │   ├── memory.rs  - In-process store
//! │   └── redis.rs   - Redis primary + replicas
//! └── api/           - HTTP API endpoints
//!     ├── reputation.rs - Handlers & routes
//!     └── middleware.rs - Auth, headers, size limits, logging
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod exceptions;
pub mod metrics;
pub mod reputation;
pub mod store;
pub mod tool;

// Re-export main types for convenience
pub use config::IprepdConfig;

pub use client::{ReputationClient, VersionResponse};

pub use exceptions::{ExceptionList, ExceptionPredicate, NoExceptions};

pub use store::{MemoryStore, RedisOptions, RedisStore, ReputationStore, StoreError};

// Re-export reputation types
pub use reputation::{
    DecaySettings, KeyNormalizer, Reputation, ReputationError, ReputationManager, Violation,
    ViolationCatalog, ViolationOutcome, ViolationRequest,
};

// Re-export API types
pub use api::{AppState, SecurityMiddlewareConfig, SecurityState, create_router};
