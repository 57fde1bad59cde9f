//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Instance type used for job machines when no override is provided.
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.2xlarge";

/// Region used for job machines when no override is provided.
pub const DEFAULT_REGION: &str = "ap-northeast-1";
