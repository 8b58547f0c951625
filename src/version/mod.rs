//! Version resolution layer for container images
//!
//! Fetches tag lists from registries, caches them and decides whether a
//! running container is on the latest allowed image.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Registry  │────▶│    Cache    │◀────│   Checker   │
//! │   (tags)    │     │  (TTL map)  │     │  (compare)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐                         ┌─────────────┐
//! │  Registries │                         │  Selector   │
//! │ (host→OCI)  │                         │(semver/sha) │
//! └─────────────┘                         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: In-memory TTL cache with fetch-on-miss and garbage collection
//! - [`checker`]: Per-container comparison of running and latest images
//! - [`registry`]: Registry trait for listing image tags
//! - [`registries`]: OCI client and host-based dispatch
//! - [`selector`]: Latest tag selection by version or by timestamp
//! - [`error`]: Error types for registries, cache and checks
//! - [`semver`]: Loose semantic versions parsed from tags
//! - [`types`]: Common types like `ImageTag` and `CheckResult`

pub mod cache;
pub mod checker;
pub mod error;
pub mod registries;
pub mod registry;
pub mod selector;
pub mod semver;
pub mod types;
