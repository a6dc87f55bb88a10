//! Version registry layer
//!
//! Everything needed to read the production version set of an application
//! from the registry and order it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Selector   │────▶│  Registry   │────▶│  AppTrust   │
//! │ (candidates)│     │   (trait)   │     │   (HTTP)    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲
//!        ▼                   │ wraps
//! ┌─────────────┐     ┌─────────────┐
//! │   SemVer    │     │ Retry/DryRun│
//! │ (ordering)  │     │ (decorators)│
//! └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`semver`]: precedence ordering and version arithmetic
//! - [`types`]: version records, release status, typed property bag
//! - [`registry`]: Registry trait for the external version registry
//! - [`registries`]: HTTP transport, retry and dry-run decorators, simulation
//! - [`selector`]: production candidates, top version and successor selection
//! - [`error`]: Error types for registry and engine operations

pub mod error;
pub mod registries;
pub mod registry;
pub mod selector;
pub mod semver;
pub mod types;
