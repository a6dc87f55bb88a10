//! Production tag state machine
//!
//! Moves the `latest` and `quarantine` tags between versions of an
//! application while keeping the previous tag of every version recoverable.
//!
//! # Transitions
//!
//! ```text
//!            promote (top)                 rollback
//!  <version> ─────────────▶  latest  ─────────────────▶ quarantine
//!      ▲                        │                           │
//!      └────────────────────────┘                           │
//!        higher version promoted                            │
//!        (restored from backup)        successor ◀──────────┘
//!                                      takes latest
//! ```
//!
//! # Modules
//!
//! - [`state`]: set/backup/restore primitives, promote and rollback
//! - [`reconcile`]: detection and repair of inconsistent tag states
//! - [`report`]: per-transition step log and invariant breaches
//! - [`lock`]: per-application serialization and cancellation

pub mod lock;
pub mod reconcile;
pub mod report;
pub mod state;

pub use lock::{AppLockGuard, AppLocks, Cancellation};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use report::{InvariantViolation, Step, Transition, TransitionFailure, TransitionReport};
pub use state::TagStateManager;
