//! Registry implementations and decorators

pub mod apptrust;
pub mod dry_run;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod retry;

pub use apptrust::AppTrustRegistry;
pub use dry_run::{DryRunRegistry, PlannedWrite};
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryRegistry;
pub use retry::RetryingRegistry;
