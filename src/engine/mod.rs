//! Reconciliation engines. Each engine instance owns its state, guard set
//! and background tasks; construct once at application start and tear down
//! with `dispose`.

mod guards;
mod privileged;
mod standard;
mod state;

pub use privileged::{PrivilegedEngine, RouteContext};
pub use standard::StandardEngine;
pub use state::{ReconciliationState, StateCell};
