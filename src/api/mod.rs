//! HTTP route handlers for the VM lifecycle surface.

pub mod routes;

pub use routes::{vm_router, AppState};
