//! HTTP surface for consultations and operations.
//!
//! `POST /v1/consult` answers a request; the remaining routes expose health,
//! status and the operational hooks (circuit reset, cache sweep).

mod handlers;
mod server;

pub use server::{create_router, run_server, AppState};
