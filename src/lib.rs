//! consultr - Resilient multi-provider LLM consultation router
//!
//! Classifies each query, picks providers by category profile and observed
//! performance, and dispatches through per-provider rate limits and circuit
//! breakers, with a two-tier response cache in front.

pub mod api;
pub mod cache;
pub mod config;
pub mod consult;
pub mod error;
pub mod provider;
pub mod router;
pub mod storage;

pub use config::Config;
pub use consult::{ConsultRouter, ConsultationRequest, ConsultationResult};
pub use error::{Error, ErrorKind, Result};
