//! # galerie-events
//!
//! Observational events emitted by the tour coordination engine.
//!
//! ## Design Principles
//!
//! - Events are fire-and-forget records of transitions that already happened
//! - Consumers (dashboards, log shippers) never feed back into the engine
//! - Every event is wrapped in an envelope carrying a per-run sequence number
//!   and the wall-clock time it was recorded
//!
//! ## Event Types
//!
//! - Guide events (`guide.*`)
//! - Group events (`group.*`)
//! - Tour events (`tour.*`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
