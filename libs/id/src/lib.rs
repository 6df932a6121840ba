//! # galerie-id
//!
//! Typed identifiers for the museum tour simulation.
//!
//! ## ID Format
//!
//! Every identifier uses a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `guide_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `grp_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `req_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix keeps a guide id from ever being handed where a group id is
//! expected. ULIDs sort by creation time, so ordered maps keyed by id list
//! guides in the order they came on duty.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
