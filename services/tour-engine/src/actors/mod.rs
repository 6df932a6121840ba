//! Actor framework and the tour actors built on it.
//!
//! Every participant of the museum runs as its own task with a private
//! mailbox. Actors never share state; the only shared structure is the
//! [`Directory`], which maps capabilities to mailbox handles.
//!
//! ## Design Principles
//!
//! - **One actor per participant**: a guide, a visitor group or the
//!   coordinator owns its state machine and nothing else
//! - **Envelope messages**: every message carries its sender's handle so a
//!   reply never needs a lookup
//! - **Timers are messages**: timeouts and pacing are delayed sends to self,
//!   and carry a sequence number so stale ones are ignored
//! - **Crash isolation**: a failing handler is logged; the actor keeps
//!   draining its mailbox
//!
//! ## Actor Types
//!
//! - `Coordinator`: owns the waiting queue and negotiates assignments
//! - `Guide`: accepts or refuses offers and runs tours
//! - `VisitorGroup`: asks for a guide, follows the tour, scores it

mod coordinator;
mod directory;
mod framework;
mod group;
mod guide;
mod messages;
mod queue;

pub use coordinator::{
    Assignment, Coordinator, CoordinatorCounters, CoordinatorSettings, GuideView,
};
pub use directory::{Capability, Directory};
pub use framework::{
    mailbox, Actor, ActorContext, ActorError, ActorHandle, ActorRef, BackoffPolicy,
    Mailbox, Message, Supervisor,
};
pub use group::{GroupSettings, VisitorGroup};
pub use guide::{Guide, GuideSettings};
pub use messages::{Address, Body, Envelope, RefusalReason};
pub use queue::{WaitingEntry, WaitingQueue};
