//! Galerie guided-tour coordination engine.
//!
//! Guides, visitor groups and a coordinator run as independent actors and
//! negotiate tour assignments purely by message passing. The crate ships the
//! actor runtime, the tour actors, the monitoring hooks and a simulation
//! driver that populates a museum day with generated visitors.
//!
//! ## Architecture
//!
//! ```text
//! Museum
//! ├── Coordinator          (waiting queue, negotiation, preemption)
//! ├── Guide(id)            (one per guide on duty)
//! └── VisitorGroup(id)     (one per group, stops after departure)
//!
//! Directory  guide / coordinator / visitor_group -> mailbox handles
//! Monitor    TracingSink | ChannelSink | StatsSink, fanned out
//! ```
//!
//! ## Modules
//!
//! - `actors`: Actor framework, directory and the three tour actors
//! - `museum`: Simulation driver
//! - `monitor`: Monitoring sink trait and implementations
//! - `visitors`: Group profiles and the seeded visitor generator

pub mod actors;
pub mod catalogue;
pub mod config;
pub mod monitor;
pub mod museum;
pub mod satisfaction;
pub mod status;
pub mod visitors;

// Re-export commonly used types
pub use actors::{Coordinator, Directory, Envelope, Guide, Supervisor, VisitorGroup};
pub use config::{ConfigError, SimulationConfig};
pub use monitor::{ChannelSink, FanoutSink, MonitoringSink, StatsSink, TracingSink};
pub use museum::{Museum, RunOutcome, StopReason};
pub use visitors::{GroupProfile, Urgency, VisitorGenerator};
