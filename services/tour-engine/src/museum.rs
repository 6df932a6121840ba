//! Museum - root of the simulation.
//!
//! The Museum:
//! - Starts the coordinator and the guides on duty
//! - Brings visitor groups in while the doors are open
//! - Plays the front desk: raises guide incidents and resets blocked guides
//! - Stops every actor on shutdown
//!
//! ## Supervision Tree
//!
//! ```text
//! Museum
//! ├── Coordinator
//! ├── Guide(guide_id)          (initial staff, plus any added later)
//! └── VisitorGroup(group_id)   (one per arrival, reaped after departure)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use galerie_id::{GroupId, GuideId};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::actors::{
    mailbox, ActorError, Address, Body, Capability, Coordinator, CoordinatorSettings, Directory,
    Envelope, GroupSettings, Guide, GuideSettings, Mailbox, Supervisor, VisitorGroup,
};
use crate::catalogue::{ExhibitCatalogue, StaticCatalogue};
use crate::config::SimulationConfig;
use crate::monitor::MonitoringSink;
use crate::satisfaction::SatisfactionModel;
use crate::visitors::{GroupProfile, VisitorGenerator};

const INCIDENTS: &[&str] = &[
    "lost voice",
    "felt unwell",
    "called to another gallery",
    "fire alarm in the wing",
    "visitor medical emergency",
];

/// Why [`Museum::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The shutdown signal fired.
    Shutdown,
    /// The simulated clock reached closing time.
    Closing,
    /// The real-time cap elapsed.
    DurationElapsed,
}

/// Summary of one [`Museum::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub seed: u64,
    pub elapsed: Duration,
    /// Simulated clock when the run stopped, `HH:MM`.
    pub closed_at: String,
    pub groups_spawned: u32,
    pub incidents: u32,
    pub resets: u32,
}

/// Root of the simulation.
pub struct Museum {
    /// Simulation configuration.
    config: SimulationConfig,

    /// Seed every random stream of this run derives from.
    seed: u64,

    /// Shared capability registry.
    directory: Arc<Directory<Envelope>>,

    catalogue: Arc<dyn ExhibitCatalogue>,

    monitor: Arc<dyn MonitoringSink>,

    /// Owns every actor task.
    supervisor: Supervisor,

    coordinator: Option<Address>,

    /// Guides on duty, by id.
    guides: BTreeMap<GuideId, Address>,

    /// Blocked guides and when the incident was raised.
    blocked: HashMap<GuideId, Instant>,

    /// Sender identity for incidents and resets.
    front_desk: Address,
    desk: Mailbox<Envelope>,

    generator: VisitorGenerator,

    /// Drives spawn and incident draws, and seeds per-group streams.
    rng: StdRng,

    /// Shutdown signal receiver.
    shutdown: watch::Receiver<bool>,

    groups_spawned: u32,
    incidents: u32,
    resets: u32,
}

impl Museum {
    /// Create a museum. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: SimulationConfig,
        monitor: Arc<dyn MonitoringSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let generator = VisitorGenerator::new(&config, StdRng::seed_from_u64(rng.random()));
        let catalogue: Arc<dyn ExhibitCatalogue> =
            Arc::new(StaticCatalogue::with_limit(config.exhibit_count));
        let (front_desk, desk) = mailbox("front-desk");

        Self {
            config,
            seed,
            directory: Arc::new(Directory::new()),
            catalogue,
            monitor,
            supervisor: Supervisor::new(),
            coordinator: None,
            guides: BTreeMap::new(),
            blocked: HashMap::new(),
            front_desk,
            desk,
            generator,
            rng,
            shutdown,
            groups_spawned: 0,
            incidents: 0,
            resets: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn directory(&self) -> &Arc<Directory<Envelope>> {
        &self.directory
    }

    pub fn coordinator(&self) -> Option<&Address> {
        self.coordinator.as_ref()
    }

    pub fn guide_ids(&self) -> Vec<GuideId> {
        self.guides.keys().copied().collect()
    }

    pub fn blocked_guides(&self) -> Vec<GuideId> {
        self.guides
            .keys()
            .filter(|id| self.blocked.contains_key(*id))
            .copied()
            .collect()
    }

    pub fn running_actors(&self) -> usize {
        self.supervisor.running_count()
    }

    /// Start the coordinator and the initial guides.
    pub fn start(&mut self) {
        info!(
            seed = self.seed,
            guides = self.config.initial_guides,
            exhibits = self.catalogue.list_exhibits().len(),
            "Opening museum"
        );

        let coordinator = Coordinator::new(
            self.coordinator_settings(),
            Arc::clone(&self.directory),
            Arc::clone(&self.monitor),
        );
        self.coordinator = Some(self.supervisor.spawn(coordinator));

        for _ in 0..self.config.initial_guides {
            let name = self.generator.next_guide_name();
            self.add_guide(name);
        }

        info!(running = self.supervisor.running_count(), "Staff on duty");
    }

    /// Put one more guide on duty.
    pub fn add_guide(&mut self, name: impl Into<String>) -> GuideId {
        let guide = Guide::new(
            name,
            self.guide_settings(),
            Arc::clone(&self.directory),
            Arc::clone(&self.catalogue),
            Arc::clone(&self.monitor),
        );
        let guide_id = guide.id();
        let handle = self.supervisor.spawn(guide);
        self.guides.insert(guide_id, handle);
        guide_id
    }

    /// Bring a group in. It asks the coordinator for a guide on its own.
    pub fn spawn_group(&mut self, profile: GroupProfile) -> GroupId {
        let group_id = profile.group_id;
        debug!(
            group_id = %group_id,
            size = profile.size,
            nationality = %profile.nationality,
            urgency = ?profile.effective_urgency(),
            "Group arriving"
        );

        let group = VisitorGroup::new(
            profile,
            self.group_settings(),
            Arc::clone(&self.directory),
            Arc::clone(&self.monitor),
            StdRng::seed_from_u64(self.rng.random()),
        );
        self.supervisor.spawn(group);
        self.groups_spawned += 1;
        group_id
    }

    /// Report a problem to a guide, as if staff at the front desk noticed it.
    pub fn trigger_incident(
        &mut self,
        guide_id: GuideId,
        description: impl Into<String>,
    ) -> Result<(), ActorError> {
        let address = self
            .guides
            .get(&guide_id)
            .ok_or_else(|| ActorError::Unroutable(format!("unknown guide {guide_id}")))?;
        let description = description.into();

        address.send(Envelope::new(
            &self.front_desk,
            Body::GuideProblem {
                guide_id,
                group_id: None,
                description: description.clone(),
            },
        ))?;

        warn!(guide_id = %guide_id, description = %description, "Incident raised");
        self.blocked.insert(guide_id, Instant::now());
        self.incidents += 1;
        Ok(())
    }

    /// Put a blocked guide back into service.
    pub fn reset_guide(&mut self, guide_id: GuideId) -> Result<(), ActorError> {
        let address = self
            .guides
            .get(&guide_id)
            .ok_or_else(|| ActorError::Unroutable(format!("unknown guide {guide_id}")))?;

        address.send(Envelope::new(&self.front_desk, Body::GuideReset { guide_id }))?;

        info!(guide_id = %guide_id, "Guide reset requested");
        self.blocked.remove(&guide_id);
        self.resets += 1;
        Ok(())
    }

    /// Drive the simulated day until closing time, the duration cap or the
    /// shutdown signal, then stop every actor.
    pub async fn run(&mut self) -> RunOutcome {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.spawn_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        info!(
            opening_hour = self.config.opening_hour,
            closing_hour = self.config.closing_hour,
            time_scale = self.config.time_scale,
            "Museum doors open"
        );

        let reason = loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, closing early");
                        break StopReason::Shutdown;
                    }
                }

                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.config.simulation_duration {
                        break StopReason::DurationElapsed;
                    }
                    if self.is_closed(elapsed) {
                        break StopReason::Closing;
                    }
                    self.tick(elapsed);
                }
            }
        };

        let elapsed = started.elapsed();
        let outcome = RunOutcome {
            reason,
            seed: self.seed,
            elapsed,
            closed_at: self.clock(elapsed),
            groups_spawned: self.groups_spawned,
            incidents: self.incidents,
            resets: self.resets,
        };

        info!(
            reason = ?outcome.reason,
            closed_at = %outcome.closed_at,
            groups_spawned = outcome.groups_spawned,
            incidents = outcome.incidents,
            "Museum closing"
        );

        self.shutdown().await;
        outcome
    }

    /// Stop all actors.
    pub async fn shutdown(&mut self) {
        self.supervisor.stop_all().await;
        self.guides.clear();
        self.blocked.clear();
        self.coordinator = None;
    }

    /// One pass of the front desk.
    fn tick(&mut self, elapsed: Duration) {
        self.drain_front_desk();

        let reaped = self.supervisor.reap();
        self.reset_due_guides();

        if self.rng.random_bool(self.config.new_group_probability) {
            let profile = self.generator.next_group();
            self.spawn_group(profile);
        }

        if self.rng.random_bool(self.config.incident_probability) {
            if let Some(guide_id) = self.incident_target() {
                let description = INCIDENTS.choose(&mut self.rng).copied().unwrap_or("unwell");
                if let Err(e) = self.trigger_incident(guide_id, description) {
                    debug!(guide_id = %guide_id, error = %e, "Incident not delivered");
                }
            }
        }

        debug!(
            clock = %self.clock(elapsed),
            running = self.supervisor.running_count(),
            reaped,
            available_guides = self.directory.count(Capability::Guide),
            "Museum tick"
        );
    }

    /// A guide with a group in hand: offered or touring, not already blocked.
    fn incident_target(&mut self) -> Option<GuideId> {
        let busy: Vec<GuideId> = self
            .guides
            .iter()
            .filter(|(id, address)| {
                !self.blocked.contains_key(*id)
                    && !address.is_closed()
                    && !self.directory.advertises(address.actor_id(), Capability::Guide)
            })
            .map(|(id, _)| *id)
            .collect();
        busy.choose(&mut self.rng).copied()
    }

    fn reset_due_guides(&mut self) {
        let delay = self.config.blocked_reset_delay;
        let due: Vec<GuideId> = self
            .blocked
            .iter()
            .filter(|(_, since)| since.elapsed() >= delay)
            .map(|(id, _)| *id)
            .collect();

        for guide_id in due {
            if let Err(e) = self.reset_guide(guide_id) {
                warn!(guide_id = %guide_id, error = %e, "Guide reset failed");
                self.blocked.remove(&guide_id);
            }
        }
    }

    /// Nothing replies to the front desk today; anything that lands here is
    /// logged and discarded.
    fn drain_front_desk(&mut self) {
        for envelope in self.desk.drain() {
            debug!(
                sender = %envelope.sender.actor_id(),
                kind = envelope.body.kind(),
                "Front desk message"
            );
        }
    }

    fn open_minutes(&self) -> f64 {
        f64::from(self.config.closing_hour.saturating_sub(self.config.opening_hour)) * 60.0
    }

    fn is_closed(&self, elapsed: Duration) -> bool {
        self.config.simulated_minutes(elapsed) >= self.open_minutes()
    }

    /// Simulated wall clock, `HH:MM`.
    pub fn clock(&self, elapsed: Duration) -> String {
        let minutes = self.config.simulated_minutes(elapsed).min(self.open_minutes()) as u32
            + self.config.opening_hour * 60;
        format!("{:02}:{:02}", minutes / 60, minutes % 60)
    }

    fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            negotiation_timeout: self.config.negotiation_timeout,
            refresh_interval: self.config.coordinator_refresh_interval,
        }
    }

    fn guide_settings(&self) -> GuideSettings {
        GuideSettings {
            max_group_size: self.config.guide_max_group_size,
            explanation_duration: self.config.explanation_duration,
            status_interval: self.config.status_interval,
            rendezvous_point: self.config.rendezvous_point.clone(),
            ..GuideSettings::default()
        }
    }

    fn group_settings(&self) -> GroupSettings {
        GroupSettings {
            question_probability: self.config.question_probability,
            assignment_timeout: self.config.assignment_timeout,
            time_scale: self.config.time_scale,
            satisfaction: SatisfactionModel::default(),
            ..GroupSettings::default()
        }
    }
}
