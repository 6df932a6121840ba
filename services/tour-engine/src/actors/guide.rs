//! Guide actor.
//!
//! A guide advertises the `guide` capability only while it is AVAILABLE.
//! Accepting a request withdraws the capability, so the coordinator's next
//! directory snapshot no longer offers it to anyone else.
//!
//! ```text
//! AVAILABLE --accept--> OFFERED --TOUR_STARTED--> ON_TOUR --last exhibit--> AVAILABLE
//!     ^                    |                         |
//!     +---TOUR_CANCELLED---+                         +--GUIDE_PROBLEM--> BLOCKED
//!     +-----------------------GUIDE_RESET--------------------------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use galerie_events::GuideState;
use galerie_id::{GroupId, GuideId, RequestId};
use tracing::{debug, info, warn};

use super::directory::{Capability, Directory};
use super::framework::{Actor, ActorContext, ActorError, BackoffPolicy};
use super::messages::{Address, Body, Envelope, RefusalReason};
use crate::catalogue::ExhibitCatalogue;
use crate::monitor::MonitoringSink;
use crate::status::Status;
use crate::visitors::GroupProfile;

#[derive(Debug, Clone)]
pub struct GuideSettings {
    pub max_group_size: u32,
    /// Pause in front of each exhibit.
    pub explanation_duration: Duration,
    pub status_interval: Duration,
    pub rendezvous_point: String,
    /// Spacing of announce retries while no coordinator is registered.
    pub announce_backoff: BackoffPolicy,
}

impl Default for GuideSettings {
    fn default() -> Self {
        Self {
            max_group_size: 15,
            explanation_duration: Duration::from_secs(3),
            status_interval: Duration::from_secs(30),
            rendezvous_point: "Hall Napoléon".to_string(),
            announce_backoff: BackoffPolicy::default(),
        }
    }
}

/// The group a guide has accepted.
#[derive(Debug)]
struct Engagement {
    request_id: RequestId,
    group: GroupProfile,
    /// Known once the group sends `TOUR_STARTED`.
    address: Option<Address>,
    next_exhibit: usize,
}

pub struct Guide {
    id: GuideId,
    name: String,
    settings: GuideSettings,
    state: GuideState,
    status: Status,
    engagement: Option<Engagement>,
    /// Bumped whenever a tour starts or is abandoned; stale `PresentNext`
    /// timers carry an older value and are ignored.
    tour_seq: u64,
    directory: Arc<Directory<Envelope>>,
    catalogue: Arc<dyn ExhibitCatalogue>,
    monitor: Arc<dyn MonitoringSink>,
}

impl Guide {
    pub fn new(
        name: impl Into<String>,
        settings: GuideSettings,
        directory: Arc<Directory<Envelope>>,
        catalogue: Arc<dyn ExhibitCatalogue>,
        monitor: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self::with_id(GuideId::new(), name, settings, directory, catalogue, monitor)
    }

    pub fn with_id(
        id: GuideId,
        name: impl Into<String>,
        settings: GuideSettings,
        directory: Arc<Directory<Envelope>>,
        catalogue: Arc<dyn ExhibitCatalogue>,
        monitor: Arc<dyn MonitoringSink>,
    ) -> Self {
        let status = Status::new(settings.rendezvous_point.clone());
        Self {
            id,
            name: name.into(),
            settings,
            state: GuideState::Available,
            status,
            engagement: None,
            tour_seq: 0,
            directory,
            catalogue,
            monitor,
        }
    }

    pub fn id(&self) -> GuideId {
        self.id
    }

    pub fn state(&self) -> GuideState {
        self.state
    }

    fn current_group(&self) -> Option<GroupId> {
        self.engagement.as_ref().map(|e| e.group.group_id)
    }

    fn set_state(&mut self, state: GuideState) {
        if self.state == state {
            return;
        }
        debug!(guide_id = %self.id, from = %self.state, to = %state, "Guide transition");
        self.state = state;
        let group_id = self.current_group();
        self.status.set_available(state == GuideState::Available);
        self.status.set_active(state != GuideState::Blocked);
        self.status.update_properties(|p| p.current_group = group_id);
        self.monitor.on_guide_status_changed(self.id, state, group_id);
    }

    fn coordinator(&self) -> Option<Address> {
        self.directory.find_one(Capability::Coordinator)
    }

    /// Tell the coordinator this guide is free. Retried with backoff while no
    /// coordinator is registered.
    fn announce(&self, ctx: &ActorContext<Envelope>, attempt: u32) {
        let body = Body::GuideAvailable {
            guide_id: self.id,
            max_group_size: self.settings.max_group_size,
        };
        match self.coordinator() {
            Some(coordinator) => {
                if coordinator.send(Envelope::new(ctx.myself(), body)).is_err() {
                    debug!(guide_id = %self.id, "Coordinator gone, announce dropped");
                }
            }
            None => {
                let delay = self.settings.announce_backoff.delay(attempt);
                debug!(guide_id = %self.id, attempt, delay_ms = delay.as_millis() as u64, "No coordinator yet");
                ctx.schedule(
                    delay,
                    Envelope::new(ctx.myself(), Body::RetryAnnounce { attempt: attempt + 1 }),
                );
            }
        }
    }

    fn become_available(&mut self, ctx: &ActorContext<Envelope>) {
        self.engagement = None;
        self.tour_seq += 1;
        self.status.set_location(self.settings.rendezvous_point.clone());
        self.status.update_properties(|p| p.current_exhibit = None);
        self.set_state(GuideState::Available);
        self.directory.register(ctx.myself(), Capability::Guide);
        self.announce(ctx, 0);
    }

    fn on_tour_request(
        &mut self,
        sender: Address,
        request_id: RequestId,
        group: GroupProfile,
        ctx: &ActorContext<Envelope>,
    ) {
        let refusal = if self.state != GuideState::Available {
            Some(RefusalReason::Busy)
        } else if group.size > self.settings.max_group_size {
            Some(RefusalReason::GroupTooLarge {
                size: group.size,
                max: self.settings.max_group_size,
            })
        } else {
            None
        };

        let group_id = group.group_id;
        let reply = match refusal {
            Some(reason) => {
                info!(guide_id = %self.id, group_id = %group_id, request_id = %request_id, reason = %reason, "Refusing tour");
                Body::TourRefused {
                    request_id,
                    group_id,
                    guide_id: self.id,
                    reason,
                }
            }
            None => {
                self.directory.withdraw(ctx.actor_id.as_str(), Capability::Guide);
                let language = group.language.clone();
                self.engagement = Some(Engagement {
                    request_id,
                    group,
                    address: None,
                    next_exhibit: 0,
                });
                self.status.update_properties(|p| p.language = Some(language));
                self.set_state(GuideState::Offered);
                info!(guide_id = %self.id, group_id = %group_id, request_id = %request_id, "Accepted tour");
                Body::TourAccepted {
                    request_id,
                    group_id,
                    guide_id: self.id,
                    guide: ctx.myself().clone(),
                }
            }
        };

        if sender.send(Envelope::new(ctx.myself(), reply)).is_err() {
            debug!(guide_id = %self.id, "Requester gone, reply dropped");
        }
    }

    fn on_tour_started(
        &mut self,
        sender: Address,
        group_id: GroupId,
        ctx: &ActorContext<Envelope>,
    ) -> Result<(), ActorError> {
        if self.state != GuideState::Offered {
            return Err(ActorError::InvalidTransition {
                state: self.state.to_string(),
                event: "TOUR_STARTED",
            });
        }
        let Some(engagement) = self.engagement.as_mut().filter(|e| e.group.group_id == group_id) else {
            return Err(ActorError::Unroutable(format!(
                "TOUR_STARTED from {group_id}, not the accepted group"
            )));
        };

        engagement.address = Some(sender);
        engagement.next_exhibit = 0;
        self.tour_seq += 1;
        self.set_state(GuideState::OnTour);
        info!(guide_id = %self.id, group_id = %group_id, "Tour started");
        self.present_next(ctx);
        Ok(())
    }

    /// Present the next exhibit, or finish once the catalogue is exhausted.
    fn present_next(&mut self, ctx: &ActorContext<Envelope>) {
        let exhibits = self.catalogue.list_exhibits();
        let total = exhibits.len() as u32;
        let Some(engagement) = self.engagement.as_mut() else {
            return;
        };
        let Some(exhibit) = exhibits.get(engagement.next_exhibit).cloned() else {
            self.finish_tour(ctx);
            return;
        };

        engagement.next_exhibit += 1;
        let position = engagement.next_exhibit as u32;
        let group_id = engagement.group.group_id;
        let delivered = engagement.address.as_ref().is_some_and(|group| {
            group
                .send(Envelope::new(
                    ctx.myself(),
                    Body::TableauInfo {
                        guide_id: self.id,
                        group_id,
                        exhibit: exhibit.clone(),
                        position,
                        total,
                    },
                ))
                .is_ok()
        });
        if !delivered {
            warn!(guide_id = %self.id, group_id = %group_id, "Group gone mid-tour, ending tour");
            self.finish_tour(ctx);
            return;
        }

        self.monitor.on_tour_event(self.id, group_id, &exhibit.name);
        debug!(guide_id = %self.id, group_id = %group_id, position, total, exhibit = %exhibit.name, "Presenting exhibit");
        self.status.set_location(exhibit.location);
        self.status.update_properties(|p| p.current_exhibit = Some(exhibit.name));

        ctx.schedule(
            self.settings.explanation_duration,
            Envelope::new(ctx.myself(), Body::PresentNext { tour: self.tour_seq }),
        );
    }

    fn finish_tour(&mut self, ctx: &ActorContext<Envelope>) {
        let Some(engagement) = self.engagement.take() else {
            return;
        };
        let group_id = engagement.group.group_id;
        let presented = engagement.next_exhibit as u32;
        let finished = || Body::TourFinished {
            guide_id: self.id,
            group_id,
            exhibits_presented: presented,
        };

        if let Some(group) = &engagement.address {
            if group.send(Envelope::new(ctx.myself(), finished())).is_err() {
                debug!(guide_id = %self.id, group_id = %group_id, "Group gone before TOUR_FINISHED");
            }
        }
        if let Some(coordinator) = self.coordinator() {
            if coordinator.send(Envelope::new(ctx.myself(), finished())).is_err() {
                debug!(guide_id = %self.id, "Coordinator gone before TOUR_FINISHED");
            }
        }

        info!(guide_id = %self.id, group_id = %group_id, exhibits = presented, "Tour finished");
        self.status
            .update_properties(|p| p.tours_completed += 1);
        self.become_available(ctx);
    }

    fn on_problem(&mut self, description: String, ctx: &ActorContext<Envelope>) {
        if self.state == GuideState::Blocked {
            debug!(guide_id = %self.id, "Already blocked, problem ignored");
            return;
        }

        let group_id = self.current_group();
        warn!(guide_id = %self.id, group_id = ?group_id, description = %description, "Guide problem");

        self.directory.withdraw(ctx.actor_id.as_str(), Capability::Guide);
        if let Some(coordinator) = self.coordinator() {
            let report = Body::GuideProblem {
                guide_id: self.id,
                group_id,
                description,
            };
            if coordinator.send(Envelope::new(ctx.myself(), report)).is_err() {
                debug!(guide_id = %self.id, "Coordinator gone, problem not reported");
            }
        }

        self.set_state(GuideState::Blocked);
        self.engagement = None;
        self.tour_seq += 1;
        self.status.update_properties(|p| {
            p.current_group = None;
            p.current_exhibit = None;
        });
    }
}

#[async_trait]
impl Actor for Guide {
    type Message = Envelope;

    fn name(&self) -> &str {
        "guide"
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Envelope>) -> Result<(), ActorError> {
        self.monitor.on_guide_added(self.id, &self.name);
        self.monitor
            .on_guide_status_changed(self.id, GuideState::Available, None);
        self.directory.register(ctx.myself(), Capability::Guide);
        self.announce(ctx, 0);
        info!(guide_id = %self.id, name = %self.name, max_group_size = self.settings.max_group_size, "Guide on duty");
        Ok(())
    }

    async fn handle(
        &mut self,
        msg: Envelope,
        ctx: &mut ActorContext<Envelope>,
    ) -> Result<bool, ActorError> {
        let Envelope { sender, body } = msg;
        match body {
            Body::TourRequest { request_id, group } => {
                self.on_tour_request(sender, request_id, group, ctx);
            }

            Body::TourCancelled { request_id, .. } => {
                let current = self.engagement.as_ref().map(|e| e.request_id);
                if self.state == GuideState::Offered && current == Some(request_id) {
                    info!(guide_id = %self.id, request_id = %request_id, "Offer cancelled");
                    self.become_available(ctx);
                } else {
                    debug!(guide_id = %self.id, request_id = %request_id, "Stale cancellation ignored");
                }
            }

            Body::TourStarted { group_id, .. } => {
                self.on_tour_started(sender, group_id, ctx)?;
            }

            Body::PresentNext { tour } => {
                if self.state == GuideState::OnTour && tour == self.tour_seq {
                    self.present_next(ctx);
                }
            }

            Body::GuideProblem { description, .. } => {
                self.on_problem(description, ctx);
            }

            Body::GuideReset { .. } => {
                if self.state == GuideState::Blocked {
                    info!(guide_id = %self.id, "Guide reset");
                    self.become_available(ctx);
                } else {
                    debug!(guide_id = %self.id, state = %self.state, "Reset ignored, not blocked");
                }
            }

            Body::RetryAnnounce { attempt } => {
                if self.state == GuideState::Available {
                    self.announce(ctx, attempt);
                }
            }

            other => {
                return Err(ActorError::Unroutable(format!(
                    "{} sent to guide {}",
                    other.kind(),
                    self.id
                )));
            }
        }
        Ok(true)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.settings.status_interval)
    }

    async fn on_tick(&mut self, ctx: &mut ActorContext<Envelope>) -> Result<(), ActorError> {
        let Some(coordinator) = self.coordinator() else {
            return Ok(());
        };
        let report = Body::StatusReport {
            guide_id: self.id,
            status: self.status.snapshot(),
        };
        coordinator.send(Envelope::new(ctx.myself(), report))
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext<Envelope>) {
        self.directory.deregister(&ctx.actor_id);
        debug!(guide_id = %self.id, "Guide off duty");
    }
}
