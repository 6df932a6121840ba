//! Visitor group actor.
//!
//! A group asks the coordinator for a guide, follows whichever guide it is
//! handed, scores its visit and leaves. It never talks to a guide it was not
//! assigned by the coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use galerie_events::{GroupStatus, VisitSummary};
use galerie_id::{GuideId, RequestId};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use super::directory::{Capability, Directory};
use super::framework::{Actor, ActorContext, ActorError, BackoffPolicy};
use super::messages::{Address, Body, Envelope};
use crate::monitor::MonitoringSink;
use crate::satisfaction::{SatisfactionModel, VisitFacts};
use crate::visitors::{GroupProfile, Urgency};

#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub question_probability: f64,
    /// How long to wait in WAITING before asking again.
    pub assignment_timeout: Duration,
    /// Simulated seconds per real second.
    pub time_scale: f64,
    pub satisfaction: SatisfactionModel,
    /// Spacing of retries while no coordinator is registered.
    pub lookup_backoff: BackoffPolicy,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            question_probability: 0.3,
            assignment_timeout: Duration::from_secs(30),
            time_scale: 160.0,
            satisfaction: SatisfactionModel::default(),
            lookup_backoff: BackoffPolicy::default(),
        }
    }
}

pub struct VisitorGroup {
    profile: GroupProfile,
    settings: GroupSettings,
    status: GroupStatus,
    guide: Option<(GuideId, Address)>,
    arrival: DateTime<Utc>,
    departure: Option<DateTime<Utc>>,
    touring_since: Option<Instant>,
    paintings_seen: u32,
    questions_asked: u32,
    /// Real time spent touring, summed over every guide the group had.
    touring_time: Duration,
    satisfaction: Option<u8>,
    /// Bumped on every (re)entry into WAITING so older timeouts are ignored.
    wait_epoch: u64,
    /// Consecutive directory misses for the coordinator.
    lookup_misses: u32,
    directory: Arc<Directory<Envelope>>,
    monitor: Arc<dyn MonitoringSink>,
    rng: StdRng,
}

impl VisitorGroup {
    pub fn new(
        profile: GroupProfile,
        settings: GroupSettings,
        directory: Arc<Directory<Envelope>>,
        monitor: Arc<dyn MonitoringSink>,
        rng: StdRng,
    ) -> Self {
        Self {
            profile,
            settings,
            status: GroupStatus::Waiting,
            guide: None,
            arrival: Utc::now(),
            departure: None,
            touring_since: None,
            paintings_seen: 0,
            questions_asked: 0,
            touring_time: Duration::ZERO,
            satisfaction: None,
            wait_epoch: 0,
            lookup_misses: 0,
            directory,
            monitor,
            rng,
        }
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    pub fn profile(&self) -> &GroupProfile {
        &self.profile
    }

    pub fn paintings_seen(&self) -> u32 {
        self.paintings_seen
    }

    pub fn departure(&self) -> Option<DateTime<Utc>> {
        self.departure
    }

    fn transition(&mut self, next: GroupStatus) -> Result<(), ActorError> {
        if !self.status.can_transition_to(next) {
            return Err(ActorError::InvalidTransition {
                state: self.status.to_string(),
                event: match next {
                    GroupStatus::Waiting => "GUIDE_PROBLEM",
                    GroupStatus::Assigned => "TOUR_ACCEPTED",
                    GroupStatus::Touring => "TOUR_STARTED",
                    GroupStatus::Finished => "TOUR_FINISHED",
                    GroupStatus::Departed => "DEPART",
                },
            });
        }
        debug!(group_id = %self.profile.group_id, from = %self.status, to = %next, "Group transition");
        self.status = next;
        self.monitor
            .on_group_status_changed(self.profile.group_id, next);
        Ok(())
    }

    fn request_body(&self) -> Body {
        let request_id = RequestId::new();
        let group = self.profile.clone();
        match self.profile.effective_urgency() {
            Urgency::Emergency => Body::Emergency { request_id, group },
            Urgency::Priority => Body::PriorityGroup { request_id, group },
            Urgency::Normal => Body::TourRequest { request_id, group },
        }
    }

    /// Ask the coordinator for a guide and arm the assignment timeout. With
    /// no coordinator registered yet, retry on the backoff schedule instead.
    fn request_guide(&mut self, ctx: &ActorContext<Envelope>) {
        self.wait_epoch += 1;
        let epoch = self.wait_epoch;

        let delay = match self.directory.find_one(Capability::Coordinator) {
            Some(coordinator) => {
                let body = self.request_body();
                debug!(group_id = %self.profile.group_id, kind = body.kind(), "Requesting a guide");
                if coordinator.send(Envelope::new(ctx.myself(), body)).is_err() {
                    debug!(group_id = %self.profile.group_id, "Coordinator gone, request dropped");
                }
                self.lookup_misses = 0;
                self.settings.assignment_timeout
            }
            None => {
                let delay = self.settings.lookup_backoff.delay(self.lookup_misses);
                self.lookup_misses += 1;
                debug!(
                    group_id = %self.profile.group_id,
                    misses = self.lookup_misses,
                    delay_ms = delay.as_millis() as u64,
                    "No coordinator yet"
                );
                delay
            }
        };

        ctx.schedule(
            delay,
            Envelope::new(ctx.myself(), Body::AssignmentTimeout { epoch }),
        );
    }

    fn is_current_guide(&self, guide_id: GuideId) -> bool {
        self.guide.as_ref().is_some_and(|(id, _)| *id == guide_id)
    }

    fn stop_touring_clock(&mut self) {
        if let Some(since) = self.touring_since.take() {
            self.touring_time += since.elapsed();
        }
    }

    fn on_accepted(
        &mut self,
        guide_id: GuideId,
        guide: Address,
        ctx: &ActorContext<Envelope>,
    ) -> Result<(), ActorError> {
        self.transition(GroupStatus::Assigned)?;
        self.wait_epoch += 1;
        info!(group_id = %self.profile.group_id, guide_id = %guide_id, "Guide assigned");

        let started = Body::TourStarted {
            group_id: self.profile.group_id,
            guide_id,
        };
        if guide.send(Envelope::new(ctx.myself(), started)).is_err() {
            warn!(group_id = %self.profile.group_id, guide_id = %guide_id, "Assigned guide is gone, waiting again");
            self.transition(GroupStatus::Waiting)?;
            self.wait_epoch += 1;
            ctx.schedule(
                self.settings.assignment_timeout,
                Envelope::new(ctx.myself(), Body::AssignmentTimeout { epoch: self.wait_epoch }),
            );
            return Ok(());
        }

        self.transition(GroupStatus::Touring)?;
        self.guide = Some((guide_id, guide));
        self.touring_since = Some(Instant::now());
        Ok(())
    }

    fn on_problem(&mut self, guide_id: GuideId, ctx: &ActorContext<Envelope>) -> Result<(), ActorError> {
        if !self.is_current_guide(guide_id) {
            debug!(group_id = %self.profile.group_id, guide_id = %guide_id, "Problem for another guide ignored");
            return Ok(());
        }
        self.transition(GroupStatus::Waiting)?;
        self.stop_touring_clock();
        self.guide = None;
        info!(
            group_id = %self.profile.group_id,
            guide_id = %guide_id,
            paintings_seen = self.paintings_seen,
            "Guide lost, back to waiting"
        );

        // The coordinator has already re-queued us; only arm the timeout.
        self.wait_epoch += 1;
        ctx.schedule(
            self.settings.assignment_timeout,
            Envelope::new(ctx.myself(), Body::AssignmentTimeout { epoch: self.wait_epoch }),
        );
        Ok(())
    }

    /// Wrap up the visit. Returns the summary reported to the monitor.
    fn finish(&mut self) -> Result<VisitSummary, ActorError> {
        self.transition(GroupStatus::Finished)?;
        self.stop_touring_clock();
        self.guide = None;

        let simulated_minutes = self.touring_time.as_secs_f64() * self.settings.time_scale / 60.0;
        let facts = VisitFacts {
            simulated_minutes,
            paintings_seen: self.paintings_seen,
            questions_asked: self.questions_asked,
            group_size: self.profile.size,
            is_vip: self.profile.is_vip,
        };
        let satisfaction = self.settings.satisfaction.score(&facts, &mut self.rng);
        self.satisfaction = Some(satisfaction);

        Ok(VisitSummary {
            group_id: self.profile.group_id,
            size: self.profile.size,
            nationality: self.profile.nationality.clone(),
            paintings_seen: self.paintings_seen,
            questions_asked: self.questions_asked,
            tour_duration_ms: self.touring_time.as_millis() as u64,
            simulated_minutes,
            satisfaction: Some(satisfaction),
            was_vip: self.profile.is_vip,
        })
    }
}

#[async_trait]
impl Actor for VisitorGroup {
    type Message = Envelope;

    fn name(&self) -> &str {
        "group"
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Envelope>) -> Result<(), ActorError> {
        let group_id = self.profile.group_id;
        self.directory.register(ctx.myself(), Capability::VisitorGroup);
        self.monitor
            .on_group_added(group_id, &self.profile.nationality, self.profile.size);
        self.monitor.on_group_status_changed(group_id, self.status);
        info!(
            group_id = %group_id,
            size = self.profile.size,
            nationality = %self.profile.nationality,
            language = %self.profile.language,
            urgency = ?self.profile.effective_urgency(),
            "Group arrived"
        );
        self.request_guide(ctx);
        Ok(())
    }

    async fn handle(
        &mut self,
        msg: Envelope,
        ctx: &mut ActorContext<Envelope>,
    ) -> Result<bool, ActorError> {
        match msg.body {
            Body::TourAccepted { guide_id, guide, .. } => {
                self.on_accepted(guide_id, guide, ctx)?;
            }

            Body::TableauInfo {
                guide_id,
                exhibit,
                position,
                total,
                ..
            } => {
                if self.status != GroupStatus::Touring || !self.is_current_guide(guide_id) {
                    return Err(ActorError::Unroutable(format!(
                        "TABLEAU_INFO from {guide_id} while {}",
                        self.status
                    )));
                }
                self.paintings_seen += 1;
                if self.rng.random_bool(self.settings.question_probability) {
                    self.questions_asked += 1;
                    debug!(group_id = %self.profile.group_id, exhibit = %exhibit.name, "Question asked");
                }
                debug!(group_id = %self.profile.group_id, position, total, exhibit = %exhibit.name, "Viewing exhibit");
            }

            Body::TourFinished { guide_id, .. } => {
                if !self.is_current_guide(guide_id) {
                    return Err(ActorError::Unroutable(format!(
                        "TOUR_FINISHED from {guide_id}, not our guide"
                    )));
                }
                let summary = self.finish()?;
                info!(
                    group_id = %summary.group_id,
                    paintings_seen = summary.paintings_seen,
                    questions_asked = summary.questions_asked,
                    satisfaction = ?summary.satisfaction,
                    "Tour over"
                );
                self.transition(GroupStatus::Departed)?;
                self.departure = Some(Utc::now());
                self.monitor.on_group_departed(&summary);
                debug!(
                    group_id = %summary.group_id,
                    visit_secs = (Utc::now() - self.arrival).num_seconds(),
                    "Group departed"
                );
                return Ok(false);
            }

            Body::GuideProblem { guide_id, .. } => {
                self.on_problem(guide_id, ctx)?;
            }

            Body::AssignmentTimeout { epoch } => {
                if self.status == GroupStatus::Waiting && epoch == self.wait_epoch {
                    info!(group_id = %self.profile.group_id, "Still waiting, asking again");
                    self.request_guide(ctx);
                }
            }

            other => {
                return Err(ActorError::Unroutable(format!(
                    "{} sent to group {}",
                    other.kind(),
                    self.profile.group_id
                )));
            }
        }
        Ok(true)
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext<Envelope>) {
        self.directory.deregister(&ctx.actor_id);
    }
}
