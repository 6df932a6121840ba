//! Coordinator actor - matches waiting groups with available guides.
//!
//! The coordinator is the only actor that pairs a group with a guide. It runs
//! at most one negotiation at a time: offer the head of the waiting queue to
//! the best candidate guide, wait for an answer or a timeout, and move to the
//! next candidate on refusal. An accepted offer becomes an [`Assignment`].
//!
//! # Guarantees
//!
//! - A guide and a group each belong to at most one assignment.
//! - A group is in exactly one of: waiting queue, pending negotiation,
//!   assignment.
//! - A guide that accepts an offer the coordinator no longer wants gets a
//!   `TOUR_CANCELLED` back and is never left in OFFERED.
//!
//! # Matching order
//!
//! Groups: emergency, then priority, then normal, FIFO within a class.
//! Guides: never-assigned first, then least recently assigned, then
//! registration order.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use galerie_id::{AssignmentId, GroupId, GuideId, RequestId};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::directory::{Capability, Directory};
use super::framework::{Actor, ActorContext, ActorError};
use super::messages::{Address, Body, Envelope, RefusalReason};
use super::queue::{WaitingEntry, WaitingQueue};
use crate::monitor::MonitoringSink;
use crate::status::Status;
use crate::visitors::{GroupProfile, Urgency};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// How long a guide has to answer an offer.
    pub negotiation_timeout: Duration,
    /// Directory refresh and summary period.
    pub refresh_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(10),
        }
    }
}

/// The coordinator's view of one guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideView {
    Idle,
    Negotiating(RequestId),
    Assigned,
    Blocked,
}

#[derive(Debug)]
struct GuideRecord {
    address: Address,
    max_group_size: u32,
    view: GuideView,
    /// Whether the last directory snapshot (or announce) showed the guide
    /// advertising the `guide` capability.
    advertised: bool,
    registered_seq: u64,
    last_assigned: Option<Instant>,
    last_report: Option<Status>,
}

impl GuideRecord {
    fn is_available(&self) -> bool {
        self.view == GuideView::Idle && self.advertised
    }
}

/// A guide and a group paired for one tour.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub group_id: GroupId,
    pub guide_id: GuideId,
    pub accepted_at: DateTime<Utc>,
    entry: WaitingEntry,
}

impl Assignment {
    pub fn group(&self) -> &GroupProfile {
        &self.entry.group
    }
}

#[derive(Debug)]
struct Negotiation {
    request_id: RequestId,
    guide_id: GuideId,
    entry: WaitingEntry,
    /// Candidates not yet asked, best first.
    remaining: VecDeque<GuideId>,
    timer: JoinHandle<()>,
}

/// Running totals, logged with every summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorCounters {
    pub requests: u64,
    pub offers: u64,
    pub assignments: u64,
    pub refusals: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub problems: u64,
    pub tours_completed: u64,
}

pub struct Coordinator {
    settings: CoordinatorSettings,
    directory: Arc<Directory<Envelope>>,
    monitor: Arc<dyn MonitoringSink>,
    waiting: WaitingQueue,
    guides: HashMap<GuideId, GuideRecord>,
    assignments: HashMap<GuideId, Assignment>,
    by_group: HashMap<GroupId, GuideId>,
    negotiation: Option<Negotiation>,
    /// Groups no current guide could take. Cleared when a guide becomes
    /// available that was not before.
    exhausted: HashSet<GroupId>,
    registrations: u64,
    counters: CoordinatorCounters,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        directory: Arc<Directory<Envelope>>,
        monitor: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            settings,
            directory,
            monitor,
            waiting: WaitingQueue::new(),
            guides: HashMap::new(),
            assignments: HashMap::new(),
            by_group: HashMap::new(),
            negotiation: None,
            exhausted: HashSet::new(),
            registrations: 0,
            counters: CoordinatorCounters::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Waiting groups in matching order.
    pub fn waiting_groups(&self) -> Vec<GroupId> {
        self.waiting.group_ids()
    }

    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values()
    }

    pub fn assignment_for_group(&self, group_id: GroupId) -> Option<&Assignment> {
        self.by_group
            .get(&group_id)
            .and_then(|guide_id| self.assignments.get(guide_id))
    }

    /// `(request, guide, group)` of the negotiation in flight.
    pub fn pending_negotiation(&self) -> Option<(RequestId, GuideId, GroupId)> {
        self.negotiation
            .as_ref()
            .map(|n| (n.request_id, n.guide_id, n.entry.group_id()))
    }

    /// Guides that could be offered a group right now.
    pub fn available_guides(&self) -> BTreeSet<GuideId> {
        self.guides
            .iter()
            .filter(|(_, r)| r.is_available())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn guide_view(&self, guide_id: GuideId) -> Option<GuideView> {
        self.guides.get(&guide_id).map(|r| r.view)
    }

    pub fn last_report(&self, guide_id: GuideId) -> Option<&Status> {
        self.guides.get(&guide_id).and_then(|r| r.last_report.as_ref())
    }

    pub fn is_exhausted(&self, group_id: GroupId) -> bool {
        self.exhausted.contains(&group_id)
    }

    pub fn counters(&self) -> &CoordinatorCounters {
        &self.counters
    }

    /// Check the pairing invariants; returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen_groups = HashSet::new();
        for group_id in self.waiting.group_ids() {
            if !seen_groups.insert(group_id) {
                return Err(format!("group {group_id} queued twice"));
            }
        }
        if let Some(n) = &self.negotiation {
            if !seen_groups.insert(n.entry.group_id()) {
                return Err(format!("group {} both waiting and negotiating", n.entry.group_id()));
            }
            if self.assignments.contains_key(&n.guide_id) {
                return Err(format!("guide {} negotiating while assigned", n.guide_id));
            }
        }
        for (guide_id, assignment) in &self.assignments {
            if *guide_id != assignment.guide_id {
                return Err(format!("assignment {} filed under {guide_id}", assignment.assignment_id));
            }
            if !seen_groups.insert(assignment.group_id) {
                return Err(format!("group {} assigned while waiting", assignment.group_id));
            }
            if self.by_group.get(&assignment.group_id) != Some(guide_id) {
                return Err(format!("group index out of sync for {}", assignment.group_id));
            }
            if self.guides.get(guide_id).is_some_and(|r| r.is_available()) {
                return Err(format!("assigned guide {guide_id} still available"));
            }
        }
        if self.by_group.len() != self.assignments.len() {
            return Err("group index has stale entries".to_string());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Matching
    // -------------------------------------------------------------------------

    /// Idle, advertising guides able to take `size`, best candidate first.
    fn candidates_for(&self, size: u32) -> VecDeque<GuideId> {
        let mut candidates: Vec<_> = self
            .guides
            .iter()
            .filter(|(_, r)| r.is_available() && r.max_group_size >= size)
            .collect();
        candidates.sort_by_key(|(_, r)| (r.last_assigned, r.registered_seq));
        candidates.into_iter().map(|(id, _)| *id).collect()
    }

    /// Start a negotiation for the most urgent group some guide can take.
    fn run_matching(&mut self, ctx: &ActorContext<Envelope>) {
        if self.negotiation.is_some() {
            return;
        }

        let order: Vec<(GroupId, u32)> = self
            .waiting
            .iter()
            .filter(|e| !self.exhausted.contains(&e.group_id()))
            .map(|e| (e.group_id(), e.group.size))
            .collect();

        for (group_id, size) in order {
            let candidates = self.candidates_for(size);
            if candidates.is_empty() {
                debug!(group_id = %group_id, size, "No guide can take group for now");
                self.exhausted.insert(group_id);
                continue;
            }
            let Some(entry) = self.waiting.remove(group_id) else {
                continue;
            };
            self.negotiate(entry, candidates, ctx);
            if self.negotiation.is_some() {
                return;
            }
        }
    }

    /// Offer `entry` to the first reachable candidate. With none left the
    /// group goes back to the front of its class, parked until a guide frees
    /// up.
    fn negotiate(
        &mut self,
        entry: WaitingEntry,
        mut candidates: VecDeque<GuideId>,
        ctx: &ActorContext<Envelope>,
    ) {
        let group_id = entry.group_id();

        while let Some(guide_id) = candidates.pop_front() {
            let Some(record) = self.guides.get_mut(&guide_id) else {
                continue;
            };
            if !record.is_available() {
                continue;
            }

            let request_id = RequestId::new();
            let offer = Body::TourRequest {
                request_id,
                group: entry.group.clone(),
            };
            if record.address.send(Envelope::new(ctx.myself(), offer)).is_err() {
                warn!(guide_id = %guide_id, "Guide unreachable, dropping it");
                self.drop_guide(guide_id, ctx);
                continue;
            }
            record.view = GuideView::Negotiating(request_id);

            let timer = ctx.schedule(
                self.settings.negotiation_timeout,
                Envelope::new(ctx.myself(), Body::NegotiationTimeout { request_id }),
            );
            self.counters.offers += 1;
            info!(
                group_id = %group_id,
                guide_id = %guide_id,
                request_id = %request_id,
                class = ?entry.class,
                "Offering group to guide"
            );
            self.negotiation = Some(Negotiation {
                request_id,
                guide_id,
                entry,
                remaining: candidates,
                timer,
            });
            return;
        }

        info!(group_id = %group_id, "No candidate accepted, group waits for a guide to free up");
        self.exhausted.insert(group_id);
        self.waiting.push_front(entry);
    }

    /// Take the pending negotiation if it is the one `request_id` refers to.
    fn conclude(&mut self, request_id: RequestId) -> Option<Negotiation> {
        if self
            .negotiation
            .as_ref()
            .is_some_and(|n| n.request_id == request_id)
        {
            let negotiation = self.negotiation.take()?;
            negotiation.timer.abort();
            Some(negotiation)
        } else {
            None
        }
    }

    /// The current candidate is out; `view` is what it becomes. Move on to
    /// the next candidate, then let matching continue.
    fn next_candidate(
        &mut self,
        negotiation: Negotiation,
        view: GuideView,
        ctx: &ActorContext<Envelope>,
    ) {
        if let Some(record) = self.guides.get_mut(&negotiation.guide_id) {
            if record.view == GuideView::Negotiating(negotiation.request_id) {
                record.view = view;
            }
        }
        self.negotiate(negotiation.entry, negotiation.remaining, ctx);
        self.run_matching(ctx);
    }

    /// Pre-empt the pending negotiation: cancel the offer and put its group
    /// back unchanged at the front of its class.
    fn preempt(&mut self, ctx: &ActorContext<Envelope>) {
        let Some(negotiation) = self.negotiation.take() else {
            return;
        };
        negotiation.timer.abort();
        self.counters.cancellations += 1;

        if let Some(record) = self.guides.get_mut(&negotiation.guide_id) {
            cancel_offer(&record.address, negotiation.request_id, negotiation.guide_id, ctx);
            if record.view == GuideView::Negotiating(negotiation.request_id) {
                record.view = GuideView::Idle;
            }
        }
        info!(
            group_id = %negotiation.entry.group_id(),
            guide_id = %negotiation.guide_id,
            "Negotiation pre-empted by emergency"
        );
        self.waiting.push_front(negotiation.entry);
    }

    // -------------------------------------------------------------------------
    // Assignment lifecycle
    // -------------------------------------------------------------------------

    fn assign(&mut self, negotiation: Negotiation, ctx: &ActorContext<Envelope>) {
        let Negotiation {
            request_id,
            guide_id,
            entry,
            ..
        } = negotiation;
        let group_id = entry.group_id();

        let Some(record) = self.guides.get_mut(&guide_id) else {
            warn!(guide_id = %guide_id, group_id = %group_id, "Accepting guide unknown, re-queueing group");
            self.waiting.push_front(entry);
            return;
        };

        let accepted = Body::TourAccepted {
            request_id,
            group_id,
            guide_id,
            guide: record.address.clone(),
        };
        if entry.address.send(Envelope::new(ctx.myself(), accepted)).is_err() {
            warn!(group_id = %group_id, "Group left before its guide was confirmed");
            let guide = record.address.clone();
            record.view = GuideView::Idle;
            record.advertised = false;
            cancel_offer(&guide, request_id, guide_id, ctx);
            return;
        }

        record.view = GuideView::Assigned;
        record.advertised = false;
        record.last_assigned = Some(Instant::now());

        let assignment = Assignment {
            assignment_id: AssignmentId::new(),
            group_id,
            guide_id,
            accepted_at: Utc::now(),
            entry,
        };
        info!(
            assignment_id = %assignment.assignment_id,
            group_id = %group_id,
            guide_id = %guide_id,
            "Assignment recorded"
        );
        self.exhausted.remove(&group_id);
        self.by_group.insert(group_id, guide_id);
        self.assignments.insert(guide_id, assignment);
        self.counters.assignments += 1;
    }

    /// End `guide_id`'s assignment because the guide can no longer lead it:
    /// re-queue the group at the front of the priority lane and tell it.
    fn release_assignment(&mut self, guide_id: GuideId, description: &str, ctx: &ActorContext<Envelope>) {
        let Some(assignment) = self.assignments.remove(&guide_id) else {
            return;
        };
        self.by_group.remove(&assignment.group_id);
        let group_id = assignment.group_id;
        let mut entry = assignment.entry;

        let relay = Body::GuideProblem {
            guide_id,
            group_id: Some(group_id),
            description: description.to_string(),
        };
        if entry.address.send(Envelope::new(ctx.myself(), relay)).is_err() {
            debug!(group_id = %group_id, "Group gone, not re-queued");
            return;
        }

        if self.waiting.contains(group_id) {
            return;
        }
        entry.class = entry.class.min(Urgency::Priority);
        entry.requeues += 1;
        info!(group_id = %group_id, guide_id = %guide_id, requeues = entry.requeues, "Group re-queued after guide problem");
        self.exhausted.remove(&group_id);
        self.waiting.push_front(entry);
    }

    /// Forget a guide whose actor is gone.
    fn drop_guide(&mut self, guide_id: GuideId, ctx: &ActorContext<Envelope>) {
        if self.guides.remove(&guide_id).is_none() {
            return;
        }
        info!(guide_id = %guide_id, "Guide left");
        if self.negotiation.as_ref().is_some_and(|n| n.guide_id == guide_id) {
            if let Some(negotiation) = self.negotiation.take() {
                negotiation.timer.abort();
                self.negotiate(negotiation.entry, negotiation.remaining, ctx);
            }
        }
        self.release_assignment(guide_id, "guide left the museum", ctx);
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    fn on_request(&mut self, sender: Address, group: GroupProfile, class: Urgency, ctx: &ActorContext<Envelope>) {
        let group_id = group.group_id;

        if self.by_group.contains_key(&group_id) {
            debug!(group_id = %group_id, "Request from assigned group ignored");
            return;
        }
        if self
            .negotiation
            .as_ref()
            .is_some_and(|n| n.entry.group_id() == group_id)
        {
            debug!(group_id = %group_id, "Request for group under negotiation ignored");
            return;
        }
        let changed = if self.waiting.contains(group_id) {
            let promoted = self.waiting.promote(group_id, class);
            if promoted {
                info!(group_id = %group_id, class = ?class, "Waiting group promoted");
            } else {
                debug!(group_id = %group_id, "Duplicate request ignored");
            }
            promoted
        } else {
            self.counters.requests += 1;
            info!(group_id = %group_id, size = group.size, class = ?class, "Group queued");
            self.waiting
                .push_back(WaitingEntry::new(group, sender, class));
            true
        };

        // A resent request leaves the current negotiation alone.
        if changed
            && class == Urgency::Emergency
            && self
                .negotiation
                .as_ref()
                .is_some_and(|n| n.entry.class != Urgency::Emergency)
        {
            self.preempt(ctx);
        }
        self.run_matching(ctx);
    }

    fn on_accepted(&mut self, sender: Address, request_id: RequestId, guide_id: GuideId, ctx: &ActorContext<Envelope>) {
        let current = self
            .negotiation
            .as_ref()
            .is_some_and(|n| n.request_id == request_id && n.guide_id == guide_id);
        if !current {
            warn!(guide_id = %guide_id, request_id = %request_id, "Late acceptance, cancelling");
            self.counters.cancellations += 1;
            cancel_offer(&sender, request_id, guide_id, ctx);
            return;
        }
        if let Some(negotiation) = self.conclude(request_id) {
            self.assign(negotiation, ctx);
        }
        self.run_matching(ctx);
    }

    fn on_refused(&mut self, request_id: RequestId, guide_id: GuideId, reason: RefusalReason, ctx: &ActorContext<Envelope>) {
        let current = self
            .negotiation
            .as_ref()
            .is_some_and(|n| n.request_id == request_id && n.guide_id == guide_id);
        if !current {
            debug!(guide_id = %guide_id, request_id = %request_id, "Late refusal ignored");
            return;
        }
        self.counters.refusals += 1;
        info!(guide_id = %guide_id, request_id = %request_id, reason = %reason, "Offer refused");
        if let Some(negotiation) = self.conclude(request_id) {
            self.next_candidate(negotiation, GuideView::Idle, ctx);
        }
    }

    fn on_negotiation_timeout(&mut self, request_id: RequestId, ctx: &ActorContext<Envelope>) {
        let Some(negotiation) = self.conclude(request_id) else {
            return;
        };
        self.counters.timeouts += 1;
        warn!(
            guide_id = %negotiation.guide_id,
            group_id = %negotiation.entry.group_id(),
            request_id = %request_id,
            "Guide did not answer in time"
        );
        if let Some(record) = self.guides.get(&negotiation.guide_id) {
            cancel_offer(&record.address, request_id, negotiation.guide_id, ctx);
        }
        self.next_candidate(negotiation, GuideView::Idle, ctx);
    }

    fn on_guide_available(&mut self, sender: Address, guide_id: GuideId, max_group_size: u32, ctx: &ActorContext<Envelope>) {
        let before = self.available_guides();
        let advertised = self
            .directory
            .advertises(sender.actor_id(), Capability::Guide);

        match self.guides.get_mut(&guide_id) {
            Some(record) => {
                record.address = sender;
                record.max_group_size = max_group_size;
                record.advertised = advertised;
                if record.view == GuideView::Blocked {
                    info!(guide_id = %guide_id, "Guide back in service");
                    record.view = GuideView::Idle;
                }
            }
            None => {
                self.registrations += 1;
                info!(guide_id = %guide_id, max_group_size, "Guide joined");
                self.guides.insert(
                    guide_id,
                    GuideRecord {
                        address: sender,
                        max_group_size,
                        view: GuideView::Idle,
                        advertised,
                        registered_seq: self.registrations,
                        last_assigned: None,
                        last_report: None,
                    },
                );
            }
        }

        self.note_availability(&before);
        self.run_matching(ctx);
    }

    fn on_tour_finished(&mut self, guide_id: GuideId, group_id: GroupId) {
        let matches = self
            .assignments
            .get(&guide_id)
            .is_some_and(|a| a.group_id == group_id);
        if !matches {
            debug!(guide_id = %guide_id, group_id = %group_id, "Finish for unknown assignment ignored");
            return;
        }
        if let Some(assignment) = self.assignments.remove(&guide_id) {
            self.by_group.remove(&group_id);
            self.counters.tours_completed += 1;
            self.monitor
                .on_tour_completed(group_id, guide_id, assignment.group().size);
            info!(
                assignment_id = %assignment.assignment_id,
                group_id = %group_id,
                guide_id = %guide_id,
                "Assignment closed"
            );
        }
        // Not offered again until it announces itself.
        if let Some(record) = self.guides.get_mut(&guide_id) {
            record.view = GuideView::Idle;
            record.advertised = false;
        }
    }

    fn on_problem(&mut self, guide_id: GuideId, description: &str, ctx: &ActorContext<Envelope>) {
        self.counters.problems += 1;
        warn!(guide_id = %guide_id, description = %description, "Guide reported a problem");

        if let Some(record) = self.guides.get_mut(&guide_id) {
            record.view = GuideView::Blocked;
            record.advertised = false;
        }

        if self.negotiation.as_ref().is_some_and(|n| n.guide_id == guide_id) {
            if let Some(negotiation) = self.negotiation.take() {
                negotiation.timer.abort();
                self.negotiate(negotiation.entry, negotiation.remaining, ctx);
            }
        }

        self.release_assignment(guide_id, description, ctx);
        self.run_matching(ctx);
    }

    /// Re-read the directory: forget dead guides and pick up advertising
    /// changes the guides did not announce.
    fn refresh(&mut self, ctx: &ActorContext<Envelope>) {
        let before = self.available_guides();

        let gone: Vec<GuideId> = self
            .guides
            .iter()
            .filter(|(_, r)| r.address.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for guide_id in gone {
            self.drop_guide(guide_id, ctx);
        }

        let advertising: HashSet<String> = self
            .directory
            .find(Capability::Guide)
            .iter()
            .map(|h| h.actor_id().to_string())
            .collect();
        for record in self.guides.values_mut() {
            record.advertised = advertising.contains(record.address.actor_id());
        }

        self.note_availability(&before);
        self.run_matching(ctx);
    }

    fn note_availability(&mut self, before: &BTreeSet<GuideId>) {
        let after = self.available_guides();
        if after.difference(before).next().is_some() && !self.exhausted.is_empty() {
            debug!(parked = self.exhausted.len(), "Guide freed up, retrying parked groups");
            self.exhausted.clear();
        }
    }

    fn log_summary(&self) {
        let busy: Vec<String> = self
            .guides
            .iter()
            .filter_map(|(id, r)| {
                let report = r.last_report.as_ref()?;
                Some(format!("{}@{}", id.short(), report.location()))
            })
            .collect();
        info!(
            waiting = self.waiting.len(),
            parked = self.exhausted.len(),
            guides = self.guides.len(),
            available = self.available_guides().len(),
            assignments = self.assignments.len(),
            negotiating = self.negotiation.is_some(),
            tours_completed = self.counters.tours_completed,
            locations = ?busy,
            "Coordinator summary"
        );
        if let Err(violation) = self.check_invariants() {
            warn!(violation = %violation, "Coordinator invariant violated");
        }
    }
}

/// Withdraw an offer from a guide. A guide that already moved on ignores it.
fn cancel_offer(guide: &Address, request_id: RequestId, guide_id: GuideId, ctx: &ActorContext<Envelope>) {
    let cancel = Body::TourCancelled {
        request_id,
        guide_id,
    };
    if guide.send(Envelope::new(ctx.myself(), cancel)).is_err() {
        debug!(guide_id = %guide_id, "Guide gone, cancellation dropped");
    }
}

#[async_trait]
impl Actor for Coordinator {
    type Message = Envelope;

    fn name(&self) -> &str {
        "coordinator"
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Envelope>) -> Result<(), ActorError> {
        self.directory.register(ctx.myself(), Capability::Coordinator);
        info!(actor_id = %ctx.actor_id, "Coordinator ready");
        Ok(())
    }

    async fn handle(
        &mut self,
        msg: Envelope,
        ctx: &mut ActorContext<Envelope>,
    ) -> Result<bool, ActorError> {
        let Envelope { sender, body } = msg;
        match body {
            Body::TourRequest { group, .. } => {
                let class = group.effective_urgency();
                self.on_request(sender, group, class, ctx);
            }
            Body::PriorityGroup { group, .. } => {
                let class = group.effective_urgency().min(Urgency::Priority);
                self.on_request(sender, group, class, ctx);
            }
            Body::Emergency { group, .. } => {
                self.on_request(sender, group, Urgency::Emergency, ctx);
            }
            Body::TourAccepted {
                request_id,
                guide_id,
                ..
            } => self.on_accepted(sender, request_id, guide_id, ctx),
            Body::TourRefused {
                request_id,
                guide_id,
                reason,
                ..
            } => self.on_refused(request_id, guide_id, reason, ctx),
            Body::NegotiationTimeout { request_id } => self.on_negotiation_timeout(request_id, ctx),
            Body::GuideAvailable {
                guide_id,
                max_group_size,
            } => self.on_guide_available(sender, guide_id, max_group_size, ctx),
            Body::TourFinished {
                guide_id, group_id, ..
            } => {
                self.on_tour_finished(guide_id, group_id);
                self.run_matching(ctx);
            }
            Body::GuideProblem {
                guide_id,
                description,
                ..
            } => self.on_problem(guide_id, &description, ctx),
            Body::StatusReport { guide_id, status } => match self.guides.get_mut(&guide_id) {
                Some(record) => record.last_report = Some(status),
                None => {
                    return Err(ActorError::Unroutable(format!(
                        "STATUS_REPORT from unknown guide {guide_id}"
                    )))
                }
            },
            other => {
                return Err(ActorError::Unroutable(format!(
                    "{} sent to coordinator",
                    other.kind()
                )));
            }
        }
        Ok(true)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.settings.refresh_interval)
    }

    async fn on_tick(&mut self, ctx: &mut ActorContext<Envelope>) -> Result<(), ActorError> {
        self.refresh(ctx);
        self.log_summary();
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext<Envelope>) {
        if let Some(negotiation) = self.negotiation.take() {
            negotiation.timer.abort();
        }
        self.directory.deregister(&ctx.actor_id);
        info!(
            waiting = self.waiting.len(),
            assignments = self.assignments.len(),
            counters = ?self.counters,
            "Coordinator stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::framework::{mailbox, Mailbox};
    use crate::monitor::NoopSink;
    use tokio::sync::watch;

    struct Harness {
        coordinator: Coordinator,
        ctx: ActorContext<Envelope>,
        directory: Arc<Directory<Envelope>>,
        own: Mailbox<Envelope>,
        _shutdown: watch::Sender<bool>,
    }

    struct Peer {
        address: Address,
        inbox: Mailbox<Envelope>,
    }

    struct TestGuide {
        id: GuideId,
        peer: Peer,
    }

    struct TestGroup {
        profile: GroupProfile,
        peer: Peer,
    }

    impl Harness {
        async fn new() -> Self {
            let directory = Arc::new(Directory::new());
            let mut coordinator = Coordinator::new(
                CoordinatorSettings {
                    negotiation_timeout: Duration::from_secs(60),
                    ..CoordinatorSettings::default()
                },
                directory.clone(),
                Arc::new(NoopSink),
            );
            let (me, own) = mailbox("coordinator#0");
            let (tx, rx) = watch::channel(false);
            let mut ctx = ActorContext::new(me, rx);
            coordinator.on_start(&mut ctx).await.unwrap();
            Self {
                coordinator,
                ctx,
                directory,
                own,
                _shutdown: tx,
            }
        }

        async fn deliver(&mut self, from: &Address, body: Body) {
            self.coordinator
                .handle(Envelope::new(from, body), &mut self.ctx)
                .await
                .unwrap();
            self.coordinator.check_invariants().unwrap();
        }

        async fn add_guide(&mut self, name: &str, max_group_size: u32) -> TestGuide {
            let (address, inbox) = mailbox(format!("guide#{name}"));
            self.directory.register(&address, Capability::Guide);
            let id = GuideId::new();
            self.deliver(
                &address,
                Body::GuideAvailable {
                    guide_id: id,
                    max_group_size,
                },
            )
            .await;
            TestGuide {
                id,
                peer: Peer { address, inbox },
            }
        }

        async fn arrive(&mut self, profile: GroupProfile) -> TestGroup {
            let (address, inbox) = mailbox(format!("group#{}", profile.group_id.short()));
            let request_id = RequestId::new();
            let group = profile.clone();
            let body = match profile.effective_urgency() {
                Urgency::Emergency => Body::Emergency { request_id, group },
                Urgency::Priority => Body::PriorityGroup { request_id, group },
                Urgency::Normal => Body::TourRequest { request_id, group },
            };
            self.deliver(&address, body).await;
            TestGroup {
                profile,
                peer: Peer { address, inbox },
            }
        }

        async fn accept(&mut self, guide: &mut TestGuide) -> RequestId {
            let (request_id, group_id) = expect_offer(&mut guide.peer);
            let address = guide.peer.address.clone();
            self.deliver(
                &address,
                Body::TourAccepted {
                    request_id,
                    group_id,
                    guide_id: guide.id,
                    guide: address.clone(),
                },
            )
            .await;
            request_id
        }
    }

    fn expect_offer(peer: &mut Peer) -> (RequestId, GroupId) {
        match peer.inbox.try_recv().map(|e| e.body) {
            Some(Body::TourRequest { request_id, group }) => (request_id, group.group_id),
            other => panic!("expected TOUR_REQUEST, got {other:?}"),
        }
    }

    fn kinds(peer: &mut Peer) -> Vec<&'static str> {
        peer.inbox.drain().into_iter().map(|e| e.body.kind()).collect()
    }

    #[tokio::test]
    async fn test_priority_group_is_matched_first() {
        let mut h = Harness::new().await;
        let g1 = h.arrive(GroupProfile::new(8, "French")).await;
        let g2 = h
            .arrive(GroupProfile::new(8, "German").with_urgency(Urgency::Priority))
            .await;
        let g3 = h.arrive(GroupProfile::new(8, "Italian")).await;

        let ids = |g: &TestGroup| g.profile.group_id;
        assert_eq!(h.coordinator.waiting_groups(), vec![ids(&g2), ids(&g1), ids(&g3)]);

        let mut guide = h.add_guide("a", 15).await;
        let (_, offered) = expect_offer(&mut guide.peer);
        assert_eq!(offered, ids(&g2));
    }

    #[tokio::test]
    async fn test_oversized_group_stays_waiting() {
        let mut h = Harness::new().await;
        let mut a = h.add_guide("a", 15).await;
        let mut b = h.add_guide("b", 12).await;

        let group = h.arrive(GroupProfile::new(20, "American")).await;

        assert!(a.peer.inbox.try_recv().is_none());
        assert!(b.peer.inbox.try_recv().is_none());
        assert_eq!(h.coordinator.waiting_groups(), vec![group.profile.group_id]);
        assert!(h.coordinator.is_exhausted(group.profile.group_id));
        assert_eq!(h.coordinator.assignments().count(), 0);
    }

    #[tokio::test]
    async fn test_refusals_walk_candidates_then_park() {
        let mut h = Harness::new().await;
        let mut a = h.add_guide("a", 15).await;
        let mut b = h.add_guide("b", 15).await;
        let group = h.arrive(GroupProfile::new(8, "Spanish")).await;
        let group_id = group.profile.group_id;

        for guide in [&mut a, &mut b] {
            let (request_id, _) = expect_offer(&mut guide.peer);
            let address = guide.peer.address.clone();
            h.deliver(
                &address,
                Body::TourRefused {
                    request_id,
                    group_id,
                    guide_id: guide.id,
                    reason: RefusalReason::Busy,
                },
            )
            .await;
        }

        assert!(h.coordinator.pending_negotiation().is_none());
        assert_eq!(h.coordinator.waiting_groups(), vec![group_id]);
        assert!(h.coordinator.is_exhausted(group_id));
        assert_eq!(h.coordinator.counters().refusals, 2);

        // A guide announcing itself un-parks the group.
        let _c = h.add_guide("c", 15).await;
        assert!(!h.coordinator.is_exhausted(group_id));
        let (_, _, pending) = h.coordinator.pending_negotiation().unwrap();
        assert_eq!(pending, group_id);
    }

    #[tokio::test]
    async fn test_acceptance_creates_one_assignment() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let mut group = h.arrive(GroupProfile::new(8, "French")).await;

        h.accept(&mut guide).await;

        let assignment = h
            .coordinator
            .assignment_for_group(group.profile.group_id)
            .unwrap();
        assert_eq!(assignment.guide_id, guide.id);
        assert_eq!(h.coordinator.guide_view(guide.id), Some(GuideView::Assigned));
        assert!(h.coordinator.available_guides().is_empty());
        assert_eq!(kinds(&mut group.peer), vec!["TOUR_ACCEPTED"]);

        // Duplicate request from the assigned group changes nothing.
        let address = group.peer.address.clone();
        h.deliver(
            &address,
            Body::TourRequest {
                request_id: RequestId::new(),
                group: group.profile.clone(),
            },
        )
        .await;
        assert!(h.coordinator.waiting_groups().is_empty());
        assert_eq!(h.coordinator.assignments().count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_request_is_deduplicated() {
        let mut h = Harness::new().await;
        let group = h.arrive(GroupProfile::new(8, "French")).await;
        let address = group.peer.address.clone();
        h.deliver(
            &address,
            Body::TourRequest {
                request_id: RequestId::new(),
                group: group.profile.clone(),
            },
        )
        .await;
        assert_eq!(h.coordinator.waiting_groups().len(), 1);
        assert_eq!(h.coordinator.counters().requests, 1);
    }

    #[tokio::test]
    async fn test_problem_requeues_group_once() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let mut group = h.arrive(GroupProfile::new(8, "French")).await;
        h.accept(&mut guide).await;
        group.peer.inbox.drain();

        let problem = Body::GuideProblem {
            guide_id: guide.id,
            group_id: Some(group.profile.group_id),
            description: "sprained ankle".to_string(),
        };
        let address = guide.peer.address.clone();
        h.deliver(&address, problem).await;

        assert_eq!(h.coordinator.waiting_groups(), vec![group.profile.group_id]);
        assert!(h.coordinator.assignment_for_group(group.profile.group_id).is_none());
        assert_eq!(h.coordinator.guide_view(guide.id), Some(GuideView::Blocked));
        assert_eq!(kinds(&mut group.peer), vec!["GUIDE_PROBLEM"]);

        let again = Body::GuideProblem {
            guide_id: guide.id,
            group_id: Some(group.profile.group_id),
            description: "sprained ankle".to_string(),
        };
        h.deliver(&address, again).await;
        assert_eq!(h.coordinator.waiting_groups(), vec![group.profile.group_id]);
        assert!(group.peer.inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_requeued_group_goes_ahead_of_priority_lane() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let group = h.arrive(GroupProfile::new(8, "French")).await;
        h.accept(&mut guide).await;

        let vip = h.arrive(GroupProfile::new(8, "British").vip()).await;
        let address = guide.peer.address.clone();
        h.deliver(
            &address,
            Body::GuideProblem {
                guide_id: guide.id,
                group_id: Some(group.profile.group_id),
                description: "lost keys".to_string(),
            },
        )
        .await;

        assert_eq!(
            h.coordinator.waiting_groups(),
            vec![group.profile.group_id, vip.profile.group_id]
        );
    }

    #[tokio::test]
    async fn test_blocked_guide_returns_after_announce() {
        let mut h = Harness::new().await;
        let guide = h.add_guide("a", 15).await;
        let address = guide.peer.address.clone();
        h.deliver(
            &address,
            Body::GuideProblem {
                guide_id: guide.id,
                group_id: None,
                description: "break".to_string(),
            },
        )
        .await;
        assert!(h.coordinator.available_guides().is_empty());

        h.deliver(
            &address,
            Body::GuideAvailable {
                guide_id: guide.id,
                max_group_size: 15,
            },
        )
        .await;
        assert_eq!(h.coordinator.guide_view(guide.id), Some(GuideView::Idle));
        assert!(h.coordinator.available_guides().contains(&guide.id));
    }

    #[tokio::test]
    async fn test_emergency_preempts_pending_negotiation() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let normal = h.arrive(GroupProfile::new(8, "French")).await;
        let (first_request, offered) = expect_offer(&mut guide.peer);
        assert_eq!(offered, normal.profile.group_id);

        let emergency = h
            .arrive(GroupProfile::new(6, "Japanese").with_urgency(Urgency::Emergency))
            .await;

        match guide.peer.inbox.try_recv().map(|e| e.body) {
            Some(Body::TourCancelled { request_id, .. }) => assert_eq!(request_id, first_request),
            other => panic!("expected TOUR_CANCELLED, got {other:?}"),
        }
        let (_, offered) = expect_offer(&mut guide.peer);
        assert_eq!(offered, emergency.profile.group_id);
        assert_eq!(h.coordinator.waiting_groups(), vec![normal.profile.group_id]);

        // The original group's answer, arriving late, is cancelled too.
        let address = guide.peer.address.clone();
        h.deliver(
            &address,
            Body::TourAccepted {
                request_id: first_request,
                group_id: normal.profile.group_id,
                guide_id: guide.id,
                guide: address.clone(),
            },
        )
        .await;
        assert_eq!(kinds(&mut guide.peer), vec!["TOUR_CANCELLED"]);
        assert!(h.coordinator.assignments().next().is_none());

        // The bumped group is offered again, as it was, once a guide frees up.
        let (_, _, pending) = h.coordinator.pending_negotiation().unwrap();
        assert_eq!(pending, emergency.profile.group_id);
        let mut spare = h.add_guide("b", 15).await;
        assert!(spare.peer.inbox.try_recv().is_none());
        let address = guide.peer.address.clone();
        let (request_id, _, _) = h.coordinator.pending_negotiation().unwrap();
        h.deliver(
            &address,
            Body::TourAccepted {
                request_id,
                group_id: emergency.profile.group_id,
                guide_id: guide.id,
                guide: address.clone(),
            },
        )
        .await;
        match spare.peer.inbox.try_recv().map(|e| e.body) {
            Some(Body::TourRequest { group, .. }) => assert_eq!(group, normal.profile),
            other => panic!("expected TOUR_REQUEST, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resent_emergency_request_leaves_negotiation_alone() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 10).await;
        let stranded = h
            .arrive(GroupProfile::new(20, "Brazilian").with_urgency(Urgency::Emergency))
            .await;
        assert!(h.coordinator.is_exhausted(stranded.profile.group_id));

        let normal = h.arrive(GroupProfile::new(8, "French")).await;
        let (_, offered) = expect_offer(&mut guide.peer);
        assert_eq!(offered, normal.profile.group_id);
        let before = h.coordinator.pending_negotiation();

        let address = stranded.peer.address.clone();
        h.deliver(
            &address,
            Body::Emergency {
                request_id: RequestId::new(),
                group: stranded.profile.clone(),
            },
        )
        .await;

        assert_eq!(h.coordinator.pending_negotiation(), before);
        assert_eq!(h.coordinator.counters().cancellations, 0);
        assert!(guide.peer.inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_timeout_moves_to_next_guide_and_cancels_late_accept() {
        let mut h = Harness::new().await;
        let mut slow = h.add_guide("slow", 15).await;
        let mut quick = h.add_guide("quick", 15).await;
        let group = h.arrive(GroupProfile::new(8, "French")).await;

        let (request_id, _) = expect_offer(&mut slow.peer);
        let me = h.ctx.myself().clone();
        h.deliver(&me, Body::NegotiationTimeout { request_id }).await;

        assert_eq!(kinds(&mut slow.peer), vec!["TOUR_CANCELLED"]);
        let (_, offered) = expect_offer(&mut quick.peer);
        assert_eq!(offered, group.profile.group_id);
        assert_eq!(h.coordinator.counters().timeouts, 1);

        let address = slow.peer.address.clone();
        h.deliver(
            &address,
            Body::TourAccepted {
                request_id,
                group_id: group.profile.group_id,
                guide_id: slow.id,
                guide: address.clone(),
            },
        )
        .await;
        assert_eq!(kinds(&mut slow.peer), vec!["TOUR_CANCELLED"]);
        assert!(h.coordinator.assignment_for_group(group.profile.group_id).is_none());
    }

    #[tokio::test]
    async fn test_stale_timeout_is_ignored() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let _group = h.arrive(GroupProfile::new(8, "French")).await;
        let request_id = h.accept(&mut guide).await;

        let me = h.ctx.myself().clone();
        h.deliver(&me, Body::NegotiationTimeout { request_id }).await;
        assert_eq!(h.coordinator.counters().timeouts, 0);
        assert_eq!(h.coordinator.assignments().count(), 1);
        assert!(h.own.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_least_recently_assigned_guide_preferred() {
        let mut h = Harness::new().await;
        let mut first = h.add_guide("first", 15).await;
        let mut second = h.add_guide("second", 15).await;

        let group = h.arrive(GroupProfile::new(8, "French")).await;
        h.accept(&mut first).await;

        let address = first.peer.address.clone();
        h.deliver(
            &address,
            Body::TourFinished {
                guide_id: first.id,
                group_id: group.profile.group_id,
                exhibits_presented: 8,
            },
        )
        .await;
        h.deliver(
            &address,
            Body::GuideAvailable {
                guide_id: first.id,
                max_group_size: 15,
            },
        )
        .await;
        assert_eq!(h.coordinator.counters().tours_completed, 1);

        let _next = h.arrive(GroupProfile::new(8, "German")).await;
        assert!(first.peer.inbox.try_recv().is_none());
        expect_offer(&mut second.peer);
    }

    #[tokio::test]
    async fn test_many_groups_never_double_assigned() {
        let mut h = Harness::new().await;
        let mut guides = Vec::new();
        for name in ["a", "b", "c"] {
            guides.push(h.add_guide(name, 15).await);
        }
        let mut groups = Vec::new();
        for n in 0..5 {
            groups.push(h.arrive(GroupProfile::new(5 + n, "French")).await);
            // Every guide accepts whatever it is offered.
            for guide in guides.iter_mut() {
                while let Some(envelope) = guide.peer.inbox.try_recv() {
                    if let Body::TourRequest { request_id, group } = envelope.body {
                        let address = guide.peer.address.clone();
                        h.deliver(
                            &address,
                            Body::TourAccepted {
                                request_id,
                                group_id: group.group_id,
                                guide_id: guide.id,
                                guide: address.clone(),
                            },
                        )
                        .await;
                    }
                }
            }
        }

        assert_eq!(h.coordinator.assignments().count(), 3);
        assert_eq!(h.coordinator.waiting_groups().len(), 2);
        let guide_ids: HashSet<_> = h.coordinator.assignments().map(|a| a.guide_id).collect();
        assert_eq!(guide_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_forgets_stopped_guides() {
        let mut h = Harness::new().await;
        let mut guide = h.add_guide("a", 15).await;
        let mut group = h.arrive(GroupProfile::new(8, "French")).await;
        h.accept(&mut guide).await;
        group.peer.inbox.drain();

        h.directory.deregister(guide.peer.address.actor_id());
        drop(guide.peer.inbox);
        h.coordinator.on_tick(&mut h.ctx).await.unwrap();

        assert!(h.coordinator.guide_view(guide.id).is_none());
        assert_eq!(h.coordinator.waiting_groups(), vec![group.profile.group_id]);
        assert_eq!(kinds(&mut group.peer), vec!["GUIDE_PROBLEM"]);
    }

    #[tokio::test]
    async fn test_status_report_from_unknown_guide_is_unroutable() {
        let mut h = Harness::new().await;
        let (stranger, _rx) = mailbox("guide#x");
        let err = h
            .coordinator
            .handle(
                Envelope::new(
                    &stranger,
                    Body::StatusReport {
                        guide_id: GuideId::new(),
                        status: Status::new("Hall"),
                    },
                ),
                &mut h.ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::Unroutable(_)));
    }
}
