//! Monitoring sinks.
//!
//! Actors report observable transitions to an injected [`MonitoringSink`].
//! Calls are synchronous and must not block: a sink either logs, counts, or
//! pushes onto an unbounded channel. Nothing ever flows back into the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use galerie_events::{EventEnvelope, GroupStatus, GuideState, MonitorEvent, VisitSummary};
use galerie_id::{GroupId, GuideId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub trait MonitoringSink: Send + Sync {
    fn on_guide_added(&self, guide_id: GuideId, name: &str);

    fn on_guide_status_changed(&self, guide_id: GuideId, status: GuideState, group_id: Option<GroupId>);

    fn on_group_added(&self, group_id: GroupId, nationality: &str, size: u32);

    fn on_group_status_changed(&self, group_id: GroupId, status: GroupStatus);

    /// A guide presented `exhibit` to its group.
    fn on_tour_event(&self, guide_id: GuideId, group_id: GroupId, exhibit: &str);

    fn on_tour_completed(&self, group_id: GroupId, guide_id: GuideId, group_size: u32);

    fn on_group_departed(&self, summary: &VisitSummary);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MonitoringSink for NoopSink {
    fn on_guide_added(&self, _: GuideId, _: &str) {}
    fn on_guide_status_changed(&self, _: GuideId, _: GuideState, _: Option<GroupId>) {}
    fn on_group_added(&self, _: GroupId, _: &str, _: u32) {}
    fn on_group_status_changed(&self, _: GroupId, _: GroupStatus) {}
    fn on_tour_event(&self, _: GuideId, _: GroupId, _: &str) {}
    fn on_tour_completed(&self, _: GroupId, _: GuideId, _: u32) {}
    fn on_group_departed(&self, _: &VisitSummary) {}
}

/// Writes each event as a structured `tracing` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn on_guide_added(&self, guide_id: GuideId, name: &str) {
        info!(guide_id = %guide_id, name = %name, "Guide added");
    }

    fn on_guide_status_changed(&self, guide_id: GuideId, status: GuideState, group_id: Option<GroupId>) {
        match group_id {
            Some(group_id) => {
                info!(guide_id = %guide_id, status = %status, group_id = %group_id, "Guide status changed")
            }
            None => info!(guide_id = %guide_id, status = %status, "Guide status changed"),
        }
    }

    fn on_group_added(&self, group_id: GroupId, nationality: &str, size: u32) {
        info!(group_id = %group_id, nationality = %nationality, size, "Group added");
    }

    fn on_group_status_changed(&self, group_id: GroupId, status: GroupStatus) {
        info!(group_id = %group_id, status = %status, "Group status changed");
    }

    fn on_tour_event(&self, guide_id: GuideId, group_id: GroupId, exhibit: &str) {
        debug!(guide_id = %guide_id, group_id = %group_id, exhibit = %exhibit, "Exhibit presented");
    }

    fn on_tour_completed(&self, group_id: GroupId, guide_id: GuideId, group_size: u32) {
        info!(group_id = %group_id, guide_id = %guide_id, group_size, "Tour completed");
    }

    fn on_group_departed(&self, summary: &VisitSummary) {
        info!(
            group_id = %summary.group_id,
            paintings_seen = summary.paintings_seen,
            questions_asked = summary.questions_asked,
            simulated_minutes = summary.simulated_minutes,
            satisfaction = ?summary.satisfaction,
            "Group departed"
        );
    }
}

/// Pushes sequenced [`EventEnvelope`]s onto an unbounded channel.
///
/// A dropped receiver is fine: events are silently discarded.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
    seq: AtomicU64,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                seq: AtomicU64::new(0),
            },
            rx,
        )
    }

    fn emit(&self, event: MonitorEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.tx.send(EventEnvelope::new(seq, event));
    }
}

impl MonitoringSink for ChannelSink {
    fn on_guide_added(&self, guide_id: GuideId, name: &str) {
        self.emit(MonitorEvent::GuideAdded {
            guide_id,
            name: name.to_string(),
        });
    }

    fn on_guide_status_changed(&self, guide_id: GuideId, status: GuideState, group_id: Option<GroupId>) {
        self.emit(MonitorEvent::GuideStatusChanged {
            guide_id,
            status,
            group_id,
        });
    }

    fn on_group_added(&self, group_id: GroupId, nationality: &str, size: u32) {
        self.emit(MonitorEvent::GroupAdded {
            group_id,
            nationality: nationality.to_string(),
            size,
        });
    }

    fn on_group_status_changed(&self, group_id: GroupId, status: GroupStatus) {
        self.emit(MonitorEvent::GroupStatusChanged { group_id, status });
    }

    fn on_tour_event(&self, guide_id: GuideId, group_id: GroupId, exhibit: &str) {
        self.emit(MonitorEvent::ExhibitPresented {
            guide_id,
            group_id,
            exhibit: exhibit.to_string(),
        });
    }

    fn on_tour_completed(&self, group_id: GroupId, guide_id: GuideId, group_size: u32) {
        self.emit(MonitorEvent::TourCompleted {
            group_id,
            guide_id,
            group_size,
        });
    }

    fn on_group_departed(&self, summary: &VisitSummary) {
        self.emit(MonitorEvent::GroupDeparted(summary.clone()));
    }
}

/// Aggregate figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub guides: u32,
    pub groups_arrived: u32,
    pub visitors_arrived: u32,
    pub groups_departed: u32,
    pub tours_completed: u32,
    pub exhibits_presented: u32,
    pub guide_problems: u32,
    pub questions_asked: u32,
    pub satisfaction_histogram: [u32; 5],
    pub total_simulated_minutes: f64,
}

impl RunStats {
    /// Mean satisfaction over departed groups that were scored.
    pub fn average_satisfaction(&self) -> Option<f64> {
        let scored: u32 = self.satisfaction_histogram.iter().sum();
        if scored == 0 {
            return None;
        }
        let total: u32 = self
            .satisfaction_histogram
            .iter()
            .zip(1u32..)
            .map(|(count, score)| count * score)
            .sum();
        Some(f64::from(total) / f64::from(scored))
    }

    pub fn average_tour_minutes(&self) -> Option<f64> {
        (self.groups_departed > 0).then(|| self.total_simulated_minutes / f64::from(self.groups_departed))
    }
}

/// Counts events into [`RunStats`].
#[derive(Debug, Default)]
pub struct StatsSink {
    stats: Mutex<RunStats>,
    guide_states: Mutex<HashMap<GuideId, GuideState>>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RunStats {
        self.stats.lock().clone()
    }

    /// Guides currently in `state`, as last reported.
    pub fn guides_in(&self, state: GuideState) -> usize {
        self.guide_states.lock().values().filter(|s| **s == state).count()
    }
}

impl MonitoringSink for StatsSink {
    fn on_guide_added(&self, guide_id: GuideId, _name: &str) {
        self.stats.lock().guides += 1;
        self.guide_states.lock().insert(guide_id, GuideState::Available);
    }

    fn on_guide_status_changed(&self, guide_id: GuideId, status: GuideState, _group_id: Option<GroupId>) {
        let previous = self.guide_states.lock().insert(guide_id, status);
        if status == GuideState::Blocked && previous != Some(GuideState::Blocked) {
            self.stats.lock().guide_problems += 1;
        }
    }

    fn on_group_added(&self, _group_id: GroupId, _nationality: &str, size: u32) {
        let mut stats = self.stats.lock();
        stats.groups_arrived += 1;
        stats.visitors_arrived += size;
    }

    fn on_group_status_changed(&self, _group_id: GroupId, _status: GroupStatus) {}

    fn on_tour_event(&self, _guide_id: GuideId, _group_id: GroupId, _exhibit: &str) {
        self.stats.lock().exhibits_presented += 1;
    }

    fn on_tour_completed(&self, _group_id: GroupId, _guide_id: GuideId, _group_size: u32) {
        self.stats.lock().tours_completed += 1;
    }

    fn on_group_departed(&self, summary: &VisitSummary) {
        let mut stats = self.stats.lock();
        stats.groups_departed += 1;
        stats.questions_asked += summary.questions_asked;
        stats.total_simulated_minutes += summary.simulated_minutes;
        if let Some(score @ 1..=5) = summary.satisfaction {
            stats.satisfaction_histogram[usize::from(score - 1)] += 1;
        }
    }
}

/// Forwards every call to each inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MonitoringSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MonitoringSink for FanoutSink {
    fn on_guide_added(&self, guide_id: GuideId, name: &str) {
        self.sinks.iter().for_each(|s| s.on_guide_added(guide_id, name));
    }

    fn on_guide_status_changed(&self, guide_id: GuideId, status: GuideState, group_id: Option<GroupId>) {
        self.sinks
            .iter()
            .for_each(|s| s.on_guide_status_changed(guide_id, status, group_id));
    }

    fn on_group_added(&self, group_id: GroupId, nationality: &str, size: u32) {
        self.sinks
            .iter()
            .for_each(|s| s.on_group_added(group_id, nationality, size));
    }

    fn on_group_status_changed(&self, group_id: GroupId, status: GroupStatus) {
        self.sinks
            .iter()
            .for_each(|s| s.on_group_status_changed(group_id, status));
    }

    fn on_tour_event(&self, guide_id: GuideId, group_id: GroupId, exhibit: &str) {
        self.sinks
            .iter()
            .for_each(|s| s.on_tour_event(guide_id, group_id, exhibit));
    }

    fn on_tour_completed(&self, group_id: GroupId, guide_id: GuideId, group_size: u32) {
        self.sinks
            .iter()
            .for_each(|s| s.on_tour_completed(group_id, guide_id, group_size));
    }

    fn on_group_departed(&self, summary: &VisitSummary) {
        self.sinks.iter().for_each(|s| s.on_group_departed(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(satisfaction: Option<u8>, minutes: f64) -> VisitSummary {
        VisitSummary {
            group_id: GroupId::new(),
            size: 8,
            nationality: "French".to_string(),
            paintings_seen: 8,
            questions_asked: 2,
            tour_duration_ms: 24_000,
            simulated_minutes: minutes,
            satisfaction,
            was_vip: false,
        }
    }

    #[test]
    fn test_channel_sink_sequences_events() {
        let (sink, mut rx) = ChannelSink::new();
        let guide = GuideId::new();
        sink.on_guide_added(guide, "Marie");
        sink.on_guide_status_changed(guide, GuideState::OnTour, None);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(first.event_type, "guide.added");
        assert_eq!(second.event_type, "guide.status_changed");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_group_added(GroupId::new(), "German", 12);
    }

    #[test]
    fn test_stats_sink_counts() {
        let sink = StatsSink::new();
        let guide = GuideId::new();
        sink.on_guide_added(guide, "Jean");
        sink.on_group_added(GroupId::new(), "French", 8);
        sink.on_group_added(GroupId::new(), "Italian", 12);
        sink.on_guide_status_changed(guide, GuideState::Blocked, None);
        sink.on_guide_status_changed(guide, GuideState::Blocked, None);
        sink.on_group_departed(&summary(Some(4), 60.0));
        sink.on_group_departed(&summary(Some(2), 100.0));

        let stats = sink.snapshot();
        assert_eq!(stats.guides, 1);
        assert_eq!(stats.visitors_arrived, 20);
        assert_eq!(stats.guide_problems, 1);
        assert_eq!(stats.groups_departed, 2);
        assert_eq!(stats.average_satisfaction(), Some(3.0));
        assert_eq!(stats.average_tour_minutes(), Some(80.0));
        assert_eq!(sink.guides_in(GuideState::Blocked), 1);
    }

    #[test]
    fn test_averages_empty_run() {
        let stats = RunStats::default();
        assert!(stats.average_satisfaction().is_none());
        assert!(stats.average_tour_minutes().is_none());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(StatsSink::new());
        let b = Arc::new(StatsSink::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(NoopSink));
        assert_eq!(fanout.len(), 3);

        fanout.on_tour_completed(GroupId::new(), GuideId::new(), 8);
        assert_eq!(a.snapshot().tours_completed, 1);
        assert_eq!(b.snapshot().tours_completed, 1);
    }
}
