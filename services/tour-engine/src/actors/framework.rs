//! Core actor framework types and traits.
//!
//! Provides the building blocks every tour participant runs on:
//! - `Actor` trait: message reaction plus an optional periodic tick
//! - `ActorHandle` / `Mailbox`: the two ends of an actor's unbounded queue
//! - `Supervisor`: spawns actor tasks and stops them on shutdown
//! - `BackoffPolicy`: retry spacing for directory misses and re-requests

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop. An `Err` is logged
    /// and the actor keeps draining its mailbox.
    async fn handle(
        &mut self,
        msg: Self::Message,
        ctx: &mut ActorContext<Self::Message>,
    ) -> Result<bool, ActorError>;

    /// Called once before the first message or tick.
    async fn on_start(&mut self, _ctx: &mut ActorContext<Self::Message>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop, whatever the reason.
    async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Message>) {}

    /// Period of the ticker loop, `None` for purely reactive actors.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Timer-driven reaction.
    async fn on_tick(&mut self, _ctx: &mut ActorContext<Self::Message>) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Context provided to actors during message handling.
pub struct ActorContext<M: Message> {
    /// Actor's unique ID.
    pub actor_id: String,

    shutdown: watch::Receiver<bool>,

    /// Messages handled so far.
    pub messages_processed: u64,

    /// Ticks fired so far.
    pub ticks: u64,

    myself: ActorHandle<M>,
}

impl<M: Message> ActorContext<M> {
    pub fn new(myself: ActorHandle<M>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            actor_id: myself.actor_id().to_string(),
            shutdown,
            messages_processed: 0,
            ticks: 0,
            myself,
        }
    }

    /// Handle to this actor's own mailbox.
    pub fn myself(&self) -> &ActorHandle<M> {
        &self.myself
    }

    /// Deliver `msg` to this actor after `delay`.
    ///
    /// The delay runs on a separate task, so the actor keeps reacting to its
    /// mailbox in the meantime. If the actor has stopped by then the message
    /// is dropped.
    pub fn schedule(&self, delay: Duration, msg: M) -> tokio::task::JoinHandle<()> {
        let myself = self.myself.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if myself.send(msg).is_err() {
                debug!(actor_id = %myself.actor_id(), "Scheduled message dropped, actor stopped");
            }
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Message cannot be routed: unknown correlation id or unexpected kind.
    #[error("unroutable message: {0}")]
    Unroutable(String),

    /// Message is valid but not in the current lifecycle state.
    #[error("invalid transition: {event} while {state}")]
    InvalidTransition { state: String, event: &'static str },

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// =============================================================================
// Actor Handle / Mailbox
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    tx: mpsc::UnboundedSender<M>,
    actor_id: String,
}

impl<M: Message> ActorHandle<M> {
    /// Enqueue a message. Never blocks; fails only if the actor has stopped.
    pub fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).map_err(|_| ActorError::ActorStopped)
    }

    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Whether the receiving actor has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> PartialEq for ActorHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.actor_id == other.actor_id
    }
}

impl<M: Message> Eq for ActorHandle<M> {}

impl<M: Message> Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActorHandle").field(&self.actor_id).finish()
    }
}

/// Receiving end of an actor's queue.
pub struct Mailbox<M: Message> {
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M: Message> Mailbox<M> {
    /// Wait for the next message; `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Create a fresh, unbounded, ordered mailbox for `actor_id`.
pub fn mailbox<M: Message>(actor_id: impl Into<String>) -> (ActorHandle<M>, Mailbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ActorHandle {
            tx,
            actor_id: actor_id.into(),
        },
        Mailbox { rx },
    )
}

/// Type-erased actor reference for supervision.
pub struct ActorRef {
    pub actor_id: String,
    pub actor_type: String,
    task_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        self.task_handle.abort();
    }
}

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Spawns actor tasks and tracks them until shutdown.
pub struct Supervisor {
    children: HashMap<String, ActorRef>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
        }
    }

    /// Spawn an actor on its own task and return a handle to its mailbox.
    pub fn spawn<A>(&mut self, actor: A) -> ActorHandle<A::Message>
    where
        A: Actor,
    {
        let actor_type = actor.name().to_string();
        let actor_id = format!("{}#{}", actor_type, generate_actor_id());
        let (handle, rx) = mailbox(actor_id.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = ActorContext::new(handle.clone(), shutdown_rx);
        let task_handle = tokio::spawn(run_actor_loop(actor, rx, ctx));

        self.children.insert(
            actor_id.clone(),
            ActorRef {
                actor_id: actor_id.clone(),
                actor_type: actor_type.clone(),
                task_handle,
                shutdown_tx,
            },
        );

        debug!(actor_id = %actor_id, actor_type = %actor_type, "Spawned actor");

        handle
    }

    /// Signal one actor to stop.
    pub fn stop(&mut self, actor_id: &str) -> bool {
        match self.children.remove(actor_id) {
            Some(child) => {
                child.stop();
                true
            }
            None => false,
        }
    }

    /// Forget actors whose task has finished on its own.
    pub fn reap(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain(|_, c| c.is_running());
        before - self.children.len()
    }

    /// Stop all supervised actors.
    pub async fn stop_all(&mut self) {
        info!(count = self.children.len(), "Stopping all actors");

        for child in self.children.values() {
            child.stop();
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.children.values().all(|c| !c.is_running()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for (actor_id, child) in &self.children {
            if child.is_running() {
                warn!(actor_id = %actor_id, "Force aborting actor");
                child.abort();
            }
        }

        self.children.clear();
    }

    /// Get count of running actors.
    pub fn running_count(&self) -> usize {
        self.children.values().filter(|c| c.is_running()).count()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run the main actor loop.
///
/// Shutdown is checked first, then a due tick, then the mailbox. A tick that
/// falls due while a message is being handled therefore runs right after it,
/// and is never dropped (missed ticks are delayed, not skipped).
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: Mailbox<A::Message>,
    mut ctx: ActorContext<A::Message>,
) {
    let actor_id = ctx.actor_id.clone();
    let mut shutdown = ctx.shutdown.clone();

    if let Err(e) = actor.on_start(&mut ctx).await {
        warn!(actor_id = %actor_id, error = %e, "Actor failed to start");
        actor.on_stop(&mut ctx).await;
        return;
    }

    let mut ticker = actor.tick_interval().map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    debug!(actor_id = %actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(actor_id = %actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            _ = next_tick(&mut ticker) => {
                ctx.ticks += 1;
                if let Err(e) = actor.on_tick(&mut ctx).await {
                    warn!(actor_id = %actor_id, error = %e, "Tick failed");
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %actor_id, "Actor mailbox closed");
                    break;
                };

                ctx.messages_processed += 1;

                match actor.handle(msg, &mut ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(actor_id = %actor_id, "Actor requested stop");
                        break;
                    }
                    Err(e) => {
                        warn!(actor_id = %actor_id, error = %e, "Message dropped");
                    }
                }
            }
        }
    }

    actor.on_stop(&mut ctx).await;

    debug!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        ticks = ctx.ticks,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Tests
// =============================================================================
