//! Cooperative task distribution over the `JSON` tag.
//!
//! Every task names a priority owner that has an exclusive window to run
//! it. Peers that are not the owner queue the task and keep relaying it
//! until a completion record with the same creation timestamp shows up.
//! Once a pending task outlives the staleness threshold, any peer that
//! sees it runs it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};

use gossamer_protocol::{Address, Envelope, MessageTag, Task, TaskMessage, TaskStatus};

use crate::abilities::AbilityRegistry;
use crate::capability::{Capability, PeerContext, StatusReport};
use crate::workload::Workload;
use crate::{PeerConfig, PeerError, UnknownAbilityPolicy};

const TAGS: &[&str] = &["JSON"];

/// What a handler call or workload round did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Our own pending task came back to us.
    Ignored,
    /// A completion record cleared matching queue entries.
    Reconciled,
    /// Ran the task here and broadcast the result.
    Executed,
    /// Waiting for the owner or for staleness.
    Queued,
    /// Already completed; the stored result was sent again.
    AlreadyResolved,
    /// Needed an unregistered ability and was parked.
    DeadLettered,
    /// Relayed the head of the queue.
    Rebroadcast,
    /// Originated a new task.
    Generated,
    /// Nothing to do this round.
    Idle,
}

/// Bounded memory of completed tasks, keyed by creation timestamp.
#[derive(Debug, Clone)]
struct ResolvedLog {
    order: VecDeque<DateTime<Utc>>,
    tasks: HashMap<DateTime<Utc>, Task>,
    capacity: usize,
}

impl ResolvedLog {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            tasks: HashMap::new(),
            capacity,
        }
    }

    /// Store a completion. When two peers completed the same task, the
    /// record from the lowest completer address is kept, so every peer that
    /// has seen both ends up holding the same one. Repeats change nothing.
    fn record(&mut self, task: Task) {
        if self.capacity == 0 {
            return;
        }
        let key = task.key();
        match self.tasks.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(task);
                self.order.push_back(key);
            }
            Entry::Occupied(mut slot) => {
                let replace = match (&task.completed_by, &slot.get().completed_by) {
                    (Some(incoming), Some(stored)) => incoming < stored,
                    (Some(_), None) => true,
                    _ => false,
                };
                if replace {
                    slot.insert(task);
                }
            }
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tasks.remove(&oldest);
            }
        }
    }

    fn get(&self, key: &DateTime<Utc>) -> Option<&Task> {
        self.tasks.get(key)
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

pub struct TaskDistributor {
    abilities: AbilityRegistry,
    workload: Box<dyn Workload>,
    queue: VecDeque<Task>,
    resolved: ResolvedLog,
    dead_letters: Vec<Task>,
    dead_keys: HashSet<DateTime<Utc>>,
    staleness_threshold: Duration,
    policy: UnknownAbilityPolicy,
    cadence: Duration,
    jitter: (f64, f64),
    rng: StdRng,
    completed: u64,
}

impl TaskDistributor {
    pub fn new(config: &PeerConfig, abilities: AbilityRegistry, workload: Box<dyn Workload>) -> Self {
        Self {
            abilities,
            workload,
            queue: VecDeque::new(),
            resolved: ResolvedLog::new(config.resolved_memory),
            dead_letters: Vec::new(),
            dead_keys: HashSet::new(),
            staleness_threshold: config.staleness_threshold(),
            policy: config.unknown_ability_policy,
            cadence: config.broadcast_delay(),
            jitter: (config.workload_jitter_min_secs, config.workload_jitter_max_secs),
            rng: StdRng::from_entropy(),
            completed: 0,
        }
    }

    /// Replace the random source, for reproducible owner selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn abilities_mut(&mut self) -> &mut AbilityRegistry {
        &mut self.abilities
    }

    pub fn queue(&self) -> &VecDeque<Task> {
        &self.queue
    }

    pub fn dead_letters(&self) -> &[Task] {
        &self.dead_letters
    }

    /// Tasks this peer has executed.
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_resolved(&self, key: &DateTime<Utc>) -> bool {
        self.resolved.get(key).is_some()
    }

    /// Apply the distribution rules to a task received on the bus.
    pub fn handle_work(
        &mut self,
        ctx: &mut PeerContext<'_>,
        task: Task,
    ) -> Result<WorkOutcome, PeerError> {
        let me = ctx.address().clone();

        if task.status == TaskStatus::Complete {
            self.reconcile(&me, task);
            return Ok(WorkOutcome::Reconciled);
        }
        if task.sender == me && !task.is_owned_by(&me) {
            return Ok(WorkOutcome::Ignored);
        }
        if let Some(done) = self.resolved.get(&task.key()) {
            let done = done.clone();
            self.remove_from_queue(&done.key());
            ctx.broadcast(MessageTag::Json.as_str(), &TaskMessage { task: done })?;
            return Ok(WorkOutcome::AlreadyResolved);
        }
        if self.dead_keys.contains(&task.key()) {
            return Ok(WorkOutcome::DeadLettered);
        }

        let stale = task.is_stale(ctx.now(), self.staleness_threshold);
        if stale || task.priority_owner.is_none() || task.is_owned_by(&me) {
            if stale && !task.is_owned_by(&me) {
                tracing::info!(
                    sender = %task.sender,
                    owner = ?task.priority_owner.as_ref().map(Address::as_str),
                    age_secs = task.age(ctx.now()).as_secs(),
                    "Taking over stale task"
                );
            }
            return self.execute(ctx, task);
        }

        self.enqueue(task);
        Ok(WorkOutcome::Queued)
    }

    /// One workload round: relay the oldest queued task, or originate a
    /// new one if the queue is empty.
    pub fn workload_round(&mut self, ctx: &mut PeerContext<'_>) -> Result<WorkOutcome, PeerError> {
        if let Some(head) = self.queue.front().cloned() {
            if head.is_stale(ctx.now(), self.staleness_threshold) {
                tracing::info!(sender = %head.sender, "Queued task went stale, taking over");
                return self.execute(ctx, head);
            }
            ctx.broadcast(MessageTag::Json.as_str(), &TaskMessage { task: head })?;
            self.queue.rotate_left(1);
            return Ok(WorkOutcome::Rebroadcast);
        }

        let Some(owner) = ctx.group().iter().choose(&mut self.rng).cloned() else {
            tracing::trace!("No known peers, skipping workload");
            return Ok(WorkOutcome::Idle);
        };
        let Some(draft) = self.workload.next_task(&mut self.rng) else {
            return Ok(WorkOutcome::Idle);
        };
        let task = Task::new(ctx.address().clone(), Some(owner), draft.abilities, draft.payload);
        tracing::debug!(
            owner = ?task.priority_owner.as_ref().map(Address::as_str),
            abilities = ?task.abilities,
            "Task created"
        );
        ctx.broadcast(MessageTag::Json.as_str(), &TaskMessage { task: task.clone() })?;
        self.queue.push_back(task);
        Ok(WorkOutcome::Generated)
    }

    fn execute(&mut self, ctx: &mut PeerContext<'_>, mut task: Task) -> Result<WorkOutcome, PeerError> {
        let me = ctx.address().clone();
        let mut outputs = Vec::new();
        let mut missing = Vec::new();

        for name in &task.abilities {
            let handlers = self.abilities.handlers(name);
            if handlers.is_empty() {
                tracing::error!(ability = %name, sender = %task.sender, "Ability not registered");
                missing.push(name.clone());
                continue;
            }
            for handler in handlers {
                match catch_unwind(AssertUnwindSafe(|| handler.perform(&me, &task))) {
                    Ok(Ok(Some(output))) => outputs.push(format!("{name}: {output}")),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(ability = %name, error = %e, "Ability failed");
                    }
                    Err(_) => {
                        tracing::error!(ability = %name, "Ability panicked");
                    }
                }
            }
        }

        let key = task.key();
        if !missing.is_empty() && self.policy == UnknownAbilityPolicy::DeadLetter {
            self.remove_from_queue(&key);
            if self.dead_keys.insert(key) {
                tracing::warn!(missing = ?missing, sender = %task.sender, "Task dead-lettered");
                self.dead_letters.push(task);
            }
            return Ok(WorkOutcome::DeadLettered);
        }

        task.status = TaskStatus::Complete;
        task.completed_by = Some(me.clone());
        task.results = Some(if outputs.is_empty() {
            format!("completed by {me}")
        } else {
            outputs.join("; ")
        });
        self.completed += 1;
        tracing::info!(
            sender = %task.sender,
            owner = ?task.priority_owner.as_ref().map(Address::as_str),
            results = task.results.as_deref().unwrap_or_default(),
            "Task completed"
        );

        self.remove_from_queue(&key);
        self.resolved.record(task.clone());
        ctx.broadcast(MessageTag::Json.as_str(), &TaskMessage { task })?;
        Ok(WorkOutcome::Executed)
    }

    fn reconcile(&mut self, me: &Address, task: Task) {
        let removed = self.remove_from_queue(&task.key());
        if removed > 0 || &task.sender == me {
            tracing::debug!(
                completed_by = ?task.completed_by.as_ref().map(Address::as_str),
                removed,
                "Task resolved"
            );
        }
        self.resolved.record(task);
    }

    fn enqueue(&mut self, task: Task) {
        let key = task.key();
        if self.queue.iter().any(|queued| queued.key() == key) {
            return;
        }
        tracing::trace!(sender = %task.sender, queue_len = self.queue.len() + 1, "Task queued");
        self.queue.push_back(task);
    }

    fn remove_from_queue(&mut self, key: &DateTime<Utc>) -> usize {
        let before = self.queue.len();
        self.queue.retain(|queued| &queued.key() != key);
        before - self.queue.len()
    }

    fn next_delay(&mut self) -> Duration {
        let (lo, hi) = self.jitter;
        let jitter = if hi > lo { self.rng.gen_range(lo..hi) } else { lo };
        self.cadence + Duration::from_secs_f64(jitter)
    }
}

impl std::fmt::Debug for TaskDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDistributor")
            .field("abilities", &self.abilities)
            .field("queue_len", &self.queue.len())
            .field("dead_letters", &self.dead_letters.len())
            .field("completed", &self.completed)
            .finish()
    }
}

impl Capability for TaskDistributor {
    fn name(&self) -> &'static str {
        "tasks"
    }

    fn tags(&self) -> &'static [&'static str] {
        TAGS
    }

    fn on_message(
        &mut self,
        ctx: &mut PeerContext<'_>,
        envelope: &Envelope,
    ) -> Result<(), PeerError> {
        let TaskMessage { task } = envelope.decode_payload()?;
        self.handle_work(ctx, task)?;
        Ok(())
    }

    fn tick(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), PeerError> {
        self.workload_round(ctx).map(|_| ())
    }

    fn tick_interval(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }

    fn report(&self, report: &mut StatusReport) {
        report.queue_len = Some(self.queue.len());
        report.dead_letters = Some(self.dead_letters.len());
        report.tasks_completed = Some(self.completed);
    }
}
