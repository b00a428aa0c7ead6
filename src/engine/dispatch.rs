use crate::config::DispatcherConfig;
use crate::engine::context::EventSource;
use crate::engine::scheduler::{CommandStatus, ScheduledCommand};
use crate::engine::state::PersonaState;
use crate::error::PlatformError;
use crate::memory::{MemoryStore, OutcomeRecord};
use crate::persona::PersonaProfile;
use crate::platform::{
    ActionKind, ActionTarget, ContentGenerator, ContentRequest, PlatformCommand, PlatformExecutor,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use strum::IntoEnumIterator;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Max-heap ordering: priority first, then the earlier execution window.
struct QueuedCommand(ScheduledCommand);

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .decision
            .priority
            .total_cmp(&other.0.decision.priority)
            .then_with(|| other.0.not_before.cmp(&self.0.not_before))
    }
}

/// Token bucket sized to the platform's request windows.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn new(capacity: u32, window_secs: u64, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window_secs.max(1) as f64,
            last_refill: now,
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_ms = (deficit / self.refill_per_sec * 1000.0).ceil().max(1.0);
            Some(Duration::from_millis(wait_ms as u64))
        }
    }
}

type ResultHook = Box<dyn Fn(&OutcomeRecord) + Send + Sync>;

struct Inner {
    profile: PersonaProfile,
    config: DispatcherConfig,
    queue: Mutex<BinaryHeap<QueuedCommand>>,
    notify: Notify,
    /// Idempotency keys currently IN_FLIGHT. At most one command per key.
    in_flight: Mutex<HashSet<String>>,
    global: Arc<Semaphore>,
    per_kind: HashMap<ActionKind, Arc<Semaphore>>,
    buckets: Mutex<HashMap<ActionKind, TokenBucket>>,
    executor: Arc<dyn PlatformExecutor>,
    generator: Arc<dyn ContentGenerator>,
    events: Arc<dyn EventSource>,
    store: Arc<dyn MemoryStore>,
    state: Arc<Mutex<PersonaState>>,
    result_hook: Mutex<Option<ResultHook>>,
}

/// Executes scheduled commands against the platform with bounded concurrency,
/// per-kind rate limiting, backoff retry, and exactly-once terminal
/// recording.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(
        profile: PersonaProfile,
        config: DispatcherConfig,
        executor: Arc<dyn PlatformExecutor>,
        generator: Arc<dyn ContentGenerator>,
        events: Arc<dyn EventSource>,
        store: Arc<dyn MemoryStore>,
        state: Arc<Mutex<PersonaState>>,
    ) -> Self {
        let now = Utc::now();
        let per_kind = ActionKind::iter()
            .map(|kind| {
                (
                    kind,
                    Arc::new(Semaphore::new(config.per_kind_concurrency)),
                )
            })
            .collect();
        let buckets = ActionKind::iter()
            .map(|kind| {
                let bucket = config.rate_limits.bucket_for(kind);
                (kind, TokenBucket::new(bucket.capacity, bucket.window_secs, now))
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                global: Arc::new(Semaphore::new(config.max_concurrency)),
                per_kind,
                buckets: Mutex::new(buckets),
                profile,
                config,
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                in_flight: Mutex::new(HashSet::new()),
                executor,
                generator,
                events,
                store,
                state,
                result_hook: Mutex::new(None),
            }),
        }
    }

    /// Observer for terminal records, on top of the memory store write.
    pub fn on_result(&self, hook: impl Fn(&OutcomeRecord) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.result_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn submit(&self, command: ScheduledCommand) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.push(QueuedCommand(command));
        }
        self.inner.notify.notify_one();
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Dispatch loop. Pulls the highest-priority eligible command and runs it
    /// as an independent unit of work; parks when nothing is eligible.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let (next, expired, wake_hint) = self.pull_eligible(now);

            for command in expired {
                Inner::finalize(
                    &self.inner,
                    command,
                    CommandStatus::Expired,
                    None,
                    None,
                    None,
                )
                .await;
            }

            if let Some(command) = next {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    Inner::execute(inner, command).await;
                });
                continue;
            }

            let sleep_for = wake_hint.unwrap_or(Duration::from_secs(1));
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.inner.notify.notified() => {}
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Pop the best command that is due and whose key has no in-flight
    /// sibling. Marks the returned command's key in-flight. Also sweeps
    /// commands that expired while queued.
    fn pull_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> (Option<ScheduledCommand>, Vec<ScheduledCommand>, Option<Duration>) {
        let Ok(mut queue) = self.inner.queue.lock() else {
            return (None, Vec::new(), None);
        };
        let Ok(mut in_flight) = self.inner.in_flight.lock() else {
            return (None, Vec::new(), None);
        };

        let mut expired = Vec::new();
        let mut skipped = Vec::new();
        let mut selected = None;
        let mut wake_hint: Option<Duration> = None;

        while let Some(QueuedCommand(command)) = queue.pop() {
            if command.deadline <= now {
                expired.push(command);
                continue;
            }
            if command.not_before > now {
                let wait = (command.not_before - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(1));
                let wait = Duration::from_millis(wait.as_millis().min(60_000) as u64);
                wake_hint = Some(wake_hint.map_or(wait, |hint| hint.min(wait)));
                skipped.push(command);
                continue;
            }
            if in_flight.contains(command.key()) {
                skipped.push(command);
                continue;
            }
            in_flight.insert(command.key().to_string());
            selected = Some(command);
            break;
        }

        for command in skipped {
            queue.push(QueuedCommand(command));
        }

        (selected, expired, wake_hint)
    }
}

impl Inner {
    /// One in-flight unit of work: concurrency permits, rate-limit token,
    /// content generation, platform call, and outcome handling.
    async fn execute(inner: Arc<Self>, mut command: ScheduledCommand) {
        let Ok(_global) = inner.global.acquire().await else {
            Self::clear_in_flight(&inner, command.key());
            return;
        };
        let kind_semaphore = inner
            .per_kind
            .get(&command.kind())
            .map(Arc::clone);
        let _kind_permit = match kind_semaphore {
            Some(semaphore) => match semaphore.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    Self::clear_in_flight(&inner, command.key());
                    return;
                }
            },
            None => None,
        };

        // Respect the platform's rate windows before going out.
        loop {
            let now = Utc::now();
            if command.deadline <= now {
                Self::clear_in_flight(&inner, command.key());
                Self::finalize(&inner, command, CommandStatus::Expired, None, None, None).await;
                return;
            }
            let wait = {
                let Ok(mut buckets) = inner.buckets.lock() else {
                    break;
                };
                buckets
                    .get_mut(&command.kind())
                    .and_then(|bucket| bucket.try_take(now))
            };
            match wait {
                None => break,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }

        command.status = CommandStatus::InFlight;
        command.attempts += 1;
        let attempt = command.attempts;
        tracing::debug!(
            id = %command.id,
            key = command.key(),
            attempt,
            "dispatching command"
        );

        let started = Instant::now();
        let outcome = Self::call_platform(&inner, &command).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(platform_id) => {
                if command.decision.kind == ActionKind::Reply {
                    if let Some(event_id) = command.decision.source_event_id.clone() {
                        inner.events.mark_resolved(&event_id).await;
                    }
                }
                Self::clear_in_flight(&inner, command.key());
                Self::finalize(
                    &inner,
                    command,
                    CommandStatus::Succeeded,
                    None,
                    platform_id,
                    Some(latency_ms),
                )
                .await;
            }
            Err(error) if error.is_recoverable() && attempt < inner.profile.max_attempts => {
                let delay = Self::backoff(&inner.config, attempt);
                let not_before = Utc::now()
                    + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
                Self::clear_in_flight(&inner, command.key());

                if not_before >= command.deadline {
                    // No room left in the execution window to retry.
                    Self::finalize(
                        &inner,
                        command,
                        CommandStatus::Expired,
                        Some(error.to_string()),
                        None,
                        Some(latency_ms),
                    )
                    .await;
                    return;
                }

                tracing::debug!(
                    id = %command.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off"
                );
                command.status = CommandStatus::Pending;
                command.not_before = not_before;
                if let Ok(mut queue) = inner.queue.lock() {
                    queue.push(QueuedCommand(command));
                }
                inner.notify.notify_one();
            }
            // Permanent failure, or the attempt budget is exhausted.
            Err(error) => {
                Self::clear_in_flight(&inner, command.key());
                Self::finalize(
                    &inner,
                    command,
                    CommandStatus::Failed,
                    Some(error.to_string()),
                    None,
                    Some(latency_ms),
                )
                .await;
            }
        }
    }

    /// Generate content when needed, materialize the typed platform command,
    /// and execute it under a deadline-bounded timeout.
    async fn call_platform(
        inner: &Arc<Self>,
        command: &ScheduledCommand,
    ) -> Result<Option<String>, PlatformError> {
        let text = if command.kind().bears_content() {
            let request = ContentRequest {
                kind: command.decision.kind,
                target: command.decision.target.clone(),
                topic: command.decision.topic.clone(),
                in_reply_to_text: None,
            };
            match inner.generator.generate(&inner.profile, &request).await {
                Ok(text) => Some(text),
                Err(e) => return Err(PlatformError::Transient(format!("content generation: {e}"))),
            }
        } else {
            None
        };

        let platform_command = materialize(&command.decision.kind, &command.decision.target, text)?;

        let now = Utc::now();
        let remaining = (command.deadline - now)
            .to_std()
            .map_err(|_| PlatformError::Timeout(0))?;

        let call = inner
            .executor
            .execute(&platform_command, command.key());
        match tokio::time::timeout(remaining, call).await {
            Ok(Ok(receipt)) => Ok(receipt.platform_id),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(PlatformError::Timeout(remaining.as_millis() as u64)),
        }
    }

    /// Exponential backoff with a cap plus sub-second jitter.
    fn backoff(config: &DispatcherConfig, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        let base = config
            .backoff_base_ms
            .saturating_mul(1_u64 << doublings)
            .min(config.backoff_cap_ms);
        let jitter_ms = u64::from(Utc::now().timestamp_subsec_millis() % 250);
        Duration::from_millis(base + jitter_ms)
    }

    fn clear_in_flight(inner: &Arc<Self>, key: &str) {
        if let Ok(mut in_flight) = inner.in_flight.lock() {
            in_flight.remove(key);
        }
        // A queued sibling under this key may be eligible now.
        inner.notify.notify_one();
    }

    /// Write the terminal record exactly once and fold the outcome into the
    /// persona state under its single mutation point.
    async fn finalize(
        inner: &Arc<Self>,
        mut command: ScheduledCommand,
        status: CommandStatus,
        error: Option<String>,
        platform_id: Option<String>,
        latency_ms: Option<u64>,
    ) {
        if command.status.is_terminal() {
            // A response/timeout race already finalized this command.
            return;
        }
        command.status = status;
        let now = Utc::now();
        let record = command.outcome_record(status, error, platform_id, latency_ms, now);

        tracing::info!(
            id = %command.id,
            key = command.key(),
            status = %status,
            attempts = command.attempts,
            "command finalized"
        );

        if let Err(e) = inner.store.append_outcome(record.clone()).await {
            tracing::warn!("failed recording outcome: {e}");
        }
        if let Ok(mut state) = inner.state.lock() {
            state.observe_outcome(&record, now);
        }
        if let Ok(hook) = inner.result_hook.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(&record);
            }
        }
    }
}

/// Build the typed platform command. A target that does not fit the action
/// kind is a permanent validation failure, never retried.
fn materialize(
    kind: &ActionKind,
    target: &ActionTarget,
    text: Option<String>,
) -> Result<PlatformCommand, PlatformError> {
    let mismatch = || PlatformError::Permanent(format!("target {target} does not fit {kind}"));
    match kind {
        ActionKind::Post => Ok(PlatformCommand::Post {
            text: text.unwrap_or_default(),
        }),
        ActionKind::Reply => match target {
            ActionTarget::Tweet(id) => Ok(PlatformCommand::Reply {
                tweet_id: id.clone(),
                text: text.unwrap_or_default(),
            }),
            _ => Err(mismatch()),
        },
        ActionKind::Retweet => match target {
            ActionTarget::Tweet(id) => Ok(PlatformCommand::Retweet { tweet_id: id.clone() }),
            _ => Err(mismatch()),
        },
        ActionKind::Like => match target {
            ActionTarget::Tweet(id) => Ok(PlatformCommand::Like { tweet_id: id.clone() }),
            _ => Err(mismatch()),
        },
        ActionKind::Follow => match target {
            ActionTarget::User(id) => Ok(PlatformCommand::Follow { user_id: id.clone() }),
            _ => Err(mismatch()),
        },
    }
}
