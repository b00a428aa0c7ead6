#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use magpie::engine::decision::{Decision, TriggerFamily};
use magpie::engine::scheduler::{CommandStatus, ScheduledCommand};
use magpie::memory::{MemoryStore, OutcomeRecord};
use magpie::persona::PersonaProfile;
use magpie::platform::{
    ActionKind, ActionTarget, ContentGenerator, ContentRequest, PlatformCommand, PlatformError,
    PlatformExecutor, PlatformReceipt,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Executor whose responses are scripted per idempotency key. Keys without a
/// script succeed. Every call is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Result<PlatformReceipt, PlatformError>>>>,
    calls: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a key, consumed in order.
    pub fn script(&self, key: &str, responses: Vec<Result<PlatformReceipt, PlatformError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), responses.into());
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _command: &PlatformCommand,
        idempotency_key: &str,
    ) -> Result<PlatformReceipt, PlatformError> {
        self.calls.lock().unwrap().push(idempotency_key.to_string());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(idempotency_key)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => {
                let seq = self.counter.fetch_add(1, Ordering::Relaxed);
                Ok(PlatformReceipt {
                    platform_id: Some(format!("ok-{seq}")),
                })
            }
        }
    }
}

/// Executor that holds each call open long enough for overlap to show, and
/// tracks the highest number of simultaneously open calls.
#[derive(Default)]
pub struct SlowExecutor {
    open: AtomicUsize,
    high_water: AtomicUsize,
    counter: AtomicU64,
}

impl SlowExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most calls ever open at the same time.
    pub fn max_open_calls(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformExecutor for SlowExecutor {
    async fn execute(
        &self,
        _command: &PlatformCommand,
        _idempotency_key: &str,
    ) -> Result<PlatformReceipt, PlatformError> {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(open, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        self.open.fetch_sub(1, Ordering::SeqCst);
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(PlatformReceipt {
            platform_id: Some(format!("slow-{seq}")),
        })
    }
}

/// Generator that fails a fixed number of times before producing text.
pub struct FlakyGenerator {
    failures_left: Mutex<u32>,
}

impl FlakyGenerator {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: Mutex::new(times),
        }
    }
}

#[async_trait]
impl ContentGenerator for FlakyGenerator {
    async fn generate(
        &self,
        profile: &PersonaProfile,
        _request: &ContentRequest,
    ) -> anyhow::Result<String> {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            anyhow::bail!("generation backend unavailable");
        }
        Ok(format!("{} says hello", profile.name))
    }
}

/// Profile tuned for deterministic tests: no jitter, no spacing delays.
pub fn test_profile() -> PersonaProfile {
    let mut profile = PersonaProfile::named("test-persona", "Testy");
    profile.jitter_minutes = 0;
    profile.min_spacing_minutes = 0;
    profile
}

pub fn command(
    profile: &PersonaProfile,
    kind: ActionKind,
    target: ActionTarget,
    key: &str,
    now: DateTime<Utc>,
) -> ScheduledCommand {
    ScheduledCommand {
        id: Uuid::new_v4(),
        persona_id: profile.id.clone(),
        decision: Decision {
            kind,
            target,
            topic: None,
            priority: 60.0,
            trigger: TriggerFamily::Scheduled,
            idempotency_key: key.to_string(),
            source_event_id: None,
        },
        not_before: now,
        deadline: now + Duration::minutes(i64::from(profile.deadline_minutes)),
        status: CommandStatus::Pending,
        attempts: 0,
    }
}

/// Poll the store until the command has a terminal record or the iteration
/// budget runs out.
pub async fn wait_for_outcome(
    store: &dyn MemoryStore,
    persona_id: &str,
    command_id: &str,
) -> OutcomeRecord {
    let since = Utc::now() - Duration::hours(1);
    for _ in 0..5_000 {
        let outcomes = store
            .recent_outcomes(persona_id, since, 100)
            .await
            .expect("store read");
        if let Some(record) = outcomes.iter().find(|r| r.command_id == command_id) {
            return record.clone();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("command {command_id} never reached a terminal state");
}
