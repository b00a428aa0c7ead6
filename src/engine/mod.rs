//! The behavior cycle: sense the platform, update persona state, decide,
//! schedule, and hand due commands to the dispatcher.

pub mod context;
pub mod decision;
pub mod dispatch;
pub mod scheduler;
pub mod state;

use crate::config::Config;
use crate::engine::context::{ContextAnalyzer, EventSource};
use crate::engine::decision::decide;
use crate::engine::dispatch::CommandDispatcher;
use crate::engine::scheduler::ActionScheduler;
use crate::engine::state::{Mode, PersonaState};
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::persona::PersonaProfile;
use crate::platform::{ContentGenerator, PlatformExecutor};
use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// What one tick of the cycle did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub backlog: usize,
    pub mode: Mode,
    pub mode_changed: bool,
    pub decisions: usize,
    pub scheduled: usize,
    pub dispatched: usize,
}

/// Owns the full sense-decide-schedule-dispatch pipeline for one persona.
pub struct Engine {
    profile: PersonaProfile,
    config: Config,
    analyzer: ContextAnalyzer,
    scheduler: ActionScheduler,
    dispatcher: CommandDispatcher,
    state: Arc<Mutex<PersonaState>>,
    store: Arc<dyn MemoryStore>,
    last_tick: Option<DateTime<Utc>>,
}

impl Engine {
    #[must_use]
    pub fn new(
        profile: PersonaProfile,
        config: Config,
        executor: Arc<dyn PlatformExecutor>,
        generator: Arc<dyn ContentGenerator>,
        events: Arc<dyn EventSource>,
        store: Arc<dyn MemoryStore>,
    ) -> Self {
        let state = Arc::new(Mutex::new(PersonaState::new(&profile, Utc::now())));
        let dispatcher = CommandDispatcher::new(
            profile.clone(),
            config.dispatcher.clone(),
            executor,
            generator,
            Arc::clone(&events),
            Arc::clone(&store),
            Arc::clone(&state),
        );
        Self {
            analyzer: ContextAnalyzer::new(events),
            scheduler: ActionScheduler::new(profile.clone(), Arc::clone(&store)),
            dispatcher,
            state,
            store,
            profile,
            config,
            last_tick: None,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn state_handle(&self) -> Arc<Mutex<PersonaState>> {
        Arc::clone(&self.state)
    }

    /// One full cycle at `now`. Pure decision logic sits between two explicit
    /// side-effect stages (snapshot in, schedule/dispatch out).
    pub async fn tick_once(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let snapshot = self.analyzer.snapshot(&self.profile, now).await;

        // Feedback since the previous tick, bounded by the outcome window.
        let since = self.last_tick.unwrap_or_else(|| {
            now - Duration::minutes(i64::from(self.config.engine.outcome_window_minutes))
        });
        let outcomes = self
            .store
            .recent_outcomes(&self.profile.id, since, 256)
            .await
            .context("reading recent outcomes")?;
        self.last_tick = Some(now);

        let (mode, transition, state_copy) = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| anyhow::anyhow!("persona state lock poisoned: {e}"))?;
            let transition = state.update_cycle(&self.profile, &snapshot, &outcomes, now);
            (state.mode, transition, state.clone())
        };

        if transition.is_some() {
            self.scheduler.replan(mode, now).await;
        }

        let decisions = decide(&snapshot, &state_copy, &self.profile, now);
        let decision_count = decisions.len();
        let scheduled = self.scheduler.schedule(decisions, now).await;

        let due = self.scheduler.take_due(now).await;
        let dispatched = due.len();
        for command in due {
            self.dispatcher.submit(command);
        }

        let report = CycleReport {
            backlog: snapshot.backlog(),
            mode,
            mode_changed: transition.is_some(),
            decisions: decision_count,
            scheduled,
            dispatched,
        };
        tracing::debug!(
            mode = %report.mode,
            backlog = report.backlog,
            decisions = report.decisions,
            scheduled = report.scheduled,
            dispatched = report.dispatched,
            "cycle complete"
        );
        Ok(report)
    }

    /// Run the cycle on its interval until cancelled. The dispatcher runs
    /// alongside; a failed tick is logged and the loop continues.
    pub async fn run(mut self, cancel: CancellationToken) {
        let dispatcher = self.dispatcher.clone();
        let dispatch_cancel = cancel.clone();
        let dispatch_task = tokio::spawn(async move {
            dispatcher.run(dispatch_cancel).await;
        });

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.engine.cycle_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once(Utc::now()).await {
                        tracing::warn!("cycle failed: {e:#}");
                    }
                }
            }
        }

        let _ = dispatch_task.await;
        tracing::info!("engine stopped");
    }
}
