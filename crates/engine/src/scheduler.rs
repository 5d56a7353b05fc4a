//! Wall-clock scheduling of stored graphs.
//!
//! Entries fire once at a fixed time or repeatedly every N minutes (one
//! minute is the finest granularity).  Each due entry loads its graph from
//! the store, runs it, and persists the resulting execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::DbPool;

use crate::executor::WorkflowExecutor;
use crate::models::Execution;
use crate::{store, EngineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Fire once at `at`, then disable.
    Once { at: DateTime<Utc> },
    /// Fire every `every_minutes`, first at `start_at` (or one interval from now).
    Interval {
        every_minutes: u32,
        #[serde(default)]
        start_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub spec: ScheduleSpec,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// # Errors
    /// [`EngineError::InvalidSchedule`] for intervals shorter than a minute.
    pub fn new(graph_id: Uuid, spec: ScheduleSpec, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let next_run = match &spec {
            ScheduleSpec::Once { at } => *at,
            ScheduleSpec::Interval { every_minutes, start_at } => {
                if *every_minutes == 0 {
                    return Err(EngineError::InvalidSchedule(
                        "interval must be at least one minute".into(),
                    ));
                }
                start_at.unwrap_or(now + chrono::Duration::minutes(i64::from(*every_minutes)))
            }
        };

        Ok(Self {
            id: Uuid::new_v4(),
            graph_id,
            spec,
            enabled: true,
            last_run: None,
            next_run: Some(next_run),
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|at| at <= now)
    }

    /// Record a firing at `now` and compute the next one.
    fn advance(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        match self.spec {
            ScheduleSpec::Once { .. } => {
                self.enabled = false;
                self.next_run = None;
            }
            ScheduleSpec::Interval { every_minutes, .. } => {
                let step = i64::from(every_minutes.max(1)) * 60;
                let mut next = self.next_run.unwrap_or(now);
                if next <= now {
                    // Skip whole intervals missed while the scheduler was idle.
                    let missed = (now - next).num_seconds() / step + 1;
                    next += chrono::Duration::seconds(missed * step);
                }
                self.next_run = Some(next);
            }
        }
    }
}

/// Runs scheduled graphs.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    executor: Arc<WorkflowExecutor>,
    pool: DbPool,
    tick: Duration,
}

impl Scheduler {
    pub fn new(executor: Arc<WorkflowExecutor>, pool: DbPool, tick: Duration) -> Self {
        Self {
            entries: Vec::new(),
            executor,
            pool,
            tick,
        }
    }

    pub fn add(&mut self, entry: ScheduleEntry) -> Uuid {
        let id = entry.id;
        info!(entry_id = %id, graph_id = %entry.graph_id, next_run = ?entry.next_run, "schedule entry registered");
        self.entries.push(entry);
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ScheduleEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn set_enabled(&mut self, id: Uuid, enabled: bool) -> Result<(), EngineError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| EngineError::InvalidSchedule(format!("no schedule entry {id}")))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Fire every entry due at `now`, returning the executions produced.
    #[instrument(skip(self))]
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<Execution> {
        let mut executions = Vec::new();

        for index in 0..self.entries.len() {
            if !self.entries[index].is_due(now) {
                continue;
            }
            let (entry_id, graph_id) = (self.entries[index].id, self.entries[index].graph_id);
            self.entries[index].advance(now);

            let graph = match store::load_graph(&self.pool, graph_id).await {
                Ok(graph) => graph,
                Err(e) => {
                    error!(entry_id = %entry_id, graph_id = %graph_id, error = %e, "scheduled graph could not be loaded");
                    continue;
                }
            };

            info!(entry_id = %entry_id, graph_id = %graph_id, "firing scheduled run");
            let execution = self.executor.run(&graph).await;
            if let Err(e) = store::save_execution(&self.pool, &execution).await {
                warn!(execution_id = %execution.id, error = %e, "failed to persist scheduled execution");
            }
            executions.push(execution);
        }

        executions
    }

    /// Tick every period until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(count = self.entries.len(), period_secs = self.tick.as_secs(), "scheduler started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let fired = self.tick(Utc::now()).await;
                    if !fired.is_empty() {
                        info!(count = fired.len(), "scheduled runs finished");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}
