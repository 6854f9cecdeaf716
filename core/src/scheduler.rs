//! Task scheduler / orchestrator.
//!
//! EXECUTION MODEL:
//!   - One wave = one pass over the job graph in topological order.
//!   - A job runs only when its trigger fired (roots) or every declared
//!     upstream succeeded in the current wave (After jobs).
//!   - If an upstream fails, dependents are marked blocked for the wave
//!     and retried on the next one. Nothing is ever half-published: the
//!     store's versioned pointer carries atomic visibility.
//!   - Errors are caught at the job boundary, recorded, and never reach
//!     readers of the query surface.
//!
//! Freeze is an explicit process-wide state with defined transitions
//! (Active ⇄ Inactive), owned here and nowhere else. While active, all
//! writes are refused and reads keep serving the last-good snapshot.

use crate::{
    auditor::{CheckResult, CheckType, ComplianceAuditor, ComplianceRecord},
    changelog::{ChangeLogAdapter, SqliteChangeLog},
    clock::Clock,
    derived::{AgeRollupJob, HighRiskTrackerJob, RegionRollupJob, RegionTrendJob},
    error::{CoreError, CoreResult},
    event::{OpsEvent, OpsEventEntry},
    fraud::FraudSignalScan,
    graph::{JobGraph, JobSpec, Trigger},
    job::{JobContext, RefreshJob},
    materializer::Materializer,
    store::{Store, SEGMENT_TABLE},
    types::{JobName, SourceId, Wave},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Job state machine ────────────────────────────────────────────────────────

/// suspended → scheduled → running → {succeeded | failed | blocked}
/// → scheduled (on next trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Suspended,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Suspended => "suspended",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suspended" => Some(JobState::Suspended),
            "scheduled" => Some(JobState::Scheduled),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            "blocked" => Some(JobState::Blocked),
            _ => None,
        }
    }
}

/// EmergencyFreeze: Active means all writes are halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    NoData,
    Frozen,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub published_segments: i64,
    pub fraud_signals: i64,
    pub failed_jobs: i64,
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// One row of the operator status table.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: JobName,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What a wave actually did, in execution order.
#[derive(Debug, Clone)]
pub struct WaveOutcome {
    pub wave: Wave,
    pub executed: Vec<(JobName, JobState)>,
}

impl WaveOutcome {
    pub fn state_of(&self, name: &str) -> Option<JobState> {
        self.executed
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    fn count(&self, state: JobState) -> usize {
        self.executed.iter().filter(|(_, s)| *s == state).count()
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    graph: JobGraph,
    jobs: HashMap<JobName, Box<dyn RefreshJob>>,
    store: Store,
    changelog: SqliteChangeLog,
    pub clock: Clock,
    wave: Wave,
    freeze: FreezeState,
    suspended: bool,
    last_run: HashMap<JobName, DateTime<Utc>>,
    next_run: HashMap<JobName, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(store: &Store, clock: Clock) -> CoreResult<Self> {
        Ok(Self {
            graph: JobGraph::new(),
            jobs: HashMap::new(),
            store: store.reopen()?,
            changelog: SqliteChangeLog::new(store.reopen()?),
            clock,
            wave: 0,
            freeze: FreezeState::Inactive,
            suspended: false,
            last_run: HashMap::new(),
            next_run: HashMap::new(),
        })
    }

    /// Build a fully wired scheduler with the standard pipeline:
    ///
    ///   materialize_segments            (change-pending, both sources)
    ///     └─ compliance_audit
    ///          ├─ age_rollup
    ///          ├─ region_rollup
    ///          ├─ high_risk_tracker
    ///          ├─ region_trend
    ///          └─ fraud_signal_scan
    ///
    /// Derived views hang off the audit so a k-anonymity failure halts
    /// the wave before anything downstream reads the rejected snapshot.
    pub fn build(store: &Store, clock: Clock) -> CoreResult<Self> {
        let mut sched = Scheduler::new(store, clock)?;

        sched.register(
            JobSpec {
                name: Materializer::NAME.to_string(),
                trigger: Trigger::ChangePending {
                    sources: SourceId::ALL.to_vec(),
                },
                staleness_target_secs: 300,
                hard_deadline_secs: 900,
            },
            Box::new(Materializer::new(
                store.reopen()?,
                Box::new(SqliteChangeLog::new(store.reopen()?)),
            )),
        )?;

        sched.register(
            JobSpec {
                name: ComplianceAuditor::NAME.to_string(),
                trigger: Trigger::After {
                    upstream: vec![Materializer::NAME.to_string()],
                },
                staleness_target_secs: 300,
                hard_deadline_secs: 300,
            },
            Box::new(ComplianceAuditor::new(store.reopen()?)),
        )?;

        let after_audit = Trigger::After {
            upstream: vec![ComplianceAuditor::NAME.to_string()],
        };
        let derived: Vec<Box<dyn RefreshJob>> = vec![
            Box::new(AgeRollupJob::new(store.reopen()?)),
            Box::new(RegionRollupJob::new(store.reopen()?)),
            Box::new(HighRiskTrackerJob::new(store.reopen()?)),
            Box::new(RegionTrendJob::new(store.reopen()?)),
            Box::new(FraudSignalScan::new(store.reopen()?)),
        ];
        for job in derived {
            let name = job.name().to_string();
            sched.register(
                JobSpec {
                    name,
                    trigger: after_audit.clone(),
                    staleness_target_secs: 600,
                    hard_deadline_secs: 300,
                },
                job,
            )?;
        }

        sched.graph.validate()?;
        Ok(sched)
    }

    pub fn register(&mut self, spec: JobSpec, job: Box<dyn RefreshJob>) -> CoreResult<()> {
        assert_eq!(
            spec.name,
            job.name(),
            "spec name must match the job it describes"
        );
        self.store
            .upsert_job_state(&spec.name, JobState::Scheduled, None, None, None)?;
        self.jobs.insert(spec.name.clone(), job);
        self.graph.add(spec);
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.graph.validate()
    }

    // ── Wave execution ─────────────────────────────────────────────

    /// Trigger-driven entry point: run one wave if anything is due.
    /// A no-op while frozen or suspended.
    pub fn run_wave(&mut self) -> CoreResult<WaveOutcome> {
        if self.freeze == FreezeState::Active {
            log::warn!("wave skipped: freeze active");
            return Ok(self.empty_outcome());
        }
        if self.suspended {
            log::debug!("wave skipped: all jobs suspended");
            return Ok(self.empty_outcome());
        }

        let now = self.clock.now();
        let mut due: HashSet<JobName> = HashSet::new();
        for spec in self.graph.specs() {
            if spec.is_root() && self.trigger_fired(spec, now)? {
                due.insert(spec.name.clone());
            }
        }
        if due.is_empty() {
            return Ok(self.empty_outcome());
        }

        let selected = self.close_over_downstreams(&due);
        self.execute_wave(selected)
    }

    /// Operator surface: force a refresh immediately. With a job name,
    /// runs that job and everything downstream of it; without, forces a
    /// full wave. Rejected while frozen.
    pub fn refresh_now(&mut self, job: Option<&str>) -> CoreResult<WaveOutcome> {
        if self.freeze == FreezeState::Active {
            return Err(CoreError::Frozen);
        }

        let selected: HashSet<JobName> = match job {
            Some(name) => {
                if self.graph.get(name).is_none() {
                    return Err(CoreError::JobNotFound {
                        name: name.to_string(),
                    });
                }
                self.graph.descendants(name)?.into_iter().collect()
            }
            None => {
                let roots: HashSet<JobName> = self
                    .graph
                    .specs()
                    .iter()
                    .filter(|s| s.is_root())
                    .map(|s| s.name.clone())
                    .collect();
                self.close_over_downstreams(&roots)
            }
        };
        self.execute_wave(selected)
    }

    /// A cadence job is due when it has never run or its next_run has
    /// passed; a change-pending job when any named log has entries.
    fn trigger_fired(&self, spec: &JobSpec, now: DateTime<Utc>) -> CoreResult<bool> {
        match &spec.trigger {
            Trigger::Cadence { .. } => Ok(self
                .next_run
                .get(&spec.name)
                .map(|t| *t <= now)
                .unwrap_or(true)),
            Trigger::ChangePending { sources } => {
                for source in sources {
                    if self.changelog.pending(*source)? > 0 {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Trigger::After { .. } => Ok(false),
        }
    }

    /// An After job joins the wave only when all of its upstreams did.
    fn close_over_downstreams(&self, due: &HashSet<JobName>) -> HashSet<JobName> {
        let mut selected = due.clone();
        // topo_order is validated at build time.
        if let Ok(order) = self.graph.topo_order() {
            for name in order {
                if selected.contains(&name) {
                    continue;
                }
                if let Some(spec) = self.graph.get(&name) {
                    let ups = spec.upstreams();
                    if !ups.is_empty() && ups.iter().all(|u| selected.contains(u)) {
                        selected.insert(name);
                    }
                }
            }
        }
        selected
    }

    fn execute_wave(&mut self, selected: HashSet<JobName>) -> CoreResult<WaveOutcome> {
        self.wave += 1;
        let wave = self.wave;
        let wave_start = self.clock.now();
        self.emit(&OpsEvent::WaveStarted { wave })?;

        let order = self.graph.topo_order()?;
        let mut succeeded: HashSet<JobName> = HashSet::new();
        let mut outcome = WaveOutcome {
            wave,
            executed: Vec::new(),
        };

        for name in order {
            if !selected.contains(&name) {
                continue;
            }
            let spec = self
                .graph
                .get(&name)
                .cloned()
                .expect("selected job is registered");

            // Upstream gating: every upstream that joined this wave must
            // have succeeded, otherwise the dependent is blocked.
            let failed_upstream = spec
                .upstreams()
                .iter()
                .find(|u| selected.contains(*u) && !succeeded.contains(*u))
                .cloned();
            if let Some(upstream) = failed_upstream {
                log::warn!("wave {wave}: '{name}' blocked, upstream '{upstream}' did not succeed");
                self.persist_state(&name, JobState::Blocked, None)?;
                self.emit(&OpsEvent::JobBlocked {
                    wave,
                    job: name.clone(),
                    upstream,
                })?;
                outcome.executed.push((name, JobState::Blocked));
                continue;
            }

            let state = self.run_job(wave, wave_start, &spec)?;
            if state == JobState::Succeeded {
                succeeded.insert(name.clone());
            }
            outcome.executed.push((name, state));
        }

        self.emit(&OpsEvent::WaveCompleted {
            wave,
            succeeded: outcome.count(JobState::Succeeded),
            failed: outcome.count(JobState::Failed),
            blocked: outcome.count(JobState::Blocked),
        })?;
        Ok(outcome)
    }

    fn run_job(
        &mut self,
        wave: Wave,
        wave_start: DateTime<Utc>,
        spec: &JobSpec,
    ) -> CoreResult<JobState> {
        let name = &spec.name;
        self.persist_state(name, JobState::Running, None)?;
        self.emit(&OpsEvent::JobStarted {
            wave,
            job: name.clone(),
        })?;

        let job_start = self.clock.now();
        let ctx = JobContext {
            wave,
            now: job_start,
            deadline: Some(job_start + Duration::seconds(spec.hard_deadline_secs)),
            clock: self.clock,
        };

        // Take the job out so the run can't alias scheduler state.
        let mut job = self
            .jobs
            .remove(name)
            .expect("registered spec has a matching job");
        let result = job.run(&ctx);
        self.jobs.insert(name.clone(), job);

        let finished = self.clock.now();
        match result {
            Ok(report) => {
                self.last_run.insert(name.clone(), job_start);
                if let Trigger::Cadence { every_secs } = spec.trigger {
                    self.next_run
                        .insert(name.clone(), job_start + Duration::seconds(every_secs));
                }
                self.persist_state(name, JobState::Succeeded, None)?;
                self.emit(&OpsEvent::JobSucceeded {
                    wave,
                    job: name.clone(),
                    rows_written: report.rows_written,
                })?;

                let elapsed = (finished - wave_start).num_seconds();
                if elapsed > spec.staleness_target_secs {
                    log::warn!(
                        "wave {wave}: '{name}' finished {elapsed}s after wave start, target {}s",
                        spec.staleness_target_secs
                    );
                    self.emit(&OpsEvent::StalenessBreached {
                        wave,
                        job: name.clone(),
                        target_secs: spec.staleness_target_secs,
                        actual_secs: elapsed,
                    })?;
                    self.store.append_compliance(&ComplianceRecord::new(
                        CheckType::Staleness,
                        name,
                        CheckResult::Warning,
                        &format!(
                            "completed {elapsed}s after wave start, target {}s",
                            spec.staleness_target_secs
                        ),
                        finished,
                    ))?;
                }
                Ok(JobState::Succeeded)
            }
            Err(err) => {
                log::error!("wave {wave}: '{name}' failed: {err}");
                if let CoreError::SourceUnavailable { source_id } = &err {
                    self.store.append_compliance(&ComplianceRecord::new(
                        CheckType::SourceAvailability,
                        source_id.as_str(),
                        CheckResult::Warning,
                        &format!("source unavailable; wave {wave} skipped, prior snapshot remains authoritative"),
                        finished,
                    ))?;
                }
                self.persist_state(name, JobState::Failed, Some(&err.to_string()))?;
                self.emit(&OpsEvent::JobFailed {
                    wave,
                    job: name.clone(),
                    error: err.to_string(),
                })?;
                Ok(JobState::Failed)
            }
        }
    }

    // ── Global operations ──────────────────────────────────────────

    /// Graceful: the sequential executor has nothing in flight between
    /// waves, so suspension simply stops new jobs from starting.
    pub fn suspend_all(&mut self) -> CoreResult<()> {
        self.suspended = true;
        for spec in self.graph.specs() {
            self.store.upsert_job_state(
                &spec.name,
                JobState::Suspended,
                self.last_run.get(&spec.name).copied(),
                self.next_run.get(&spec.name).copied(),
                None,
            )?;
        }
        self.emit(&OpsEvent::AllSuspended { wave: self.wave })
    }

    pub fn resume_all(&mut self) -> CoreResult<()> {
        self.suspended = false;
        for spec in self.graph.specs() {
            self.store.upsert_job_state(
                &spec.name,
                JobState::Scheduled,
                self.last_run.get(&spec.name).copied(),
                self.next_run.get(&spec.name).copied(),
                None,
            )?;
        }
        self.emit(&OpsEvent::AllResumed { wave: self.wave })
    }

    pub fn freeze(&mut self) -> CoreResult<()> {
        self.freeze = FreezeState::Active;
        log::warn!("emergency freeze engaged; all writes halted");
        self.emit(&OpsEvent::FreezeEngaged { wave: self.wave })
    }

    pub fn unfreeze(&mut self) -> CoreResult<()> {
        self.freeze = FreezeState::Inactive;
        log::info!("freeze lifted");
        self.emit(&OpsEvent::FreezeLifted { wave: self.wave })
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze == FreezeState::Active
    }

    pub fn current_wave(&self) -> Wave {
        self.wave
    }

    // ── Operator read surface ──────────────────────────────────────

    pub fn status(&self) -> CoreResult<Vec<JobStatus>> {
        self.store.job_states()
    }

    pub fn health(&self) -> CoreResult<HealthReport> {
        let overview = self.store.overview()?;
        let published = self.store.published_version(SEGMENT_TABLE)?;
        let fraud_signals = self.store.fraud_signal_count()?;
        let failed_jobs = self
            .store
            .job_states()?
            .iter()
            .filter(|j| matches!(j.state, JobState::Failed | JobState::Blocked))
            .count() as i64;

        let status = if self.freeze == FreezeState::Active {
            HealthStatus::Frozen
        } else if published.is_none() {
            HealthStatus::NoData
        } else if failed_jobs > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(HealthReport {
            status,
            published_segments: overview.total_segments,
            fraud_signals,
            failed_jobs,
            last_refreshed: self.store.last_refreshed(SEGMENT_TABLE)?,
        })
    }

    // ── Internals ──────────────────────────────────────────────────

    fn empty_outcome(&self) -> WaveOutcome {
        WaveOutcome {
            wave: self.wave,
            executed: Vec::new(),
        }
    }

    fn persist_state(
        &self,
        name: &str,
        state: JobState,
        error: Option<&str>,
    ) -> CoreResult<()> {
        self.store.upsert_job_state(
            name,
            state,
            self.last_run.get(name).copied(),
            self.next_run.get(name).copied(),
            error,
        )
    }

    fn emit(&self, event: &OpsEvent) -> CoreResult<()> {
        let entry = OpsEventEntry {
            id: None,
            wave: self.wave,
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
            created_at: self.clock.now(),
        };
        self.store.append_ops_event(&entry)
    }
}
