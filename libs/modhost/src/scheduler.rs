//! Cron jobs registered by modules.
//!
//! Specs are validated when added. Each job runs on its own tokio task that
//! sleeps until the next tick, so a slow callback only delays its own schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type JobFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule '{spec}' for job '{job}': {reason}")]
    InvalidSpec {
        job: String,
        spec: String,
        reason: String,
    },
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Accept the classic 5-field form by pinning seconds to 0 and leaving the
/// year open; 6- and 7-field specs and `@` macros pass through.
///
/// Classic cron numbers weekdays from Sunday = 0 (7 is Sunday too) while the
/// 7-field form starts at Sunday = 1, so a numeric weekday field in a 5-field
/// spec is rewritten to names.
fn normalize_cron_expression(expr: &str) -> Result<String, String> {
    let expr = expr.trim();
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.as_slice() {
        [min, hour, dom, month, dow] => Ok(format!(
            "0 {min} {hour} {dom} {month} {} *",
            classic_weekdays(dow)?
        )),
        _ => Ok(expr.to_string()),
    }
}

/// Expand a numeric 0-7 weekday field (lists, ranges, steps) into names.
fn classic_weekdays(field: &str) -> Result<String, String> {
    if !field.bytes().any(|b| b.is_ascii_digit()) {
        return Ok(field.to_string());
    }

    let bad = || format!("invalid day-of-week field '{field}'");
    let num = |s: &str| -> Result<usize, String> {
        s.parse::<usize>().ok().filter(|n| *n <= 7).ok_or_else(bad)
    };

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step = step.parse::<usize>().ok().filter(|s| *s > 0);
                (base, step.ok_or_else(bad)?)
            }
            None => (item, 1),
        };
        let (lo, hi) = match base.split_once('-') {
            _ if base == "*" => (0, 6),
            Some((lo, hi)) => (num(lo)?, num(hi)?),
            // `n/step` runs to the end of the week
            None if step > 1 => (num(base)?, 6),
            None => {
                let n = num(base)?;
                (n, n)
            }
        };
        if lo > hi {
            return Err(bad());
        }
        for day in (lo..=hi).step_by(step) {
            days[day % 7] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Ok("*".to_string());
    }
    Ok(WEEKDAYS
        .iter()
        .zip(days)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect::<Vec<_>>()
        .join(","))
}

pub fn parse_schedule(spec: &str) -> Result<Schedule, String> {
    let normalized = normalize_cron_expression(spec)?;
    Schedule::from_str(&normalized).map_err(|e| e.to_string())
}

struct Job {
    name: String,
    spec: String,
    schedule: Schedule,
    run: JobFn,
}

/// Job table plus the running tasks once started.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_names())
            .field("running", &self.tasks.lock().len())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        name: impl Into<String>,
        spec: &str,
        run: JobFn,
    ) -> Result<(), ScheduleError> {
        let name = name.into();
        let schedule = parse_schedule(spec).map_err(|e| ScheduleError::InvalidSpec {
            job: name.clone(),
            spec: spec.to_owned(),
            reason: e,
        })?;
        self.jobs.lock().push(Job {
            name,
            spec: spec.to_owned(),
            schedule,
            run,
        });
        Ok(())
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Spawn one task per registered job. Tasks exit when `cancel` fires.
    ///
    /// Must be called from within a tokio runtime. Jobs added afterwards are
    /// not picked up.
    pub fn start(&self, cancel: CancellationToken) {
        let jobs = self.jobs.lock();
        let mut tasks = self.tasks.lock();
        for job in jobs.iter() {
            tracing::info!(job = %job.name, spec = %job.spec, "Scheduling cron job");
            tasks.push(tokio::spawn(run_job(
                job.name.clone(),
                job.schedule.clone(),
                Arc::clone(&job.run),
                cancel.clone(),
            )));
        }
    }

    /// Wait for all started job tasks to finish.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for t in tasks {
            if let Err(e) = t.await {
                tracing::warn!(error = %e, "Cron task ended abnormally");
            }
        }
    }
}

async fn run_job(name: String, schedule: Schedule, run: JobFn, cancel: CancellationToken) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::debug!(job = %name, "Schedule has no further ticks");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(job = %name, "Cron job stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let f = Arc::clone(&run);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(()) => tracing::trace!(job = %name, "Cron job tick done"),
            Err(e) => tracing::error!(job = %name, error = %e, "Cron job panicked"),
        }
    }
}
