//! Registry of dispatched module jobs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use agent_control_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::{LookupError, parse_id};

/// Job identifier.
pub type JobId = u64;

/// A job dispatch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Module the job invokes.
    pub module: String,
    /// Arguments passed to the module.
    pub args: Vec<String>,
    /// Sessions the job applies to.
    pub sessions: Vec<SessionId>,
}

/// A recorded job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub module: String,
    pub args: Vec<String>,
    pub sessions: Vec<SessionId>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

struct Inner {
    jobs: BTreeMap<JobId, Arc<Job>>,
    next_id: JobId,
}

/// Thread-safe store of in-flight jobs.
///
/// Jobs are passive records: they leave the registry only through
/// [`JobRegistry::del_job`].
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    /// Create an empty job registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a job and return its id.
    pub fn add_job(&self, job: NewJob) -> JobId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let NewJob {
            module,
            args,
            sessions,
        } = job;
        tracing::info!(job_id = id, module = %module, sessions = ?sessions, "Job added");

        inner.jobs.insert(
            id,
            Arc::new(Job {
                id,
                module,
                args,
                sessions,
                created_at: now(),
            }),
        );
        id
    }

    /// Look up a job by its textual id.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `key` is not an integer and `NotFound`
    /// if no job has that id.
    pub fn get_job(&self, key: &str) -> Result<Arc<Job>, LookupError> {
        let id = parse_id("job", key)?;
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(LookupError::NotFound { kind: "job", id })
    }

    /// Remove a job. Unknown or malformed keys are ignored.
    pub fn del_job(&self, key: &str) -> Option<Arc<Job>> {
        let id = parse_id("job", key).ok()?;
        let removed = self.lock().jobs.remove(&id);
        if removed.is_some() {
            tracing::info!(job_id = id, "Job removed");
        }
        removed
    }

    /// All recorded jobs, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Job>> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Number of recorded jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Whether no job is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn job(module: &str) -> NewJob {
        NewJob {
            module: module.to_string(),
            args: vec!["-v".to_string()],
            sessions: vec![1, 2],
        }
    }

    #[test]
    fn test_get_job_lookup_errors() {
        let jobs = JobRegistry::new();
        assert_eq!(
            jobs.get_job("abc").unwrap_err(),
            LookupError::InvalidArgument {
                kind: "job",
                key: "abc".into(),
            }
        );
        assert_eq!(
            jobs.get_job("42").unwrap_err(),
            LookupError::NotFound { kind: "job", id: 42 }
        );
    }

    #[test]
    fn test_add_then_get() {
        let jobs = JobRegistry::new();
        let id = jobs.add_job(job("screenshot"));
        assert_eq!(id, 1);

        let stored = assert_ok!(jobs.get_job("1"));
        assert_eq!(stored.module, "screenshot");
        assert_eq!(stored.sessions, vec![1, 2]);
        assert_eq!(jobs.add_job(job("ps")), 2);
    }

    #[test]
    fn test_del_job_is_lenient() {
        let jobs = JobRegistry::new();
        assert!(jobs.del_job("7").is_none());
        assert!(jobs.del_job("seven").is_none());

        let id = jobs.add_job(job("ps"));
        assert!(jobs.del_job(&id.to_string()).is_some());
        assert_err!(jobs.get_job(&id.to_string()));
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let jobs = JobRegistry::new();
        let first = jobs.add_job(job("ps"));
        jobs.del_job(&first.to_string());
        assert_eq!(jobs.add_job(job("ps")), first + 1);
        assert_eq!(jobs.list().len(), 1);
    }
}
