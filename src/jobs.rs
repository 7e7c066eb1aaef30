//! Poll-style job tracking.
//!
//! Training and batch inference have no cancellation primitive; callers
//! observe them through a job-status record (percent complete, message,
//! terminal state, error text) instead of blocking. [`spawn`] runs work on a
//! background thread and keeps the record current.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::error;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one job's observable state.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub state: JobState,
    /// 0.0..=100.0
    pub percent: f32,
    pub message: String,
    pub error: Option<String>,
    /// JSON result payload once completed.
    pub result: Option<serde_json::Value>,
    pub started_at: String,
    pub updated_at: String,
}

/// Shared registry of job records.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    inner: Arc<RwLock<HashMap<String, JobStatus>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let status = JobStatus {
            id: id.clone(),
            name: name.to_string(),
            state: JobState::Pending,
            percent: 0.0,
            message: String::new(),
            error: None,
            result: None,
            started_at: now.clone(),
            updated_at: now,
        };
        self.inner.write().insert(id.clone(), status);
        id
    }

    pub fn get(&self, id: &str) -> Option<JobStatus> {
        self.inner.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.inner.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    fn update<F: FnOnce(&mut JobStatus)>(&self, id: &str, apply: F) {
        let mut jobs = self.inner.write();
        if let Some(status) = jobs.get_mut(id) {
            apply(status);
            status.updated_at = chrono::Utc::now().to_rfc3339();
        }
    }

    pub fn mark_running(&self, id: &str) {
        self.update(id, |s| s.state = JobState::Running);
    }

    pub fn progress(&self, id: &str, percent: f32, message: &str) {
        self.update(id, |s| {
            s.percent = percent.clamp(0.0, 100.0);
            s.message = message.to_string();
        });
    }

    pub fn complete(&self, id: &str, result: serde_json::Value) {
        self.update(id, |s| {
            s.state = JobState::Completed;
            s.percent = 100.0;
            s.result = Some(result);
        });
    }

    pub fn fail(&self, id: &str, err: &str) {
        self.update(id, |s| {
            s.state = JobState::Failed;
            s.error = Some(err.to_string());
        });
    }
}

/// Progress reporting handle passed to the job body.
pub struct JobHandle {
    tracker: JobTracker,
    id: String,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress(&self, percent: f32, message: &str) {
        self.tracker.progress(&self.id, percent, message);
    }
}

/// Run a job body on a background thread, tracking its lifecycle. Returns
/// the job id immediately; callers poll [`JobTracker::get`].
pub fn spawn<F>(tracker: &JobTracker, name: &str, body: F) -> String
where
    F: FnOnce(&JobHandle) -> Result<serde_json::Value> + Send + 'static,
{
    let id = tracker.create(name);
    let handle = JobHandle {
        tracker: tracker.clone(),
        id: id.clone(),
    };
    let tracker = tracker.clone();
    let job_id = id.clone();
    std::thread::spawn(move || {
        tracker.mark_running(&job_id);
        match body(&handle) {
            Ok(result) => tracker.complete(&job_id, result),
            Err(err) => {
                error!(job = %job_id, %err, "background job failed");
                tracker.fail(&job_id, &err.to_string());
            }
        }
    });
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_terminal(tracker: &JobTracker, id: &str) -> JobStatus {
        for _ in 0..200 {
            if let Some(status) = tracker.get(id) {
                if status.state.is_terminal() {
                    return status;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job never reached a terminal state");
    }

    #[test]
    fn successful_job_completes_with_result() {
        let tracker = JobTracker::new();
        let id = spawn(&tracker, "demo", |handle| {
            handle.progress(50.0, "halfway");
            Ok(serde_json::json!({"answer": 42}))
        });

        let status = wait_terminal(&tracker, &id);
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.percent, 100.0);
        assert_eq!(status.result.unwrap()["answer"], 42);
        assert!(status.error.is_none());
    }

    #[test]
    fn failing_job_records_error_text() {
        let tracker = JobTracker::new();
        let id = spawn(&tracker, "demo", |_| {
            Err(crate::TagwiseError::ModelNotTrained)
        });

        let status = wait_terminal(&tracker, &id);
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("not been trained"));
    }

    #[test]
    fn progress_clamps_to_percent_range() {
        let tracker = JobTracker::new();
        let id = tracker.create("demo");
        tracker.progress(&id, 150.0, "overshoot");
        assert_eq!(tracker.get(&id).unwrap().percent, 100.0);
    }
}
