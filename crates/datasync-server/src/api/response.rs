//! Response bodies

use serde::{Deserialize, Serialize};

use crate::sync::types::Job;

/// A job with its derived progress
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub remaining_rows: i64,
    pub progress_percentage: f64,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            remaining_rows: job.remaining_rows(),
            progress_percentage: job.progress_percentage(),
            job,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
}

impl From<Vec<Job>> for JobListResponse {
    fn from(jobs: Vec<Job>) -> Self {
        let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
        Self {
            count: jobs.len(),
            jobs,
        }
    }
}

/// `?limit=` of list endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}
