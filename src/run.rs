//! Run context and the observed-at dedup guard.
//!
//! The persistence layer dedups offers on `(source product, observed_at)`.
//! A run may be retried by the external dispatcher, and every attempt gets a
//! fresh wall clock — so offers are always stamped with the run's
//! `run_observed_at`, fixed once at run creation. Two attempts of the same
//! run then produce identical dedup tuples and collapse to one row, while
//! `attempt_started_at` still records when each attempt actually ran.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-run state threaded through fetch, normalize, and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub run_id: String,
    pub source_id: String,
    pub retailer_id: String,
    /// Fixed at run creation; identical across retry attempts.
    pub run_observed_at: DateTime<Utc>,
    /// Version of the adapter producing offers under this run. Stamped from
    /// the plugin manifest by the pipeline.
    pub adapter_version: String,
    /// 1-based attempt counter, incremented by the dispatcher on retry.
    pub attempt: u32,
    /// Wall clock of this attempt, for operational tracking only.
    pub attempt_started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        source_id: impl Into<String>,
        retailer_id: impl Into<String>,
        run_observed_at: DateTime<Utc>,
    ) -> Self {
        RunContext {
            run_id: run_id.into(),
            source_id: source_id.into(),
            retailer_id: retailer_id.into(),
            run_observed_at,
            adapter_version: String::new(),
            attempt: 1,
            attempt_started_at: Utc::now(),
        }
    }

    /// The context for a retry of the same logical run: attempt counter and
    /// attempt clock move, `run_observed_at` does not.
    pub fn next_attempt(&self) -> Self {
        RunContext {
            attempt: self.attempt + 1,
            attempt_started_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_adapter_version(mut self, version: &str) -> Self {
        self.adapter_version = version.to_string();
        self
    }
}
