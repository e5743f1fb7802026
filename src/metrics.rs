//! Ingestion counters.
//!
//! The pipeline reports what happened through this trait; deployments
//! decide where the numbers go. Default method bodies are no-ops so an
//! implementation only overrides the counters it cares about.

use crate::plugin::ExtractFailureKind;
use crate::policy::FetchStatus;
use crate::validate::Disposition;

pub trait IngestMetrics: Send + Sync {
    fn record_fetch(&self, source_id: &str, status: FetchStatus, duration_ms: u64) {
        let _ = (source_id, status, duration_ms);
    }

    fn record_extract_failure(&self, source_id: &str, kind: ExtractFailureKind) {
        let _ = (source_id, kind);
    }

    fn record_disposition(&self, source_id: &str, disposition: &Disposition) {
        let _ = (source_id, disposition);
    }

    fn record_run(&self, source_id: &str, upserted: usize, dropped: usize, quarantined: usize) {
        let _ = (source_id, upserted, dropped, quarantined);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl IngestMetrics for NullMetrics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_metrics_accepts_everything() {
        let metrics = NullMetrics;
        metrics.record_fetch("src", FetchStatus::Ok, 120);
        metrics.record_extract_failure("src", ExtractFailureKind::EmptyPage);
        metrics.record_disposition("src", &Disposition::Ok);
        metrics.record_run("src", 3, 1, 0);
    }
}
