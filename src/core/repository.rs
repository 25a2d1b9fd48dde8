//! The narrow external collaborator interface the core consumes
//! (spec.md §6 "Repository contract"). Persistent storage schema and SQL
//! migration tooling are out of scope (spec.md §1); this trait exists so the
//! ingestor (C9) and gateway (C6) compile and are independently testable
//! against an in-process implementation, the way the teacher decouples
//! `core` from `storage` behind a narrow trait. The cache contract (spec.md
//! §6) has no caller anywhere in this spec's request path, so it isn't
//! modeled here — unlike the repository, nothing in spec.md §4 reads or
//! writes a cache.

use async_trait::async_trait;

use crate::core::types::RequestLog;

/// The slice of the repository contract the core actually calls: logging a
/// completed request and reading it back (spec.md §6). `WithTx` and the
/// `APIKeys`/`Users`/`Providers` surfaces belong to the excluded storage
/// and auth subsystems and are not modeled here.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn log(&self, record: RequestLog) -> Result<(), RepositoryError>;

    async fn get_recent(&self, limit: usize) -> Result<Vec<RequestLog>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
#[error("repository error: {0}")]
pub struct RepositoryError(pub String);

/// In-process implementation: an append-only, lock-protected vector. Good
/// enough for the ingestor to exercise per-record persistence and for
/// integration tests to assert on what was logged; a SQL-backed
/// implementation is explicitly out of scope (spec.md §1).
#[derive(Default)]
pub struct InProcessRequestRepository {
    records: parking_lot::Mutex<Vec<RequestLog>>,
}

impl InProcessRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RequestRepository for InProcessRequestRepository {
    async fn log(&self, record: RequestLog) -> Result<(), RepositoryError> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<RequestLog>, RepositoryError> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record(id: &str) -> RequestLog {
        RequestLog {
            id: id.to_string(),
            user_id: None,
            api_key_id: None,
            app_label: None,
            provider_id: "openai-main".to_string(),
            public_model_id: "openai/gpt-4o".to_string(),
            upstream_model_id: "gpt-4o".to_string(),
            finish_reason: "stop".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cached_tokens: 0,
            latency_ms: 120,
            ttft_ms: None,
            http_status: 200,
            cost_micros: 42,
            streamed: false,
            client_ip: None,
            user_agent: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn logs_persist_in_enqueue_order() {
        let repo = InProcessRequestRepository::new();
        repo.log(sample_record("a")).await.unwrap();
        repo.log(sample_record("b")).await.unwrap();
        let recent = repo.get_recent(10).await.unwrap();
        assert_eq!(recent.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
