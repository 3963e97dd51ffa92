//! Bounded-concurrency embedding of a batch of chunk texts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Classify, ErrorClass};
use crate::services::embedding::EmbeddingProvider;

/// One chunk text to embed, tagged with its job id.
#[derive(Debug, Clone)]
pub struct EmbedTask {
    pub job_id: Uuid,
    pub text: String,
}

/// A classified embedding failure, detached from the concrete error type so
/// outcomes can be carried across the pipeline.
#[derive(Debug, Clone)]
pub struct EmbedFailure {
    pub class: ErrorClass,
    pub message: String,
}

/// Per-job embedding outcome; order matches the submitted batch.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub job_id: Uuid,
    pub result: Result<Vec<f32>, EmbedFailure>,
}

/// Runs provider calls for a batch concurrently, bounded by a semaphore so a
/// large document cannot exhaust provider rate limits or starve the runtime.
/// Failure of one text never aborts the others, and every call carries a
/// timeout that classifies as transient on expiry.
pub struct EmbeddingOrchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    limit: Arc<Semaphore>,
    call_timeout: Duration,
}

impl EmbeddingOrchestrator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        concurrency_limit: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            limit: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            call_timeout,
        }
    }

    /// Embed every task, at most `concurrency_limit` provider calls in
    /// flight at once. Total latency for N tasks is bounded by
    /// `ceil(N / limit)` provider round-trips.
    pub async fn run(&self, tasks: Vec<EmbedTask>) -> Vec<EmbedOutcome> {
        let futures = tasks.into_iter().map(|task| {
            let provider = self.provider.clone();
            let limit = self.limit.clone();
            let call_timeout = self.call_timeout;

            async move {
                let permit = match limit.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return EmbedOutcome {
                            job_id: task.job_id,
                            result: Err(EmbedFailure {
                                class: ErrorClass::Transient,
                                message: "orchestrator shutting down".to_string(),
                            }),
                        };
                    }
                };

                let result =
                    match tokio::time::timeout(call_timeout, provider.embed(&task.text)).await {
                        Ok(Ok(vector)) => Ok(vector),
                        Ok(Err(e)) => Err(EmbedFailure {
                            class: e.class(),
                            message: e.to_string(),
                        }),
                        Err(_) => Err(EmbedFailure {
                            class: ErrorClass::Transient,
                            message: format!(
                                "provider call exceeded {}ms",
                                call_timeout.as_millis()
                            ),
                        }),
                    };

                drop(permit);
                debug!(job_id = %task.job_id, ok = result.is_ok(), "embedding call finished");

                EmbedOutcome {
                    job_id: task.job_id,
                    result,
                }
            }
        });

        join_all(futures).await
    }
}
