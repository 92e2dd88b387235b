use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::client::CompletionClient;
use super::prompt::build_prompt;
use super::types::{ClassificationRequest, ClassificationResult, CANCELLED};
use crate::config::ClassifierConfig;

/// Shared flag that stops dispatch at the next batch boundary
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: usize,
    pub delays: usize,
    /// Requests actually sent to the client
    pub requests_sent: usize,
}

/// Sends requests in fixed-size concurrent batches with a pause between batches
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    batch_size: usize,
    delay: Duration,
    timeout: Duration,
    default_classification: String,
    cancellation: CancellationHandle,
}

impl BatchDispatcher {
    pub fn new(batch_size: usize, delay: Duration, timeout: Duration, default_classification: impl Into<String>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
            timeout,
            default_classification: default_classification.into(),
            cancellation: CancellationHandle::new(),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.batch_size,
            config.batch_delay(),
            config.request_timeout(),
            config.default_classification_on_error.clone(),
        )
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Classify every request, returning exactly one result per request in request order
    pub async fn dispatch<C: CompletionClient>(
        &self,
        client: &C,
        requests: &[ClassificationRequest],
    ) -> (Vec<ClassificationResult>, DispatchStats) {
        let mut results = Vec::with_capacity(requests.len());
        let mut stats = DispatchStats::default();
        let total_batches = requests.len().div_ceil(self.batch_size);

        for (index, batch) in requests.chunks(self.batch_size).enumerate() {
            if self.cancellation.is_cancelled() {
                warn!(batch = index + 1, "Dispatch cancelled, skipping remaining requests");
                break;
            }

            if index > 0 && !self.delay.is_zero() {
                debug!(delay_ms = self.delay.as_millis() as u64, "Waiting between batches");
                tokio::time::sleep(self.delay).await;
                stats.delays += 1;
            }

            info!(batch = index + 1, total = total_batches, size = batch.len(), "Processing batch");

            let batch_results = join_all(batch.iter().map(|request| self.classify_one(client, request))).await;
            results.extend(batch_results);
            stats.batches += 1;
            stats.requests_sent += batch.len();
        }

        // Anything not dispatched still gets a result
        for request in &requests[results.len()..] {
            results.push(ClassificationResult::failure(
                request.identifier.as_str(),
                self.default_classification.as_str(),
                CANCELLED,
            ));
        }

        info!(
            results = results.len(),
            batches = stats.batches,
            "Completed classification requests"
        );

        (results, stats)
    }

    async fn classify_one<C: CompletionClient>(&self, client: &C, request: &ClassificationRequest) -> ClassificationResult {
        let prompt = build_prompt(request);
        debug!(identifier = %request.identifier, "Sending classification request");

        let call = tokio::time::timeout(self.timeout, client.complete(&prompt));
        let outcome = AssertUnwindSafe(call).catch_unwind().await;

        let failure = |message: String| {
            error!(identifier = %request.identifier, error = %message, "Classification failed");
            ClassificationResult::failure(
                request.identifier.as_str(),
                self.default_classification.as_str(),
                message,
            )
        };

        match outcome {
            Ok(Ok(Ok(text))) => {
                debug!(identifier = %request.identifier, classification = %text, "Classified");
                ClassificationResult::success(request.identifier.as_str(), text)
            }
            Ok(Ok(Err(e))) => failure(format!("API error: {}", e)),
            Ok(Err(_)) => failure(format!("Request timed out after {}s", self.timeout.as_secs_f64())),
            Err(panic) => failure(format!("Request panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
