//! Inference executor: runs generation off the event loop, serialized per
//! model, bounded by the configured timeout.

use crate::error::GatewayError;
use crate::registry::ModelEntry;
use actix_web::web;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct InferenceExecutor {
    timeout: Duration,
    calls: AtomicU64,
}

impl InferenceExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of times `infer` has been invoked. Lets callers (and tests)
    /// observe that probe requests never reach the executor.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Runs one generation pass against `entry`.
    ///
    /// The pass executes on the blocking pool holding the entry's model
    /// lock, so concurrent requests to the same model queue up while other
    /// models proceed. The timeout covers queueing, lock wait and the pass
    /// itself; an abandoned pass runs to completion on its blocking thread
    /// and its result is dropped.
    pub async fn infer(&self, entry: &ModelEntry, text: String) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let ready = entry
            .ready()
            .ok_or_else(|| GatewayError::NotReady(entry.id()))?;
        let generator = ready.generator();
        let params = entry.generation().clone();
        let task = entry.task();
        let seconds = self.timeout.as_secs();

        let pass = web::block(move || {
            let mut generator = generator
                .lock()
                .map_err(|_| anyhow::anyhow!("model lock poisoned by a previous failure"))?;
            generator.generate(&text, &params)
        });

        match tokio::time::timeout(self.timeout, pass).await {
            Err(_) => Err(GatewayError::Timeout { seconds }),
            // The blocking task was cancelled or panicked; either way the
            // fault stops here instead of unwinding the handler.
            Ok(Err(e)) => Err(GatewayError::Backend {
                task,
                detail: e.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(GatewayError::Backend {
                task,
                detail: format!("{e:#}"),
            }),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}
