// Shared state handed to every request handler
use crate::executor::InferenceExecutor;
use crate::logsink::RequestLog;
use crate::registry::ModelRegistry;
use std::sync::Arc;

pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub executor: InferenceExecutor,
    pub request_log: Option<RequestLog>,
}
