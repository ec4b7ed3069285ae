// Backend seam: the gateway core only sees these two traits.
use crate::config::{GenerationParams, ModelConfig};

pub mod t5;

pub use t5::{HubModelSource, T5Generator};

/// A loaded model/tokenizer pair able to produce output text for input text.
///
/// Takes `&mut self`: a generation pass mutates decoder state, so a single
/// generator must never run two passes concurrently. The registry wraps each
/// generator in a mutex to enforce that.
pub trait TextGenerator: Send {
    fn generate(&mut self, text: &str, params: &GenerationParams) -> anyhow::Result<String>;
}

/// Resolves a backend reference to a loaded generator. Loading is slow and
/// fallible; the registry isolates failures per model.
pub trait ModelSource: Send + Sync {
    fn load(&self, config: &ModelConfig) -> anyhow::Result<Box<dyn TextGenerator>>;
}
