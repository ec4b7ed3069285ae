//! Model registry: the fixed table of model/tokenizer pairs this gateway
//! serves, their load lifecycle, and the lookups the router and health
//! endpoint run against.

use crate::config::{GenerationParams, ModelConfig};
use crate::models::{ModelSource, TextGenerator};
use log::{error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Closed set of model identifiers. Adding a deployment model means adding a
/// variant here, which forces every dispatch site to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Ar2en,
    En2ar,
    Summarize,
}

impl ModelId {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::Ar2en => "ar2en",
            ModelId::En2ar => "en2ar",
            ModelId::Summarize => "summarize",
        }
    }

    pub fn task(self) -> Task {
        match self {
            ModelId::Ar2en | ModelId::En2ar => Task::Translation,
            ModelId::Summarize => Task::Summarization,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownModelId;

impl fmt::Display for UnknownModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown model id")
    }
}

impl std::error::Error for UnknownModelId {}

impl FromStr for ModelId {
    type Err = UnknownModelId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ar2en" => Ok(ModelId::Ar2en),
            "en2ar" => Ok(ModelId::En2ar),
            "summarize" => Ok(ModelId::Summarize),
            _ => Err(UnknownModelId),
        }
    }
}

/// Task kind of a model. The `Debug` form doubles as the label in
/// user-facing error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Translation,
    Summarization,
}

/// A loaded model/tokenizer pair. The generator sits behind a mutex because
/// a generation pass mutates decoder state; requests against the same model
/// are serialized on this lock while other models stay untouched.
pub struct ReadyModel {
    generator: Arc<Mutex<Box<dyn TextGenerator>>>,
    pub load_time: Duration,
}

impl ReadyModel {
    pub fn generator(&self) -> Arc<Mutex<Box<dyn TextGenerator>>> {
        Arc::clone(&self.generator)
    }
}

/// Load lifecycle of one model. The generator handle exists only in `Ready`
/// and the error detail only in `Failed`; an entry moves
/// `Unloaded -> Loading -> {Ready | Failed}` once, during startup.
pub enum ModelState {
    Unloaded,
    Loading,
    Ready(ReadyModel),
    Failed(String),
}

impl ModelState {
    pub fn load_error(&self) -> Option<&str> {
        match self {
            ModelState::Failed(detail) => Some(detail),
            _ => None,
        }
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Unloaded => f.write_str("Unloaded"),
            ModelState::Loading => f.write_str("Loading"),
            ModelState::Ready(_) => f.write_str("Ready"),
            ModelState::Failed(detail) => write!(f, "Failed({detail})"),
        }
    }
}

pub struct ModelEntry {
    config: ModelConfig,
    state: ModelState,
}

impl ModelEntry {
    pub fn id(&self) -> ModelId {
        self.config.id
    }

    pub fn task(&self) -> Task {
        self.config.id.task()
    }

    pub fn backend_ref(&self) -> &str {
        &self.config.backend_ref
    }

    pub fn generation(&self) -> &GenerationParams {
        &self.config.generation
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn ready(&self) -> Option<&ReadyModel> {
        match &self.state {
            ModelState::Ready(model) => Some(model),
            _ => None,
        }
    }

    fn load(&mut self, source: &dyn ModelSource) {
        self.state = ModelState::Loading;
        info!("Loading {} model and tokenizer...", self.id());
        let started = Instant::now();
        match source.load(&self.config) {
            Ok(generator) => {
                let load_time = started.elapsed();
                info!(
                    "{} model loaded successfully in {:.2} seconds",
                    self.id(),
                    load_time.as_secs_f64()
                );
                self.state = ModelState::Ready(ReadyModel {
                    generator: Arc::new(Mutex::new(generator)),
                    load_time,
                });
            }
            Err(e) => {
                error!("Error loading {} model: {e:#}", self.id());
                self.state = ModelState::Failed(format!("{e:#}"));
            }
        }
    }
}

/// Result of `load_all`, returned so the caller decides the startup policy
/// (refuse to start vs. degraded mode) instead of the loader.
#[derive(Debug)]
pub struct LoadSummary {
    pub total: usize,
    pub ready: usize,
    pub failed: Vec<(ModelId, String)>,
}

impl LoadSummary {
    pub fn all_ready(&self) -> bool {
        self.ready == self.total
    }
}

/// Table of model entries in configuration order. Written only by
/// `load_all` before the server accepts connections; afterwards shared
/// read-only across all request handlers.
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn from_configs(configs: &[ModelConfig]) -> Self {
        let entries = configs
            .iter()
            .map(|config| ModelEntry {
                config: config.clone(),
                state: ModelState::Unloaded,
            })
            .collect();
        Self { entries }
    }

    /// Loads every configured model. Failures are captured per model and
    /// never abort the remaining loads; entries load in parallel since they
    /// share no mutable state.
    pub fn load_all(&mut self, source: &dyn ModelSource) -> LoadSummary {
        self.entries
            .par_iter_mut()
            .for_each(|entry| entry.load(source));

        let failed = self
            .entries
            .iter()
            .filter_map(|e| e.state.load_error().map(|err| (e.id(), err.to_string())))
            .collect();
        LoadSummary {
            total: self.entries.len(),
            ready: self.entries.iter().filter(|e| e.is_ready()).count(),
            failed,
        }
    }

    pub fn get(&self, id: ModelId) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Registered model ids whose task is translation, in configuration
    /// order. Used to enumerate valid directions in client errors.
    pub fn translation_directions(&self) -> Vec<ModelId> {
        self.entries
            .iter()
            .filter(|e| e.task() == Task::Translation)
            .map(|e| e.id())
            .collect()
    }

    pub fn not_ready(&self) -> Vec<ModelId> {
        self.entries
            .iter()
            .filter(|e| !e.is_ready())
            .map(|e| e.id())
            .collect()
    }

    pub fn all_ready(&self) -> bool {
        self.entries.iter().all(|e| e.is_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    struct StubGenerator;

    impl TextGenerator for StubGenerator {
        fn generate(&mut self, text: &str, _params: &GenerationParams) -> anyhow::Result<String> {
            Ok(text.to_string())
        }
    }

    struct StubSource {
        fail: Option<ModelId>,
    }

    impl ModelSource for StubSource {
        fn load(&self, config: &ModelConfig) -> anyhow::Result<Box<dyn TextGenerator>> {
            if self.fail == Some(config.id) {
                anyhow::bail!("checkpoint {} is unavailable", config.backend_ref);
            }
            Ok(Box::new(StubGenerator))
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::from_configs(&GatewayConfig::default().models)
    }

    #[test]
    fn entries_start_unloaded() {
        let registry = registry();
        for id in [ModelId::Ar2en, ModelId::En2ar, ModelId::Summarize] {
            let entry = registry.get(id).unwrap();
            assert!(matches!(entry.state(), ModelState::Unloaded));
            assert!(entry.ready().is_none());
        }
    }

    #[test]
    fn load_all_marks_every_entry_ready() {
        let mut registry = registry();
        let summary = registry.load_all(&StubSource { fail: None });
        assert!(summary.all_ready());
        assert_eq!(summary.ready, 3);
        assert!(registry.all_ready());
        assert!(registry.not_ready().is_empty());
    }

    #[test]
    fn one_failure_does_not_abort_the_others() {
        let mut registry = registry();
        let summary = registry.load_all(&StubSource {
            fail: Some(ModelId::En2ar),
        });
        assert!(!summary.all_ready());
        assert_eq!(summary.ready, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, ModelId::En2ar);
        assert!(summary.failed[0].1.contains("unavailable"));

        assert!(registry.get(ModelId::Ar2en).unwrap().is_ready());
        assert!(registry.get(ModelId::Summarize).unwrap().is_ready());
        let failed = registry.get(ModelId::En2ar).unwrap();
        assert!(!failed.is_ready());
        assert!(failed.state().load_error().is_some());
        assert_eq!(registry.not_ready(), vec![ModelId::En2ar]);
    }

    #[test]
    fn handle_exists_iff_ready() {
        let mut registry = registry();
        registry.load_all(&StubSource {
            fail: Some(ModelId::Summarize),
        });
        for id in [ModelId::Ar2en, ModelId::En2ar, ModelId::Summarize] {
            let entry = registry.get(id).unwrap();
            assert_eq!(entry.ready().is_some(), entry.is_ready());
            assert_eq!(entry.state().load_error().is_some(), !entry.is_ready());
        }
    }

    #[test]
    fn translation_directions_exclude_summarization() {
        let registry = registry();
        assert_eq!(
            registry.translation_directions(),
            vec![ModelId::Ar2en, ModelId::En2ar]
        );
    }

    #[test]
    fn model_id_round_trips_through_wire_name() {
        for id in [ModelId::Ar2en, ModelId::En2ar, ModelId::Summarize] {
            assert_eq!(id.as_str().parse::<ModelId>().unwrap(), id);
        }
        assert!("fr2en".parse::<ModelId>().is_err());
    }
}
