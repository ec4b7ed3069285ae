// Gateway configuration: model table, generation bounds, server settings
use crate::registry::ModelId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Decoding parameters for one model. All bounds are configuration-driven;
/// the handlers never hardcode a length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Input token ids are truncated to this length before encoding.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    /// The end-of-sequence token is suppressed until this many tokens exist.
    #[serde(default)]
    pub min_new_tokens: usize,
    /// 1 selects greedy decoding, anything above it beam search.
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    /// Beam scores are divided by len^length_penalty; values above 1.0
    /// favor longer outputs.
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    /// Stop decoding once every beam has produced an end-of-sequence token.
    #[serde(default)]
    pub early_stopping: bool,
}

fn default_max_input_tokens() -> usize {
    512
}

fn default_max_new_tokens() -> usize {
    256
}

fn default_num_beams() -> usize {
    1
}

fn default_length_penalty() -> f32 {
    1.0
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::translation()
    }
}

impl GenerationParams {
    /// Greedy decoding with no minimum output length.
    pub fn translation() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            max_new_tokens: default_max_new_tokens(),
            min_new_tokens: 0,
            num_beams: 1,
            length_penalty: default_length_penalty(),
            early_stopping: false,
        }
    }

    /// Reference summarization settings: 1024-token input truncation,
    /// 4 beams, output bounded to 30..150 tokens, length penalty 2.0.
    pub fn summarization() -> Self {
        Self {
            max_input_tokens: 1024,
            max_new_tokens: 150,
            min_new_tokens: 30,
            num_beams: 4,
            length_penalty: 2.0,
            early_stopping: true,
        }
    }
}

/// One entry of the model table. `backend_ref` names the pretrained
/// checkpoint understood by the model source and never changes after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: ModelId,
    pub backend_ref: String,
    #[serde(default)]
    pub revision: Option<String>,
    /// Task prefix prepended to every input, e.g. "summarize: ".
    #[serde(default)]
    pub prompt_prefix: Option<String>,
    #[serde(default)]
    pub generation: GenerationParams,
}

/// What to do when some models fail to load at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Refuse to start unless every configured model is ready.
    #[default]
    RequireAll,
    /// Start serving whatever subset loaded; /health reports the gap.
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_allowed_origin")]
    pub cors_allowed_origin: Option<String>,
    /// Upper bound on a single inference call, queueing included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub startup_policy: StartupPolicy,
    /// CSV file receiving one row per served request; disabled when unset.
    #[serde(default)]
    pub request_log_path: Option<PathBuf>,
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_allowed_origin() -> Option<String> {
    Some("http://localhost:3000".to_string())
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            id: ModelId::Ar2en,
            backend_ref: "google/flan-t5-base".to_string(),
            revision: None,
            prompt_prefix: Some("translate Arabic to English: ".to_string()),
            generation: GenerationParams::translation(),
        },
        ModelConfig {
            id: ModelId::En2ar,
            backend_ref: "google/flan-t5-base".to_string(),
            revision: None,
            prompt_prefix: Some("translate English to Arabic: ".to_string()),
            generation: GenerationParams::translation(),
        },
        ModelConfig {
            id: ModelId::Summarize,
            backend_ref: "google/flan-t5-base".to_string(),
            revision: None,
            prompt_prefix: Some("summarize: ".to_string()),
            generation: GenerationParams::summarization(),
        },
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origin: default_cors_allowed_origin(),
            request_timeout_secs: default_request_timeout_secs(),
            startup_policy: StartupPolicy::default(),
            request_log_path: None,
            models: default_models(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.models.is_empty() {
            anyhow::bail!("at least one model must be configured");
        }
        for (i, model) in self.models.iter().enumerate() {
            if self.models[..i].iter().any(|m| m.id == model.id) {
                anyhow::bail!("duplicate model id: {}", model.id);
            }
            let gen = &model.generation;
            if gen.max_input_tokens == 0 || gen.max_new_tokens == 0 || gen.num_beams == 0 {
                anyhow::bail!("{}: token bounds and beam count must be non-zero", model.id);
            }
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.len(), 3);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.startup_policy, StartupPolicy::RequireAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_model_config_fills_generation_defaults() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"models": [{"id": "summarize", "backend_ref": "google/flan-t5-base"}]}"#,
        )
        .unwrap();
        assert_eq!(config.models[0].generation.num_beams, 1);
        assert_eq!(config.models[0].generation.max_input_tokens, 512);
    }

    #[test]
    fn duplicate_model_ids_rejected() {
        let mut config = GatewayConfig::default();
        let dup = config.models[0].clone();
        config.models.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = GatewayConfig {
            request_timeout_secs: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
