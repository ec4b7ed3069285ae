// T5 conditional generation backend
use crate::config::{GenerationParams, ModelConfig};
use crate::models::{ModelSource, TextGenerator};
use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::t5;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;

// Fixed seed keeps greedy decoding deterministic across identical requests.
const GENERATION_SEED: u64 = 42;

/// Resolves backend references against the Hugging Face hub and loads them
/// as T5 conditional-generation models on the given device.
pub struct HubModelSource {
    device: Device,
}

impl HubModelSource {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl ModelSource for HubModelSource {
    fn load(&self, config: &ModelConfig) -> anyhow::Result<Box<dyn TextGenerator>> {
        let generator = T5Generator::load_from_hub(
            &config.backend_ref,
            config.revision.as_deref(),
            config.prompt_prefix.clone(),
            self.device.clone(),
        )?;
        Ok(Box::new(generator))
    }
}

pub struct T5Generator {
    model: t5::T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    config: t5::Config,
    device: Device,
    prompt_prefix: Option<String>,
}

impl T5Generator {
    pub fn load_from_hub(
        model_id: &str,
        revision: Option<&str>,
        prompt_prefix: Option<String>,
        device: Device,
    ) -> anyhow::Result<Self> {
        let api = ApiBuilder::new()
            .with_token(std::env::var("HF_TOKEN").ok())
            .build()?;
        let revision = revision.unwrap_or("main");
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        let config_filename = repo.get("config.json")?;
        let tokenizer_filename = repo.get("tokenizer.json")?;
        let weights_filename = repo.get("model.safetensors")?;

        let mut config: t5::Config = serde_json::from_slice(&std::fs::read(config_filename)?)?;
        // One cache-free decode path serves both greedy and beam search, and
        // the generator carries no state between requests.
        config.use_cache = false;

        let tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(anyhow::Error::msg)?;

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)? };
        let model = t5::T5ForConditionalGeneration::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
            prompt_prefix,
        })
    }

    fn decoder_start_id(&self) -> u32 {
        self.config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32
    }

    fn greedy(
        &mut self,
        encoder_output: &Tensor,
        params: &GenerationParams,
    ) -> anyhow::Result<Vec<u32>> {
        let eos_id = self.config.eos_token_id as u32;
        let mut logits_processor = LogitsProcessor::new(GENERATION_SEED, None, None);
        let mut tokens = vec![self.decoder_start_id()];

        for _ in 0..params.max_new_tokens {
            let decoder_ids = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits =
                last_position(self.model.decode(&decoder_ids, encoder_output)?.squeeze(0)?)?;
            let next = logits_processor.sample(&logits)?;
            if next == eos_id {
                break;
            }
            tokens.push(next);
        }
        Ok(tokens[1..].to_vec())
    }

    fn beam_search(
        &mut self,
        encoder_output: &Tensor,
        params: &GenerationParams,
    ) -> anyhow::Result<Vec<u32>> {
        let eos_id = self.config.eos_token_id as u32;
        let width = params.num_beams;
        let mut beams = vec![Beam {
            tokens: vec![self.decoder_start_id()],
            sum_logprob: 0.0,
            finished: false,
        }];

        for step in 0..params.max_new_tokens {
            let mut candidates: Vec<Beam> = Vec::with_capacity(width * width);
            for beam in &beams {
                if beam.finished {
                    candidates.push(beam.clone());
                    continue;
                }
                let decoder_ids =
                    Tensor::new(beam.tokens.as_slice(), &self.device)?.unsqueeze(0)?;
                let logits =
                    last_position(self.model.decode(&decoder_ids, encoder_output)?.squeeze(0)?)?;
                let mut logprobs = log_softmax(&logits.to_vec1::<f32>()?);
                if step < params.min_new_tokens {
                    if let Some(lp) = logprobs.get_mut(eos_id as usize) {
                        *lp = f32::NEG_INFINITY;
                    }
                }
                for (token, logprob) in top_k(&logprobs, width) {
                    let mut tokens = beam.tokens.clone();
                    tokens.push(token);
                    candidates.push(Beam {
                        finished: token == eos_id,
                        sum_logprob: beam.sum_logprob + logprob,
                        tokens,
                    });
                }
            }
            candidates.sort_by(|a, b| {
                b.score(params.length_penalty)
                    .total_cmp(&a.score(params.length_penalty))
            });
            candidates.truncate(width);
            beams = candidates;

            let all_finished = beams.iter().all(|b| b.finished);
            // With early stopping the search ends as soon as the best beam
            // terminates; otherwise it runs until every beam has.
            let best_finished =
                params.early_stopping && beams.first().is_some_and(|b| b.finished);
            if all_finished || best_finished {
                break;
            }
        }

        let best = beams
            .into_iter()
            .max_by(|a, b| {
                a.score(params.length_penalty)
                    .total_cmp(&b.score(params.length_penalty))
            })
            .ok_or_else(|| anyhow::anyhow!("beam search produced no candidates"))?;

        let mut tokens = best.tokens;
        tokens.remove(0);
        if tokens.last() == Some(&eos_id) {
            tokens.pop();
        }
        Ok(tokens)
    }
}

impl TextGenerator for T5Generator {
    fn generate(&mut self, text: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let prompt = match &self.prompt_prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };
        let mut tokens = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        let eos_id = self.config.eos_token_id as u32;
        if tokens.len() > params.max_input_tokens {
            // Truncation keeps the terminal token the encoder expects.
            tokens.truncate(params.max_input_tokens.saturating_sub(1));
            tokens.push(eos_id);
        }

        let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_output = self.model.encode(&input)?;

        let output_ids = if params.num_beams > 1 {
            self.beam_search(&encoder_output, params)?
        } else {
            self.greedy(&encoder_output, params)?
        };

        let output = self
            .tokenizer
            .decode(&output_ids, true)
            .map_err(anyhow::Error::msg)?;
        Ok(output.trim().to_string())
    }
}

#[derive(Clone)]
struct Beam {
    tokens: Vec<u32>,
    sum_logprob: f32,
    finished: bool,
}

impl Beam {
    fn generated_len(&self) -> usize {
        // The decoder start token does not count toward output length.
        self.tokens.len().saturating_sub(1)
    }

    fn score(&self, length_penalty: f32) -> f32 {
        let len = self.generated_len().max(1) as f32;
        self.sum_logprob / len.powf(length_penalty)
    }
}

// The next-token distribution comes from the final decoder position; with
// the batch dim squeezed the logits may still carry a sequence dim.
fn last_position(logits: Tensor) -> candle::Result<Tensor> {
    if logits.rank() > 1 {
        logits.get(logits.dim(0)? - 1)
    } else {
        Ok(logits)
    }
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
    let log_sum = sum.ln();
    logits.iter().map(|&x| x - max - log_sum).collect()
}

fn top_k(logprobs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = logprobs
        .iter()
        .enumerate()
        .map(|(i, &lp)| (i as u32, lp))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn top_k_returns_best_first() {
        let picks = top_k(&[0.1, 0.9, 0.5, 0.7], 2);
        assert_eq!(picks[0].0, 1);
        assert_eq!(picks[1].0, 3);
    }

    #[test]
    fn length_penalty_favors_longer_beams() {
        let short = Beam {
            tokens: vec![0, 1, 2],
            sum_logprob: -4.0,
            finished: true,
        };
        let long = Beam {
            tokens: vec![0, 1, 2, 3, 4, 5],
            sum_logprob: -10.0,
            finished: true,
        };
        // Equal per-token likelihood: the penalty should prefer the longer one.
        assert!(long.score(2.0) > short.score(2.0));
    }
}
