#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use anyhow::{bail, Error, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_transformers::models::whisper;
use candle_transformers::models::whisper::quantized_model::Whisper;
use candle_transformers::models::whisper::{
    audio, Config, EOT_TOKEN, LOGPROB_THRESHOLD, NO_SPEECH_THRESHOLD, NO_SPEECH_TOKENS,
    NO_TIMESTAMPS_TOKEN, SAMPLE_RATE, SOT_TOKEN, TEMPERATURES, TRANSCRIBE_TOKEN,
};
use candle_transformers::quantized_var_builder::VarBuilder;
use hf_hub::api::sync::ApiRepo;
use rand::distributions::Distribution;
use tokenizers::Tokenizer;
use tracing::{debug, error};

const LANGUAGE_TOKEN: &str = "<|en|>";

// Based on https://github.com/huggingface/candle/blob/main/candle-examples/examples/whisper/main.rs
#[derive(Clone)]
pub struct SpeechPipeline {
    model: Whisper,
    tokenizer: Tokenizer,
    config: Config,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    sot_token: u32,
    transcribe_token: u32,
    language_token: u32,
    eot_token: u32,
    no_speech_token: u32,
    no_timestamps_token: u32,
    seed: rand::rngs::StdRng,
}

impl SpeechPipeline {
    pub fn with_gguf_model(
        repo: &ApiRepo,
        config_filename: &str,
        tokenizer_filename: &str,
        gguf_filename: &str,
        mel_filters_filename: &str,
        seed: rand::rngs::StdRng,
    ) -> Result<Self> {
        let config_path = repo.get(config_filename)?;
        let tokenizer_path = repo.get(tokenizer_filename)?;
        let model_path = repo.get(gguf_filename)?;
        let mel_filters_path = repo.get(mel_filters_filename)?;

        let config: Config = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(Error::msg)?;

        let vb = VarBuilder::from_gguf(model_path, &Device::Cpu)?;
        let model = Whisper::load(&vb, config.clone())?;

        let mel_bytes = &*std::fs::read(mel_filters_path)?;
        let mut mel_filters = vec![0f32; mel_bytes.len() / 4];
        <byteorder::LittleEndian as byteorder::ByteOrder>::read_f32_into(
            mel_bytes,
            &mut mel_filters,
        );

        let suppress_tokens = suppress_mask(&model.config)?;
        let Some(no_speech_token) = NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| token_id(&tokenizer, token).ok())
        else {
            bail!("Unable to find any non-speech token")
        };

        Ok(Self {
            sot_token: token_id(&tokenizer, SOT_TOKEN)?,
            transcribe_token: token_id(&tokenizer, TRANSCRIBE_TOKEN)?,
            language_token: token_id(&tokenizer, LANGUAGE_TOKEN)?,
            eot_token: token_id(&tokenizer, EOT_TOKEN)?,
            no_timestamps_token: token_id(&tokenizer, NO_TIMESTAMPS_TOKEN)?,
            no_speech_token,
            model,
            tokenizer,
            config,
            mel_filters,
            suppress_tokens,
            seed,
        })
    }

    /// Width of the vectors returned by [`SpeechPipeline::embed`].
    pub fn embedding_size(&self) -> usize {
        self.config.d_model
    }

    /// Encodes the clip and mean-pools the encoder states into a `(1, d_model)` embedding.
    ///
    /// The encoder only sees 30 second windows, longer clips are encoded window by
    /// window and the pooled vectors averaged.
    pub fn embed(&mut self, pcm: &[f32]) -> Result<Tensor> {
        let pooled = mel_windows(&self.load_mel(pcm)?)?
            .iter()
            .map(|window| -> Result<Tensor> {
                Ok(self.model.encoder.forward(window, true)?.mean(1)?)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("pooled {} encoder windows", pooled.len());
        average_windows(&pooled)
    }

    /// Greedy English transcription, windows without speech are left out.
    pub fn transcribe(&mut self, pcm: &[f32]) -> Result<String> {
        let mut text = Vec::new();
        for (index, window) in mel_windows(&self.load_mel(pcm)?)?.iter().enumerate() {
            let decoded = self.decode_with_fallback(window)?;
            if decoded.is_silence() {
                debug!(window = index, "no speech detected, skipping");
                continue;
            }
            text.push(decoded.text.trim().to_string());
        }
        Ok(text.join(" "))
    }

    fn decode_with_fallback(&mut self, window: &Tensor) -> Result<Decoded> {
        let Some((&last, warmer)) = TEMPERATURES.split_last() else {
            bail!("no decoding temperatures configured")
        };
        for &temperature in warmer {
            match self.decode(window, temperature) {
                Ok(decoded) if decoded.is_confident() || decoded.is_probably_silent() => {
                    return Ok(decoded)
                }
                Ok(_) => debug!(temperature, "low confidence decode, retrying warmer"),
                Err(err) => error!("Decoding failed at temperature {temperature}: {err}"),
            }
        }
        self.decode(window, last)
    }

    fn decode(&mut self, window: &Tensor, temperature: f64) -> Result<Decoded> {
        let audio_features = self.model.encoder.forward(window, true)?;
        let max_tokens = self.config.max_target_positions;
        let mut tokens = vec![
            self.sot_token,
            self.language_token,
            self.transcribe_token,
            self.no_timestamps_token,
        ];
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for step in 0..max_tokens / 2 {
            let prompt = Tensor::new(tokens.as_slice(), window.device())?.unsqueeze(0)?;
            let hidden = self
                .model
                .decoder
                .forward(&prompt, &audio_features, step == 0)?;
            if step == 0 {
                let first = self.model.decoder.final_linear(&hidden.i(..1)?)?.i(0)?.i(0)?;
                no_speech_prob = token_probability(&first, self.no_speech_token)?;
            }

            let (_, seq_len, _) = hidden.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&hidden.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .broadcast_add(&self.suppress_tokens)?;
            let next = self.sample_token(&logits, temperature)?;
            tokens.push(next);
            if next == self.eot_token || tokens.len() > max_tokens {
                break;
            }
            sum_logprob += token_probability(&logits, next)?.ln();
        }

        Ok(Decoded {
            text: self.tokenizer.decode(&tokens, true).map_err(Error::msg)?,
            avg_logprob: sum_logprob / tokens.len() as f64,
            no_speech_prob,
        })
    }

    fn sample_token(&mut self, logits: &Tensor, temperature: f64) -> Result<u32> {
        if temperature > 0f64 {
            let weights: Vec<f32> = softmax(&(logits / temperature)?, 0)?.to_vec1()?;
            let distribution = rand::distributions::WeightedIndex::new(&weights)?;
            return Ok(u32::try_from(distribution.sample(&mut self.seed))?);
        }
        let logits: Vec<f32> = logits.to_vec1()?;
        Ok(logits
            .iter()
            .enumerate()
            .max_by(|(_, u), (_, v)| u.total_cmp(v))
            .map_or(self.eot_token, |(i, _)| i as u32))
    }

    fn load_mel(&self, pcm: &[f32]) -> Result<Tensor> {
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let mel_len = mel.len();
        let mel = Tensor::from_vec(
            mel,
            (
                1,
                self.config.num_mel_bins,
                mel_len / self.config.num_mel_bins,
            ),
            &Device::Cpu,
        )?;
        debug!(
            "loaded mel: {:?} from {:.1}s of audio",
            mel.dims(),
            pcm.len() as f64 / SAMPLE_RATE as f64
        );
        Ok(mel)
    }
}

#[derive(Debug)]
struct Decoded {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

impl Decoded {
    fn is_probably_silent(&self) -> bool {
        self.no_speech_prob > NO_SPEECH_THRESHOLD
    }

    fn is_silence(&self) -> bool {
        self.is_probably_silent() && self.avg_logprob < LOGPROB_THRESHOLD
    }

    fn is_confident(&self) -> bool {
        self.avg_logprob >= LOGPROB_THRESHOLD
    }
}

/// Splits a `(1, mels, frames)` spectrogram into encoder sized windows.
fn mel_windows(mel: &Tensor) -> Result<Vec<Tensor>> {
    let (_, _, frames) = mel.dims3()?;
    let mut windows = Vec::with_capacity(frames.div_ceil(whisper::N_FRAMES));
    let mut seek = 0;
    while seek < frames {
        let size = usize::min(frames - seek, whisper::N_FRAMES);
        windows.push(mel.narrow(2, seek, size)?);
        seek += size;
    }
    Ok(windows)
}

/// Averages `(1, d_model)` window embeddings into one.
fn average_windows(pooled: &[Tensor]) -> Result<Tensor> {
    if pooled.is_empty() {
        bail!("audio is empty")
    }
    Ok(Tensor::cat(pooled, 0)?.mean_keepdim(0)?)
}

/// Additive mask that rules out the tokens the model config suppresses.
fn suppress_mask(config: &Config) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|id| {
            if config.suppress_tokens.contains(&id) {
                f32::NEG_INFINITY
            } else {
                0f32
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), &Device::Cpu)?)
}

fn token_probability(logits: &Tensor, token: u32) -> Result<f64> {
    let probability = softmax(logits, D::Minus1)?
        .i(token as usize)?
        .to_scalar::<f32>()?;
    Ok(f64::from(probability))
}

pub fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow::anyhow!("no token-id for {token}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mel(frames: usize) -> Tensor {
        Tensor::zeros((1, 2, frames), candle_core::DType::F32, &Device::Cpu).unwrap()
    }

    fn window_sizes(frames: usize) -> Vec<usize> {
        mel_windows(&mel(frames))
            .unwrap()
            .iter()
            .map(|window| window.dims3().unwrap().2)
            .collect()
    }

    #[test]
    fn empty_spectrogram_has_no_windows() {
        assert!(window_sizes(0).is_empty());
    }

    #[test]
    fn windows_are_capped_at_the_encoder_size() {
        assert_eq!(window_sizes(10), vec![10]);
        assert_eq!(window_sizes(whisper::N_FRAMES), vec![whisper::N_FRAMES]);
        assert_eq!(window_sizes(whisper::N_FRAMES + 1), vec![whisper::N_FRAMES, 1]);
        assert_eq!(
            window_sizes(2 * whisper::N_FRAMES + 7),
            vec![whisper::N_FRAMES, whisper::N_FRAMES, 7]
        );
    }

    #[test]
    fn windows_keep_batch_and_mel_dimensions() {
        let windows = mel_windows(&mel(whisper::N_FRAMES + 1)).unwrap();
        assert_eq!(windows[1].dims(), &[1, 2, 1]);
    }

    #[test]
    fn window_embeddings_are_averaged() {
        let first = Tensor::new(&[[1f32, 2., 3.]], &Device::Cpu).unwrap();
        let second = Tensor::new(&[[3f32, 4., 5.]], &Device::Cpu).unwrap();
        let averaged = average_windows(&[first.clone(), second]).unwrap();
        assert_eq!(averaged.to_vec2::<f32>().unwrap(), vec![vec![2., 3., 4.]]);

        let single = average_windows(&[first]).unwrap();
        assert_eq!(single.to_vec2::<f32>().unwrap(), vec![vec![1., 2., 3.]]);
    }

    #[test]
    fn empty_audio_has_no_embedding() {
        assert!(average_windows(&[]).is_err());
    }

    #[test]
    fn suppressed_tokens_are_masked_out() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "num_mel_bins": 80,
            "max_source_positions": 1500,
            "d_model": 384,
            "encoder_attention_heads": 6,
            "encoder_layers": 4,
            "vocab_size": 6,
            "max_target_positions": 448,
            "decoder_attention_heads": 6,
            "decoder_layers": 4,
            "suppress_tokens": [1, 4]
        }))
        .unwrap();

        let mask: Vec<f32> = suppress_mask(&config).unwrap().to_vec1().unwrap();
        assert_eq!(mask.len(), 6);
        for (id, value) in mask.iter().enumerate() {
            if id == 1 || id == 4 {
                assert_eq!(*value, f32::NEG_INFINITY, "token {id}");
            } else {
                assert_eq!(*value, 0.0, "token {id}");
            }
        }
    }
}
