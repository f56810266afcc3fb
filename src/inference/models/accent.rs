use anyhow::{bail, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use hf_hub::api::sync::Api;
use tracing::{debug, info};

use crate::inference::audio_pipeline::SpeechPipeline;
use crate::inference::models::model::ModelBase;
use crate::inference::task::classify::{AccentModel, ClassifierOutput, OutputItem};

/// Linear accent classifier over pooled speech embeddings.
#[derive(Clone)]
pub struct AccentHead {
    classifier: Linear,
    labels: Vec<String>,
}

impl AccentHead {
    #[tracing::instrument(level = "info", skip(api))]
    pub fn new(
        api: &Api,
        base: &ModelBase,
        weights_filename: &str,
        labels_filename: &str,
        embedding_size: usize,
    ) -> Result<Self> {
        let repo = api.repo(base.repo());
        let labels_path = repo.get(labels_filename)?;
        let weights_path = repo.get(weights_filename)?;

        let labels = parse_label_encoder(&std::fs::read_to_string(&labels_path)?)
            .with_context(|| format!("Invalid label file {}", labels_path.display()))?;
        let tensors = candle_core::safetensors::load(weights_path, &Device::Cpu)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let classifier = candle_nn::linear(embedding_size, labels.len(), vb.pp("classifier"))?;
        info!(
            "Loaded {} from {} with {} labels",
            base.name,
            base.repo_id,
            labels.len()
        );

        Ok(Self { classifier, labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn forward(&self, embedding: &Tensor) -> Result<Tensor> {
        Ok(self.classifier.forward(embedding)?)
    }
}

/// Parses a label encoder file made of `'label' => index` lines.
///
/// Everything after the `====` separator is encoder metadata and is ignored.
/// Indices must cover `0..n` exactly once.
pub fn parse_label_encoder(content: &str) -> Result<Vec<String>> {
    let mut indexed = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.starts_with("====") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let Some((label, index)) = line.split_once("=>") else {
            bail!("malformed line `{line}`")
        };
        let label = label.trim().trim_matches('\'').trim_matches('"');
        let index: usize = index
            .trim()
            .parse()
            .with_context(|| format!("bad index in line `{line}`"))?;
        indexed.push((index, label.to_string()));
    }
    if indexed.is_empty() {
        bail!("no labels found")
    }

    indexed.sort_by_key(|(index, _)| *index);
    for (expected, (index, label)) in indexed.iter().enumerate() {
        if *index != expected {
            bail!("label `{label}` has index {index}, expected {expected}")
        }
    }
    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}

/// Whisper encoder embeddings followed by a linear accent head.
#[derive(Clone)]
pub struct WhisperAccentModel {
    speech: SpeechPipeline,
    head: AccentHead,
}

impl WhisperAccentModel {
    pub fn new(speech: SpeechPipeline, head: AccentHead) -> Self {
        Self { speech, head }
    }
}

impl AccentModel for WhisperAccentModel {
    #[tracing::instrument(level = "info", skip_all)]
    fn classify_batch(&mut self, batch: &Tensor) -> Result<ClassifierOutput, Error> {
        let (batch_size, _) = batch.dims2()?;
        let mut logits = Vec::with_capacity(batch_size);
        for item in 0..batch_size {
            let pcm: Vec<f32> = batch.i(item)?.to_vec1()?;
            let embedding = self.speech.embed(&pcm)?;
            logits.push(self.head.forward(&embedding)?);
        }
        let scores = Tensor::cat(&logits, 0)?;
        debug!("accent scores: {:?}", scores.dims());

        let top_score = scores.max_keepdim(D::Minus1)?;
        let top_index = scores.argmax_keepdim(D::Minus1)?;
        Ok(ClassifierOutput::Sequence(vec![
            OutputItem::Scores(scores),
            OutputItem::TopScore(top_score),
            OutputItem::TopIndex(top_index),
            OutputItem::Labels(self.head.labels().to_vec()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_speechbrain_label_encoder() {
        let content = "'us' => 1\n'england' => 0\n'scotland' => 2\n================\n'starting_index' => 0\n";
        let labels = parse_label_encoder(content).unwrap();
        assert_eq!(labels, vec!["england", "us", "scotland"]);
    }

    #[test]
    fn rejects_gaps_and_garbage() {
        assert!(parse_label_encoder("'england' => 0\n'wales' => 2\n").is_err());
        assert!(parse_label_encoder("england 0\n").is_err());
        assert!(parse_label_encoder("'england' => zero\n").is_err());
        assert!(parse_label_encoder("\n================\n'starting_index' => 0").is_err());
    }

    #[test]
    fn head_maps_embeddings_to_label_scores() {
        let weight = Tensor::new(&[[1f32, 0.], [0., 1.], [1., 1.]], &Device::Cpu).unwrap();
        let bias = Tensor::new(&[0f32, 0., -1.], &Device::Cpu).unwrap();
        let head = AccentHead {
            classifier: Linear::new(weight, Some(bias)),
            labels: vec!["england".into(), "american".into(), "wales".into()],
        };

        let embedding = Tensor::new(&[[2f32, 3.]], &Device::Cpu).unwrap();
        let scores: Vec<Vec<f32>> = head.forward(&embedding).unwrap().to_vec2().unwrap();
        assert_eq!(scores, vec![vec![2., 3., 4.]]);
        assert_eq!(head.labels().len(), 3);
    }
}
