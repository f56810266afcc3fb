use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use tracing::{debug, info};

use crate::inference::pcm_decode::{pcm_decode, Waveform};
use crate::inference::task::classify::{AccentModel, ClassifierOutput, OutputItem};
use crate::pipeline::assets::AudioAsset;
use crate::pipeline::error::ClassificationError;
use crate::pipeline::extract::TARGET_SAMPLE_RATE;

/// Labels and their probabilities as emitted by the classifier, before any filtering.
///
/// Never empty, and both sequences always have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    labels: Vec<String>,
    probabilities: Vec<f32>,
}

impl ClassificationResult {
    pub fn new(labels: Vec<String>, probabilities: Vec<f32>) -> Result<Self, ClassificationError> {
        if labels.len() != probabilities.len() {
            return Err(ClassificationError::UnexpectedShape(format!(
                "{} labels for {} probabilities",
                labels.len(),
                probabilities.len()
            )));
        }
        if labels.is_empty() {
            return Err(ClassificationError::UnexpectedShape(
                "classifier returned no labels".to_string(),
            ));
        }
        Ok(Self {
            labels,
            probabilities,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.probabilities.iter().copied())
    }
}

/// Splits classifier output into raw scores and labels.
///
/// The first item must be the scores and the last one the labels, whatever sits in between.
pub fn unpack_output(output: ClassifierOutput) -> Result<(Tensor, Vec<String>), ClassificationError> {
    match output {
        ClassifierOutput::Sequence(items) => match items.as_slice() {
            [OutputItem::Scores(scores), .., OutputItem::Labels(labels)] => {
                Ok((scores.clone(), labels.clone()))
            }
            [_, .., _] => Err(ClassificationError::UnexpectedShape(
                "expected scores first and labels last".to_string(),
            )),
            _ => Err(ClassificationError::UnexpectedShape(format!(
                "sequence of {} item(s)",
                items.len()
            ))),
        },
        ClassifierOutput::Single(_) => Err(ClassificationError::UnexpectedShape(
            "a single item instead of a sequence".to_string(),
        )),
    }
}

/// Softmax over the label dimension, returning the distribution of the first batch item.
pub fn batch_distribution(scores: &Tensor) -> Result<Vec<f32>, ClassificationError> {
    let scores = match scores.rank() {
        1 => scores.unsqueeze(0)?,
        2 => scores.clone(),
        rank => {
            return Err(ClassificationError::UnexpectedShape(format!(
                "scores of rank {rank}"
            )))
        }
    };
    let probabilities = softmax(&scores.to_dtype(DType::F32)?, D::Minus1)?;
    Ok(probabilities.i(0)?.to_vec1()?)
}

/// Adapts an [`AccentModel`] to the pipeline: loads the waveform, runs the model
/// and normalizes whatever it returns into a [`ClassificationResult`].
pub struct ClassifierAdapter {
    model: Box<dyn AccentModel>,
}

impl ClassifierAdapter {
    pub fn new(model: Box<dyn AccentModel>) -> Self {
        Self { model }
    }

    pub fn load_waveform(audio: &AudioAsset) -> Result<Waveform, ClassificationError> {
        let waveform =
            pcm_decode(audio.path()).map_err(|err| ClassificationError::Load(err.to_string()))?;
        if waveform.sample_rate != TARGET_SAMPLE_RATE {
            return Err(ClassificationError::Load(format!(
                "expected {} Hz audio, got {} Hz",
                TARGET_SAMPLE_RATE, waveform.sample_rate
            )));
        }
        if waveform.samples.is_empty() {
            return Err(ClassificationError::Load(
                "the extracted audio contains no samples".to_string(),
            ));
        }
        if waveform.source_channels > 1 {
            debug!(
                channels = waveform.source_channels,
                "Mixed multi-channel audio down to mono"
            );
        }
        Ok(waveform)
    }

    #[tracing::instrument(level = "info", skip_all, fields(samples = waveform.samples.len()))]
    pub fn classify(&mut self, waveform: &Waveform) -> Result<ClassificationResult, ClassificationError> {
        let batch = Tensor::from_slice(&waveform.samples, (1, waveform.samples.len()), &Device::Cpu)?;
        let output = self
            .model
            .classify_batch(&batch)
            .map_err(|err| ClassificationError::Inference(err.to_string()))?;
        let (scores, labels) = unpack_output(output)?;
        let probabilities = batch_distribution(&scores)?;
        let result = ClassificationResult::new(labels, probabilities)?;
        info!(labels = result.labels().len(), "Classification finished");
        Ok(result)
    }
}
