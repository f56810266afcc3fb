use anyhow::Error;
use candle_core::Tensor;

/// One element of what a classifier returns for a batch.
#[derive(Debug, Clone)]
pub enum OutputItem {
    /// Raw per-label scores, shaped `(batch, labels)`
    Scores(Tensor),
    /// Best score per batch item
    TopScore(Tensor),
    /// Index of the best label per batch item
    TopIndex(Tensor),
    /// Label names, in the order of the score columns
    Labels(Vec<String>),
}

/// The shapes a classifier may hand back.
///
/// Models disagree on how many items they return, so the adapter only relies on
/// the first item carrying the scores and the last one carrying the labels.
#[derive(Debug, Clone)]
pub enum ClassifierOutput {
    Sequence(Vec<OutputItem>),
    Single(OutputItem),
}

pub trait AccentModel: Send {
    /// Classifies a `(1, samples)` batch of 16 kHz mono audio.
    fn classify_batch(&mut self, batch: &Tensor) -> Result<ClassifierOutput, Error>;
}
