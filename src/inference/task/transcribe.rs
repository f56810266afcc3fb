use anyhow::Error;

pub trait Transcriber: Send {
    /// Transcribes 16 kHz mono samples into English text.
    fn transcribe(&mut self, pcm: &[f32]) -> Result<String, Error>;
}
