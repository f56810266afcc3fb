//! Detects the English accent spoken in a remote video.
//!
//! A run downloads the media, extracts a mono 16 kHz waveform, classifies it and
//! re-normalizes the classifier output over a fixed set of English accents.

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod telemetry;
