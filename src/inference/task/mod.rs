pub mod classify;
pub mod transcribe;
