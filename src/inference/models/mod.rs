pub mod accent;
pub mod model;
pub mod whisper;
