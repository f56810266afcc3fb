use serde::{Deserialize, Serialize};

use crate::pipeline::AccentReport;

#[derive(Deserialize, Debug)]
pub struct AccentRequest {
    /// Public video URL, either a direct media link or a video-sharing platform page
    pub url: String,
}

#[derive(Serialize, Debug)]
pub struct AccentResponse {
    #[serde(flatten)]
    pub report: AccentReport,
    pub summary: String,
    pub explanation: String,
}

impl From<AccentReport> for AccentResponse {
    fn from(report: AccentReport) -> Self {
        Self {
            summary: report.headline(),
            explanation: report.explanation(),
            report,
        }
    }
}
