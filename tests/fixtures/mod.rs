//! Shared inputs for orchestrator and transport tests

#![allow(dead_code)]

use std::time::Duration;

use restyle_orchestrator::models::remote::{ImagePayload, StageParams, StatusReport};
use restyle_orchestrator::services::orchestrator::OrchestratorSettings;
use restyle_orchestrator::services::poller::PollConfig;

/// PNG signature followed by the start of an IHDR chunk; enough for format detection.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

pub const EMPTY_URL: &str = "https://x/empty.jpg";
pub const ORIGINAL_URL: &str = "https://x/original.jpg";
pub const FINAL_URL: &str = "https://x/final.jpg";

pub fn room_photo() -> ImagePayload {
    ImagePayload::new("living-room.png", PNG_BYTES.to_vec())
}

pub fn params() -> StageParams {
    StageParams::default().with_room_type("living_room")
}

/// Defaults from the service contract: 3 s x 40 for the first stage, 2 s x 30 for the second.
pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings::default()
}

pub fn settings_with_attempts(max_attempts: u32) -> OrchestratorSettings {
    let poll = PollConfig {
        interval: Duration::from_millis(2000),
        max_attempts,
    };
    OrchestratorSettings {
        first_stage: poll,
        second_stage: poll,
        ..OrchestratorSettings::default()
    }
}

pub fn processing() -> StatusReport {
    StatusReport::new("processing")
}

pub fn empty_complete() -> StatusReport {
    StatusReport::new("empty_complete")
        .with_empty_url(EMPTY_URL)
        .with_original_url(ORIGINAL_URL)
}

pub fn style_done() -> StatusReport {
    StatusReport::new("done")
        .with_empty_url(EMPTY_URL)
        .with_styled_url(FINAL_URL)
}

pub fn style_error() -> StatusReport {
    StatusReport::new("style_error").with_message("style webhook failed")
}

pub fn remote_error(message: &str) -> StatusReport {
    StatusReport::new("error").with_message(message)
}
