//! Spoken "payment received" announcement.
//!
//! Strictly best-effort: the payment has already been settled when this
//! runs, so every failure is logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{api_error, friendly_error};
use crate::backend::SpeechSynth;
use crate::config::{Secret, VoiceConfig};
use crate::data_helpers::{format_vnd, value_str};
use crate::error::{PosError, Result};
use crate::events::{EventBus, PosEvent};
use crate::models::Money;

const TTS_TIMEOUT: Duration = Duration::from_secs(8);

/// Text-to-speech client (FPT.AI-style: raw text body, audio URL in the
/// JSON response).
#[derive(Clone)]
pub struct TtsClient {
    http: Client,
    url: String,
    api_key: Secret,
    voice: String,
}

impl TtsClient {
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(TTS_TIMEOUT)
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(TtsClient {
            http,
            url: config.url.trim().to_string(),
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
        })
    }
}

impl SpeechSynth for TtsClient {
    async fn synthesize(&self, text: &str) -> Result<String> {
        let resp = self
            .http
            .post(&self.url)
            .header("api-key", self.api_key.expose())
            .header("voice", &self.voice)
            .body(text.to_string())
            .send()
            .await
            .map_err(|e| friendly_error(&self.url, &e))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let json: Value =
            serde_json::from_str(&body).map_err(|e| PosError::invalid_response("tts", e))?;
        value_str(&json, &["async", "url", "audioUrl"])
            .ok_or_else(|| PosError::invalid_response("tts", "no audio url"))
    }
}

pub fn announcement_text(amount: Money) -> String {
    format!("Đã nhận {} đồng", format_vnd(amount))
}

/// Synthesize the announcement and hand the audio URL to the UI shell.
pub async fn announce_payment<S: SpeechSynth>(synth: &S, events: &EventBus, amount: Money) {
    match synth.synthesize(&announcement_text(amount)).await {
        Ok(audio_url) => {
            info!(amount, "payment announcement ready");
            events.publish(PosEvent::PaymentAnnounced { amount, audio_url });
        }
        Err(e) => warn!(amount, error = %e, "payment announcement failed"),
    }
}

/// Fire-and-forget variant; the caller never waits on the speech service.
pub fn spawn_announcement<S>(synth: Arc<S>, events: EventBus, amount: Money)
where
    S: SpeechSynth + 'static,
{
    tokio::spawn(async move {
        announce_payment(synth.as_ref(), &events, amount).await;
    });
}
