use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::context::{DEFAULT_INSTRUCTION_TEMPLATE, SUMMARY_WORD_LIMIT};
use crate::session::ConversationConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub live: LiveConfig,
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// "virtual" or "cpal"
    pub backend: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub capture_window: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Unset runs the in-process loopback transport
    pub nats_url: Option<String>,
    pub subject_prefix: String,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub instruction_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    pub subject: String,
    pub word_limit: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryConfig {
    /// JSON file; `~` is expanded. Unset keeps history in memory.
    pub path: Option<String>,
}

impl Config {
    /// Load `path` (any format the config crate knows, extension optional)
    /// layered over the defaults, then `LOQA_LIVE__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = Self::defaults()?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_LIVE").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let capture = CaptureConfig::default();
        let playback = PlaybackConfig::default();
        let conversation = ConversationConfig::default();

        Ok(config::Config::builder()
            .set_default("service.name", "loqa-live")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 3020)?
            .set_default("audio.backend", "virtual")?
            .set_default("audio.input_sample_rate", i64::from(capture.sample_rate))?
            .set_default("audio.output_sample_rate", i64::from(playback.sample_rate))?
            .set_default("audio.channels", i64::from(capture.channels))?
            .set_default("audio.capture_window", capture.window_size as i64)?
            .set_default("live.subject_prefix", "live")?
            .set_default("live.model", conversation.model)?
            .set_default("live.connect_timeout_secs", 10)?
            .set_default("live.instruction_template", DEFAULT_INSTRUCTION_TEMPLATE)?
            .set_default("summarizer.subject", "docs.summarize")?
            .set_default("summarizer.word_limit", SUMMARY_WORD_LIMIT as i64)?
            .set_default("summarizer.timeout_secs", 60)?)
    }

    /// Per-conversation settings derived from this config
    pub fn conversation(&self) -> ConversationConfig {
        ConversationConfig {
            capture: CaptureConfig {
                sample_rate: self.audio.input_sample_rate,
                channels: self.audio.channels,
                window_size: self.audio.capture_window,
            },
            playback: PlaybackConfig {
                sample_rate: self.audio.output_sample_rate,
                channels: self.audio.channels,
            },
            model: self.live.model.clone(),
            instruction_template: self.live.instruction_template.clone(),
            summary_word_limit: self.summarizer.word_limit,
            ..ConversationConfig::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.live.connect_timeout_secs)
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer.timeout_secs)
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history
            .path
            .as_deref()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let cfg = Config::load("does-not-exist/loqa-live").unwrap();
        assert_eq!(cfg.service.http.port, 3020);
        assert_eq!(cfg.audio.input_sample_rate, 16000);
        assert_eq!(cfg.audio.output_sample_rate, 24000);
        assert_eq!(cfg.summarizer.word_limit, 500);
        assert!(cfg.live.nats_url.is_none());
        assert!(cfg.history_path().is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[live]\nnats_url = \"nats://localhost:4222\"\nmodel = \"test-model\"\n\n[audio]\ncapture_window = 2048"
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.live.nats_url.as_deref(), Some("nats://localhost:4222"));

        let conversation = cfg.conversation();
        assert_eq!(conversation.model, "test-model");
        assert_eq!(conversation.capture.window_size, 2048);
        assert_eq!(conversation.playback.sample_rate, 24000);
    }
}
