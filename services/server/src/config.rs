//! Environment-driven configuration.

use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Expected `X-Api-Key` value; unset disables the check.
    pub api_key: Option<String>,
    /// When set, connections must carry signature headers.
    pub client_secret: Option<String>,
    /// Postgres URL; unset falls back to the in-memory store.
    pub database_url: Option<String>,
    pub blob_storage_url: Option<String>,
    pub event_webhook_url: Option<String>,
    pub speech: Option<SpeechConfig>,
    pub assist: Option<AssistConfig>,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub engine: SpeechEngineConfig,
    pub languages: String,
}

#[derive(Debug, Clone)]
pub enum SpeechEngineConfig {
    AzureAiSpeech { region: String, key: String },
    OpenAiRealtime { api_key: String },
}

#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub api_key: String,
    pub model: String,
    pub summary_interval: usize,
    pub history_target: usize,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parse_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let speech = match optional("SPEECH_PROVIDER").as_deref() {
            None => None,
            Some("azure-ai-speech") => Some(SpeechConfig {
                engine: SpeechEngineConfig::AzureAiSpeech {
                    region: required("AZURE_SPEECH_REGION")?,
                    key: required("AZURE_SPEECH_KEY")?,
                },
                languages: optional("SPEECH_LANGUAGE").unwrap_or_else(|| "en-US".to_string()),
            }),
            Some("openai-realtime") => Some(SpeechConfig {
                engine: SpeechEngineConfig::OpenAiRealtime {
                    api_key: required("OPENAI_API_KEY")?,
                },
                languages: optional("SPEECH_LANGUAGE").unwrap_or_else(|| "en-US".to_string()),
            }),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "SPEECH_PROVIDER".to_string(),
                    value: other.to_string(),
                });
            }
        };

        let assist = optional("OPENAI_API_KEY").map(|api_key| {
            Ok::<_, ConfigError>(AssistConfig {
                api_key,
                model: optional("AGENT_ASSIST_MODEL")
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                summary_interval: parse_usize("AGENT_ASSIST_SUMMARY_INTERVAL", 5)?,
                history_target: parse_usize("AGENT_ASSIST_HISTORY_TARGET", 5)?,
            })
        });
        let assist = assist.transpose()?;

        Ok(Self {
            bind_address: optional("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            api_key: optional("WEBSOCKET_SERVER_API_KEY"),
            client_secret: optional("WEBSOCKET_SERVER_CLIENT_SECRET"),
            database_url: optional("DATABASE_URL"),
            blob_storage_url: optional("AZURE_STORAGE_ACCOUNT_URL"),
            event_webhook_url: optional("EVENT_WEBHOOK_URL"),
            speech,
            assist,
        })
    }
}
