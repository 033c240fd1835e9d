use std::{error::Error, fmt::Display, net::SocketAddr, time::Duration};

use url::Url;

use crate::{
    qr::{RenderOptions, MAX_IMAGE_SIDE},
    supervisor::BackoffPolicy,
};

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// indicates the bot token is absent or blank
    ErrMissingToken,
    /// indicates a module size of zero
    ErrInvalidModuleSize(u32),
    /// indicates render options whose largest symbol exceeds the image size limit
    ErrImageTooLarge { module_size: u32, border: u32 },
    /// indicates backoff delays that cannot grow
    ErrInvalidBackoff(String),
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ErrMissingToken => {
                write!(f, "bot token missing, set {} or pass --token", TOKEN_ENV)
            }
            ConfigError::ErrInvalidModuleSize(size) => {
                write!(f, "module size must be positive, got {}", size)
            }
            ConfigError::ErrImageTooLarge {
                module_size,
                border,
            } => write!(
                f,
                "module size {} with border {} can exceed {}px per side",
                module_size, border, MAX_IMAGE_SIDE
            ),
            ConfigError::ErrInvalidBackoff(err) => write!(f, "invalid backoff: {}", err),
        }
    }
}

/// Everything the bot needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: Url,
    pub poll_timeout: Duration,
    pub render: RenderOptions,
    pub backoff: BackoffPolicy,
    pub keep_alive: Option<SocketAddr>,
}

/// Raw startup values as they come from the command line or environment.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub token: Option<String>,
    pub api_url: Url,
    pub poll_timeout_secs: u64,
    pub module_size: u32,
    pub border: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub keep_alive: Option<SocketAddr>,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let token = raw
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::ErrMissingToken)?;

        if raw.module_size == 0 {
            return Err(ConfigError::ErrInvalidModuleSize(raw.module_size));
        }

        let render = RenderOptions {
            module_size: raw.module_size,
            border: raw.border,
        };
        if !render.max_side().is_some_and(|side| side <= MAX_IMAGE_SIDE) {
            return Err(ConfigError::ErrImageTooLarge {
                module_size: raw.module_size,
                border: raw.border,
            });
        }

        if raw.initial_delay_secs == 0 {
            return Err(ConfigError::ErrInvalidBackoff(
                "initial delay must be positive".to_string(),
            ));
        }
        if raw.max_delay_secs < raw.initial_delay_secs {
            return Err(ConfigError::ErrInvalidBackoff(format!(
                "max delay {}s is below initial delay {}s",
                raw.max_delay_secs, raw.initial_delay_secs
            )));
        }

        Ok(Config {
            token,
            api_url: raw.api_url,
            poll_timeout: Duration::from_secs(raw.poll_timeout_secs),
            render,
            backoff: BackoffPolicy {
                initial: Duration::from_secs(raw.initial_delay_secs),
                max: Duration::from_secs(raw.max_delay_secs),
            },
            keep_alive: raw.keep_alive,
        })
    }
}
