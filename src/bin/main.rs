use anyhow::{Context, Result};
use qrbot::bot::api::{BotApi, TelegramListener};
use qrbot::bot::Dispatcher;
use qrbot::config::{Config, RawConfig, DEFAULT_API_URL, TOKEN_ENV};
use qrbot::keep_alive;
use qrbot::qr::{self, DecodeResult, RenderOptions};
use qrbot::supervisor::Supervisor;

use std::{fs, net::SocketAddr, path::PathBuf, process::exit};

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simple_logger::{set_up_color_terminal, SimpleLogger};
use url::Url;

#[derive(Debug, Parser, Clone)]
#[command(name = "qrbot", about = "A chat bot that makes and reads QR codes")]
enum Cli {
    /// Runs the bot until interrupted
    #[command()]
    Run {
        #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
        token: Option<String>,

        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: Url,

        /// long-poll timeout in seconds
        #[arg(long, default_value_t = 30)]
        poll_timeout: u64,

        #[arg(long, default_value_t = 10)]
        module_size: u32,

        #[arg(long, default_value_t = 4)]
        border: u32,

        /// first reconnect delay in seconds
        #[arg(long, default_value_t = 1)]
        initial_delay: u64,

        /// reconnect delay cap in seconds
        #[arg(long, default_value_t = 60)]
        max_delay: u64,

        /// serve a liveness endpoint on this address
        #[arg(long, env = "QRBOT_KEEP_ALIVE")]
        keep_alive: Option<SocketAddr>,
    },

    /// Writes the QR code for a text to a PNG file
    #[command()]
    Encode {
        text: String,

        #[arg(short = 'o', default_value = "qr.png")]
        output: PathBuf,

        #[arg(long, default_value_t = 10)]
        module_size: u32,

        #[arg(long, default_value_t = 4)]
        border: u32,
    },

    /// Prints the content of the QR code in an image file
    #[command()]
    Decode { path: PathBuf },
}

fn main() {
    set_up_color_terminal();
    let logger = SimpleLogger::new().with_level(LevelFilter::Info).env();
    if let Err(err) = logger.init() {
        eprintln!("failed to set up logging: {}", err);
    }

    let args = Cli::parse();

    let res = match args {
        Cli::Run {
            token,
            api_url,
            poll_timeout,
            module_size,
            border,
            initial_delay,
            max_delay,
            keep_alive,
        } => Config::try_from(RawConfig {
            token,
            api_url,
            poll_timeout_secs: poll_timeout,
            module_size,
            border,
            initial_delay_secs: initial_delay,
            max_delay_secs: max_delay,
            keep_alive,
        })
        .map_err(anyhow::Error::from)
        .and_then(run),
        Cli::Encode {
            text,
            output,
            module_size,
            border,
        } => encode(
            &text,
            output,
            RenderOptions {
                module_size,
                border,
            },
        ),
        Cli::Decode { path } => decode(path),
    };

    if let Err(err) = res {
        error!("{:#}", err);
        exit(1)
    }
}

fn run(config: Config) -> Result<()> {
    if let Some(addr) = config.keep_alive {
        if let Err(err) = keep_alive::spawn(addr) {
            warn!("keep-alive disabled: {:#}", err);
        }
    }

    let api = BotApi::new(config.api_url, config.token, config.poll_timeout)?;
    let listener = TelegramListener::new(api, Dispatcher::new(config.render), config.poll_timeout);

    info!("starting bot");
    Supervisor::new(listener, config.backoff).run()
}

fn encode(text: &str, output: PathBuf, options: RenderOptions) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("refusing to encode blank text");
    }

    let image = qr::encode(text, &options)?;
    fs::write(&output, image.as_bytes())
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!("wrote {}", output.display());
    Ok(())
}

fn decode(path: PathBuf) -> Result<()> {
    let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;

    match qr::decode(&bytes) {
        DecodeResult::Found(text) => println!("{}", text),
        DecodeResult::NotFound => anyhow::bail!("no QR code found in {}", path.display()),
        DecodeResult::Unreadable => anyhow::bail!("{} is not a readable image", path.display()),
    }

    Ok(())
}
