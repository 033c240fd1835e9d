use std::{error::Error, fmt::Display, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::{
    types::{ApiResponse, File, Update, User},
    Dispatcher, FileSource, Inbound, Reply, FAILURE_TEXT,
};
use crate::supervisor::{Control, Listener};

/// slack on top of the long-poll timeout before the HTTP request gives up
const REQUEST_SLACK: Duration = Duration::from_secs(15);

#[derive(Debug, PartialEq, Eq)]
pub enum ApiError {
    /// the platform answered with `ok: false`
    ErrApi {
        method: String,
        code: Option<i64>,
        description: String,
        retry_after: Option<u64>,
    },
    /// `ok: true` without a result
    ErrMissingResult(String),
    /// the file cannot be downloaded, no path was given
    ErrMissingFilePath(String),
    /// the base URL cannot carry path segments
    ErrInvalidBaseUrl(String),
}

impl Error for ApiError {}

impl ApiError {
    /// rate limits and server-side faults clear up on their own
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::ErrApi {
                code: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::ErrApi {
                method,
                code,
                description,
                ..
            } => match code {
                Some(code) => write!(f, "{} failed with {}: {}", method, code, description),
                None => write!(f, "{} failed: {}", method, description),
            },
            ApiError::ErrMissingResult(method) => write!(f, "{} returned no result", method),
            ApiError::ErrMissingFilePath(file_id) => {
                write!(f, "file {} has no download path", file_id)
            }
            ApiError::ErrInvalidBaseUrl(url) => write!(f, "invalid API base url: {}", url),
        }
    }
}

/// The Bot API calls the listener needs.
pub trait ChatApi: FileSource {
    fn get_me(&self) -> Result<User>;

    /// long-polls for new updates starting at `offset`
    fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>>;

    fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    fn send_photo(&self, chat_id: i64, png: Vec<u8>, caption: Option<&str>) -> Result<()>;

    fn send_reply(&self, chat_id: i64, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => self.send_message(chat_id, &text),
            Reply::Photo { png, caption } => self.send_photo(chat_id, png, caption.as_deref()),
        }
    }
}

/// Blocking client for the Telegram Bot API.
pub struct BotApi {
    client: Client,
    base: Url,
    token: String,
}

impl BotApi {
    pub fn new(base: Url, token: String, poll_timeout: Duration) -> Result<BotApi> {
        if base.cannot_be_a_base() {
            return Err(ApiError::ErrInvalidBaseUrl(base.to_string()).into());
        }

        let client = Client::builder()
            .timeout(poll_timeout + REQUEST_SLACK)
            .build()
            .context("failed to build HTTP client")?;

        Ok(BotApi {
            client,
            base,
            token,
        })
    }

    /// `<base>/bot<token>/<method>`
    fn method_url(&self, method: &str) -> Result<Url> {
        self.url_with(&[format!("bot{}", self.token).as_str(), method])
    }

    /// `<base>/file/bot<token>/<path>`
    fn file_url(&self, file_path: &str) -> Result<Url> {
        let mut segments = vec!["file".to_string(), format!("bot{}", self.token)];
        segments.extend(file_path.split('/').map(str::to_string));
        self.url_with(&segments)
    }

    fn url_with<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::ErrInvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, request: RequestBuilder) -> Result<T> {
        debug!("calling {}", method);
        // errors carry the request url, which contains the token
        let response = request
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("{} request failed", method))?;

        let envelope: ApiResponse<T> = response
            .json()
            .map_err(|err| err.without_url())
            .with_context(|| format!("invalid {} response", method))?;

        into_result(method, envelope)
    }

    pub fn get_file(&self, file_id: &str) -> Result<File> {
        let url = self.method_url("getFile")?;
        let body = json!({ "file_id": file_id });
        self.call("getFile", self.client.post(url).json(&body))
    }

    pub fn download_file(&self, file: &File) -> Result<Vec<u8>> {
        let path = file
            .file_path
            .as_deref()
            .ok_or_else(|| ApiError::ErrMissingFilePath(file.file_id.clone()))?;

        let response = self
            .client
            .get(self.file_url(path)?)
            .send()
            .map_err(|err| err.without_url())
            .context("file download failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("file download failed: {}", status));
        }

        let bytes = response
            .bytes()
            .map_err(|err| err.without_url())
            .context("failed to read file body")?;
        Ok(bytes.to_vec())
    }
}

impl ChatApi for BotApi {
    fn get_me(&self) -> Result<User> {
        let url = self.method_url("getMe")?;
        self.call("getMe", self.client.get(url))
    }

    fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let url = self.method_url("getUpdates")?;
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", self.client.post(url).json(&body))
    }

    fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = self.method_url("sendMessage")?;
        let body = json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", self.client.post(url).json(&body))?;
        Ok(())
    }

    fn send_photo(&self, chat_id: i64, png: Vec<u8>, caption: Option<&str>) -> Result<()> {
        let url = self.method_url("sendPhoto")?;
        let photo = multipart::Part::bytes(png)
            .file_name("qr.png")
            .mime_str("image/png")?;

        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", photo);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let _: serde_json::Value = self.call("sendPhoto", self.client.post(url).multipart(form))?;
        Ok(())
    }
}

impl FileSource for BotApi {
    fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.get_file(file_id)?;
        self.download_file(&file)
    }
}

fn into_result<T>(method: &str, envelope: ApiResponse<T>) -> Result<T> {
    if !envelope.ok {
        return Err(ApiError::ErrApi {
            method: method.to_string(),
            code: envelope.error_code,
            description: envelope
                .description
                .unwrap_or_else(|| String::from("no description")),
            retry_after: envelope.parameters.and_then(|params| params.retry_after),
        }
        .into());
    }

    envelope
        .result
        .ok_or_else(|| ApiError::ErrMissingResult(method.to_string()).into())
}

/// true when the platform saw the request and will keep refusing it
fn is_refusal(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<ApiError>() {
        Some(api_err @ ApiError::ErrApi { .. }) => !api_err.is_retryable(),
        _ => false,
    }
}

/// Long-polling [`Listener`] that answers every message through the [`Dispatcher`].
pub struct TelegramListener<A: ChatApi> {
    api: A,
    dispatcher: Dispatcher,
    poll_timeout: Duration,
    offset: i64,
}

impl<A: ChatApi> TelegramListener<A> {
    pub fn new(api: A, dispatcher: Dispatcher, poll_timeout: Duration) -> Self {
        TelegramListener {
            api,
            dispatcher,
            poll_timeout,
            offset: 0,
        }
    }

    /// answers one update. An error means the update must be delivered again.
    fn handle(&self, update: &Update) -> Result<()> {
        let Some(message) = &update.message else {
            debug!("ignoring update {} without message", update.update_id);
            return Ok(());
        };

        let inbound = Inbound::from_message(message);
        debug!("update {}: {:?}", update.update_id, Dispatcher::route(&inbound));
        let reply = self.dispatcher.dispatch(&inbound, &self.api);
        let is_photo = matches!(reply, Reply::Photo { .. });

        let err = match self.api.send_reply(message.chat.id, reply) {
            Ok(()) => return Ok(()),
            Err(err) if is_refusal(&err) => err,
            // transport faults, rate limits and server errors
            Err(err) => return Err(err),
        };
        warn!("reply to update {} refused: {:#}", update.update_id, err);

        if !is_photo {
            // a refused text message cannot be replaced by another text
            return Ok(());
        }

        match self.api.send_message(message.chat.id, FAILURE_TEXT) {
            Ok(()) => Ok(()),
            Err(err) if is_refusal(&err) => {
                warn!("fallback for update {} refused: {:#}", update.update_id, err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl<A: ChatApi> Listener for TelegramListener<A> {
    fn start(&mut self) -> Result<()> {
        let me = self.api.get_me().context("failed to reach the bot API")?;
        info!(
            "connected as @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id
        );
        Ok(())
    }

    fn poll(&mut self) -> Result<Control> {
        let updates = self.api.get_updates(self.offset, self.poll_timeout)?;
        for update in &updates {
            self.handle(update)?;
            // confirmed only once answered, so a failure redelivers it
            self.offset = update.update_id + 1;
        }
        Ok(Control::Continue)
    }
}
