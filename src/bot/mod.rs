pub mod api;
pub mod types;

use std::collections::HashMap;

use anyhow::Result;
use log::{error, info, warn};

use crate::qr::{self, DecodeResult, QrError, RenderOptions};

pub use self::types::{Message, PhotoSize, Update};

pub const START_TEXT: &str = "👋 Hello! I generate and decode QR codes.\n\
    Send text to get a QR code.\n\
    Send a photo of a QR code to decode it.";
pub const HELP_TEXT: &str = "/generate <text> - create QR\nSend a photo to decode.";
pub const USAGE_TEXT: &str = "Usage: /generate <text>";
pub const TOO_LONG_TEXT: &str = "⚠️ That text is too long to fit in a QR code.";
pub const NOT_FOUND_TEXT: &str = "No QR found.";
pub const FAILURE_TEXT: &str = "Sorry, something went wrong while handling your message.";
pub const TEXT_CAPTION: &str = "Here's your QR!";

/// Bot API limit on photo captions, counted in UTF-16 code units
const CAPTION_LIMIT: usize = 1024;

/// an inbound chat event, stripped of platform details
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command { name: String, args: String },
    Text(String),
    Photo { file_id: String },
    Unsupported,
}

impl Inbound {
    pub fn from_message(message: &Message) -> Inbound {
        if let Some(photo) = largest_photo(message.photo.as_deref().unwrap_or_default()) {
            return Inbound::Photo {
                file_id: photo.file_id.clone(),
            };
        }

        if let Some(document) = &message.document {
            let is_image = document
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/"));
            if is_image {
                return Inbound::Photo {
                    file_id: document.file_id.clone(),
                };
            }
        }

        match &message.text {
            Some(text) => Inbound::parse_text(text),
            None => Inbound::Unsupported,
        }
    }

    /// `/name@bot args` becomes a command, anything else is plain text
    pub fn parse_text(text: &str) -> Inbound {
        let Some(rest) = text.strip_prefix('/') else {
            return Inbound::Text(text.to_string());
        };

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args),
            None => (rest, ""),
        };
        let name = head.split_once('@').map_or(head, |(name, _)| name);

        Inbound::Command {
            name: name.to_lowercase(),
            args: args.trim().to_string(),
        }
    }
}

/// picks the largest rendition, the one most likely to decode
fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Photo {
        png: Vec<u8>,
        caption: Option<String>,
    },
}

impl Reply {
    fn text(text: impl Into<String>) -> Reply {
        Reply::Text(text.into())
    }
}

/// where photo bytes come from
pub trait FileSource {
    fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Start,
    Help,
    Generate,
    Text,
    Photo,
    Fallback,
}

pub type Handler = fn(&Dispatcher, &Inbound, &dyn FileSource) -> Result<Reply>;

/// Maps inbound events to QR transforms through a routing table.
pub struct Dispatcher {
    routes: HashMap<Route, Handler>,
    render: RenderOptions,
}

impl Dispatcher {
    pub fn new(render: RenderOptions) -> Self {
        let mut routes: HashMap<Route, Handler> = HashMap::new();
        routes.insert(Route::Start, handle_start);
        routes.insert(Route::Help, handle_help);
        routes.insert(Route::Generate, handle_generate);
        routes.insert(Route::Text, handle_text);
        routes.insert(Route::Photo, handle_photo);
        routes.insert(Route::Fallback, handle_help);

        Dispatcher { routes, render }
    }

    pub fn route(inbound: &Inbound) -> Route {
        match inbound {
            Inbound::Command { name, .. } => match name.as_str() {
                "start" => Route::Start,
                "help" => Route::Help,
                "generate" => Route::Generate,
                _ => Route::Fallback,
            },
            Inbound::Text(_) => Route::Text,
            Inbound::Photo { .. } => Route::Photo,
            Inbound::Unsupported => Route::Fallback,
        }
    }

    /// always yields exactly one reply; handler failures become a message
    pub fn dispatch(&self, inbound: &Inbound, files: &dyn FileSource) -> Reply {
        let route = Dispatcher::route(inbound);
        let Some(handler) = self.routes.get(&route) else {
            warn!("no handler registered for {:?}", route);
            return Reply::text(HELP_TEXT);
        };

        match handler(self, inbound, files) {
            Ok(reply) => reply,
            Err(err) => match err.downcast_ref::<QrError>() {
                Some(QrError::ErrEncodingTooLarge { len }) => {
                    info!("rejected {} bytes of text, too large for a QR code", len);
                    Reply::text(TOO_LONG_TEXT)
                }
                _ => {
                    error!("{:?} handler failed: {:#}", route, err);
                    Reply::text(FAILURE_TEXT)
                }
            },
        }
    }

    fn qr_reply(&self, text: &str, caption: String) -> Result<Reply> {
        let image = qr::encode(text, &self.render)?;
        Ok(Reply::Photo {
            png: image.into_bytes(),
            caption: Some(truncate_caption(caption)),
        })
    }
}

/// cuts the caption on a char boundary so that it fits the limit with a trailing `…`
fn truncate_caption(caption: String) -> String {
    if caption.encode_utf16().count() <= CAPTION_LIMIT {
        return caption;
    }

    let budget = CAPTION_LIMIT - '…'.len_utf16();
    let mut used = 0;
    let mut truncated = String::new();
    for c in caption.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        truncated.push(c);
    }
    truncated.push('…');
    truncated
}

fn handle_start(_: &Dispatcher, _: &Inbound, _: &dyn FileSource) -> Result<Reply> {
    Ok(Reply::text(START_TEXT))
}

fn handle_help(_: &Dispatcher, _: &Inbound, _: &dyn FileSource) -> Result<Reply> {
    Ok(Reply::text(HELP_TEXT))
}

fn handle_generate(dispatcher: &Dispatcher, inbound: &Inbound, _: &dyn FileSource) -> Result<Reply> {
    let text = match inbound {
        Inbound::Command { args, .. } => args.trim(),
        _ => "",
    };
    if text.is_empty() {
        return Ok(Reply::text(USAGE_TEXT));
    }

    dispatcher.qr_reply(text, format!("QR for:\n{}", text))
}

fn handle_text(dispatcher: &Dispatcher, inbound: &Inbound, _: &dyn FileSource) -> Result<Reply> {
    let text = match inbound {
        Inbound::Text(text) => text.as_str(),
        _ => "",
    };
    if text.trim().is_empty() {
        return Ok(Reply::text(USAGE_TEXT));
    }

    dispatcher.qr_reply(text, TEXT_CAPTION.to_string())
}

fn handle_photo(_: &Dispatcher, inbound: &Inbound, files: &dyn FileSource) -> Result<Reply> {
    let Inbound::Photo { file_id } = inbound else {
        return Ok(Reply::text(HELP_TEXT));
    };

    let bytes = files.download(file_id)?;
    let reply = match qr::decode(&bytes) {
        DecodeResult::Found(text) => format!("Decoded:\n{}", text),
        DecodeResult::NotFound => NOT_FOUND_TEXT.to_string(),
        DecodeResult::Unreadable => {
            warn!("photo {} could not be read as an image", file_id);
            NOT_FOUND_TEXT.to_string()
        }
    };

    Ok(Reply::Text(reply))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use anyhow::{anyhow, Result};

    use super::{
        Dispatcher, FileSource, Inbound, Reply, Route, FAILURE_TEXT, HELP_TEXT, NOT_FOUND_TEXT,
        truncate_caption, START_TEXT, TEXT_CAPTION, TOO_LONG_TEXT, USAGE_TEXT,
    };
    use crate::qr::{self, DecodeResult, RenderOptions};

    #[derive(Default)]
    struct MemoryFiles(HashMap<String, Vec<u8>>);

    impl FileSource for MemoryFiles {
        fn download(&self, file_id: &str) -> Result<Vec<u8>> {
            self.0
                .get(file_id)
                .cloned()
                .ok_or_else(|| anyhow!("file {} not found", file_id))
        }
    }

    fn dispatch(text: &str) -> Reply {
        let dispatcher = Dispatcher::new(RenderOptions::default());
        dispatcher.dispatch(&Inbound::parse_text(text), &MemoryFiles::default())
    }

    fn photo_payload(reply: Reply) -> (String, Option<String>) {
        match reply {
            Reply::Photo { png, caption } => match qr::decode(&png) {
                DecodeResult::Found(text) => (text, caption),
                other => panic!("generated photo did not decode: {:?}", other),
            },
            Reply::Text(text) => panic!("expected photo, got text {:?}", text),
        }
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(
            Inbound::parse_text("/generate hello world "),
            Inbound::Command {
                name: String::from("generate"),
                args: String::from("hello world"),
            }
        );
        assert_eq!(
            Inbound::parse_text("/Start@QrBot"),
            Inbound::Command {
                name: String::from("start"),
                args: String::new(),
            }
        );
        assert_eq!(
            Inbound::parse_text("just text"),
            Inbound::Text(String::from("just text"))
        );
    }

    #[test]
    fn test_routes() {
        assert_eq!(Dispatcher::route(&Inbound::parse_text("/help")), Route::Help);
        assert_eq!(Dispatcher::route(&Inbound::parse_text("/nope")), Route::Fallback);
        assert_eq!(Dispatcher::route(&Inbound::Unsupported), Route::Fallback);
        assert_eq!(
            Dispatcher::route(&Inbound::Photo {
                file_id: String::from("x")
            }),
            Route::Photo
        );
    }

    #[test]
    fn test_start_and_help() {
        assert_eq!(dispatch("/start"), Reply::Text(START_TEXT.to_string()));
        assert_eq!(dispatch("/help"), Reply::Text(HELP_TEXT.to_string()));
        assert_eq!(dispatch("/unknown"), Reply::Text(HELP_TEXT.to_string()));
    }

    #[test]
    fn test_generate() {
        let (text, caption) = photo_payload(dispatch("/generate hello"));
        assert_eq!(text, "hello");
        assert_eq!(caption.as_deref(), Some("QR for:\nhello"));
    }

    #[test]
    fn test_generate_without_text() {
        assert_eq!(dispatch("/generate"), Reply::Text(USAGE_TEXT.to_string()));
        assert_eq!(dispatch("/generate    "), Reply::Text(USAGE_TEXT.to_string()));
    }

    #[test]
    fn test_plain_text() {
        let (text, caption) = photo_payload(dispatch("hello"));
        assert_eq!(text, "hello");
        assert_eq!(caption.as_deref(), Some(TEXT_CAPTION));

        assert_eq!(dispatch("   "), Reply::Text(USAGE_TEXT.to_string()));
    }

    #[test]
    fn test_long_caption_is_truncated() {
        let text = "y".repeat(1500);
        let (decoded, caption) = photo_payload(dispatch(&format!("/generate {}", text)));
        assert_eq!(decoded, text);

        let caption = caption.unwrap();
        assert_eq!(caption.chars().count(), 1024);
        assert!(caption.starts_with("QR for:\nyyy"));
        assert!(caption.ends_with('…'));
    }

    #[test]
    fn test_caption_limit_counts_utf16_units() {
        // every emoji takes two UTF-16 units
        let caption = format!("QR for:\n{}", "🎉".repeat(580));
        let truncated = truncate_caption(caption);

        let units = truncated.encode_utf16().count();
        // 8 units of prefix, 507 emoji, then the ellipsis; a 508th emoji would overflow
        assert_eq!(units, 1023);
        assert!(truncated.starts_with("QR for:\n🎉"));
        assert!(truncated.ends_with("🎉…"));

        let short = String::from("QR for:\n🎉🎉");
        assert_eq!(truncate_caption(short.clone()), short);
    }

    #[test]
    fn test_text_too_long() {
        let text = "x".repeat(5000);
        assert_eq!(dispatch(&text), Reply::Text(TOO_LONG_TEXT.to_string()));
        assert_eq!(
            dispatch(&format!("/generate {}", text)),
            Reply::Text(TOO_LONG_TEXT.to_string())
        );
    }

    #[test]
    fn test_photo() {
        let png = qr::encode("from a photo", &RenderOptions::default())
            .unwrap()
            .into_bytes();
        let mut files = MemoryFiles::default();
        files.0.insert(String::from("qr"), png);
        files.0.insert(String::from("junk"), b"not an image".to_vec());

        let dispatcher = Dispatcher::new(RenderOptions::default());
        let photo = |id: &str| Inbound::Photo {
            file_id: id.to_string(),
        };

        assert_eq!(
            dispatcher.dispatch(&photo("qr"), &files),
            Reply::Text(String::from("Decoded:\nfrom a photo"))
        );
        assert_eq!(
            dispatcher.dispatch(&photo("junk"), &files),
            Reply::Text(NOT_FOUND_TEXT.to_string())
        );
        assert_eq!(
            dispatcher.dispatch(&photo("missing"), &files),
            Reply::Text(FAILURE_TEXT.to_string())
        );
    }

    #[test]
    fn test_inbound_from_message() {
        let message: super::Message = serde_json::from_str(
            r#"{
                "message_id": 7,
                "chat": {"id": 42},
                "photo": [
                    {"file_id": "small", "width": 90, "height": 90},
                    {"file_id": "big", "width": 1280, "height": 1280},
                    {"file_id": "medium", "width": 320, "height": 320}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            Inbound::from_message(&message),
            Inbound::Photo {
                file_id: String::from("big")
            }
        );

        let message: super::Message = serde_json::from_str(
            r#"{
                "message_id": 8,
                "chat": {"id": 42},
                "document": {"file_id": "doc", "mime_type": "image/png"}
            }"#,
        )
        .unwrap();
        assert_eq!(
            Inbound::from_message(&message),
            Inbound::Photo {
                file_id: String::from("doc")
            }
        );

        let message: super::Message = serde_json::from_str(
            r#"{
                "message_id": 9,
                "chat": {"id": 42},
                "document": {"file_id": "doc", "mime_type": "application/pdf"}
            }"#,
        )
        .unwrap();
        assert_eq!(Inbound::from_message(&message), Inbound::Unsupported);
    }
}
