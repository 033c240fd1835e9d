mod decode;
mod encode;

use std::{error::Error, fmt::Display};

pub use self::decode::{decode, DecodeResult};
pub use self::encode::{encode, EncodedImage, RenderOptions, MAX_IMAGE_SIDE, MAX_SYMBOL_MODULES};

#[derive(Debug, PartialEq, Eq)]
pub enum QrError {
    /// indicates the text does not fit in the largest QR version
    ErrEncodingTooLarge { len: usize },
    /// indicates render options that cannot produce an image
    ErrInvalidRenderOptions(String),
}

impl Error for QrError {}

impl Display for QrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QrError::ErrEncodingTooLarge { len } => {
                write!(f, "text of {} bytes exceeds maximum QR capacity", len)
            }
            QrError::ErrInvalidRenderOptions(err) => write!(f, "invalid render options: {}", err),
        }
    }
}
