use std::io::Cursor;

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat, Luma};
use qrcodegen::{DataTooLong, QrCode, QrCodeEcc, QrSegment, Version};

use super::QrError;

const DARK: Luma<u8> = Luma([0x00]);
const LIGHT: Luma<u8> = Luma([0xff]);

/// largest image side we render, the platform refuses bigger photos
pub const MAX_IMAGE_SIDE: u32 = 10_000;
/// modules per side of a version 40 symbol
pub const MAX_SYMBOL_MODULES: u32 = 177;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// side of one module in pixels
    pub module_size: u32,
    /// quiet zone width in modules
    pub border: u32,
}

impl RenderOptions {
    /// pixel side of the image for a symbol `modules` wide, `None` on overflow
    pub fn side_for(&self, modules: u32) -> Option<u32> {
        self.border
            .checked_mul(2)
            .and_then(|quiet| quiet.checked_add(modules))
            .and_then(|total| total.checked_mul(self.module_size))
    }

    /// pixel side of the largest symbol these options can render
    pub fn max_side(&self) -> Option<u32> {
        self.side_for(MAX_SYMBOL_MODULES)
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            module_size: 10,
            border: 4,
        }
    }
}

/// PNG bytes of a rendered QR symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage(Vec<u8>);

impl EncodedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<EncodedImage> for Vec<u8> {
    fn from(value: EncodedImage) -> Self {
        value.0
    }
}

/// encodes text as a byte-mode QR symbol and renders it to a black-on-white PNG.
///
/// The smallest version able to hold the text is chosen. Callers are expected
/// to reject blank text before getting here.
pub fn encode(text: &str, options: &RenderOptions) -> Result<EncodedImage> {
    let symbol = build_symbol(text)?;
    let raster = render(&symbol, options)?;

    let mut png = Vec::new();
    raster
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to serialize QR raster as PNG")?;

    Ok(EncodedImage(png))
}

fn build_symbol(text: &str) -> Result<QrCode, QrError> {
    let segments = [QrSegment::make_bytes(text.as_bytes())];
    QrCode::encode_segments_advanced(
        &segments,
        QrCodeEcc::Medium,
        Version::MIN,
        Version::MAX,
        None,
        false,
    )
    .map_err(|err: DataTooLong| {
        log::debug!("qr encoding failed: {}", err);
        QrError::ErrEncodingTooLarge { len: text.len() }
    })
}

fn render(symbol: &QrCode, options: &RenderOptions) -> Result<GrayImage, QrError> {
    if options.module_size == 0 {
        return Err(QrError::ErrInvalidRenderOptions(
            "module size must be positive".to_string(),
        ));
    }

    // size() is in 21..=177
    let modules = symbol.size() as u32;
    let side = options
        .side_for(modules)
        .filter(|side| *side <= MAX_IMAGE_SIDE)
        .ok_or_else(|| {
            QrError::ErrInvalidRenderOptions(format!(
                "image side exceeds {}px with module size {} and border {}",
                MAX_IMAGE_SIDE, options.module_size, options.border
            ))
        })?;

    let border = i64::from(options.border);
    let module_size = options.module_size;
    Ok(GrayImage::from_fn(side, side, |x, y| {
        let mx = i64::from(x / module_size) - border;
        let my = i64::from(y / module_size) - border;
        // get_module is false outside the symbol, which paints the quiet zone
        if symbol.get_module(mx as i32, my as i32) {
            DARK
        } else {
            LIGHT
        }
    }))
}
