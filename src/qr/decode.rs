use log::debug;
use rqrr::PreparedImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// payload of the first symbol that decoded successfully
    Found(String),
    /// the image was readable but holds no decodable symbol
    NotFound,
    /// the bytes are not an image we can decompress
    Unreadable,
}

/// decodes the first QR symbol found in an image of any supported format.
///
/// Never fails: malformed input is reported as [`DecodeResult::Unreadable`].
pub fn decode(bytes: &[u8]) -> DecodeResult {
    let raster = match image::load_from_memory(bytes) {
        Ok(img) => img.to_luma8(),
        Err(err) => {
            debug!("image is unreadable: {}", err);
            return DecodeResult::Unreadable;
        }
    };

    let (width, height) = raster.dimensions();
    let mut prepared =
        PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            raster.get_pixel(x as u32, y as u32).0[0]
        });

    let grids = prepared.detect_grids();
    debug!("detected {} candidate grid(s)", grids.len());

    for grid in grids {
        match grid.decode() {
            Ok((_, content)) if !content.is_empty() => return DecodeResult::Found(content),
            Ok(_) => debug!("skipping grid with empty payload"),
            Err(err) => debug!("failed to decode grid: {:?}", err),
        }
    }

    DecodeResult::NotFound
}
