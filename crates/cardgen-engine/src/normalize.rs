use std::io::Cursor;

use cardgen_contracts::error::{StudioError, StudioResult};
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};

/// Decodes any supported upload and re-encodes it as an RGBA8 PNG, the one
/// format the edit endpoint accepts regardless of what was uploaded.
pub fn normalize(raw: &[u8]) -> StudioResult<Vec<u8>> {
    let image = decode_image(raw)?;
    encode_png(&DynamicImage::ImageRgba8(image.to_rgba8()))
}

/// Normalizes every reference and returns the first one. Any undecodable
/// reference rejects the whole set.
pub fn normalize_references(references: &[Vec<u8>]) -> StudioResult<Option<Vec<u8>>> {
    let mut normalized = Vec::with_capacity(references.len());
    for (idx, raw) in references.iter().enumerate() {
        let png = normalize(raw).map_err(|err| match err {
            StudioError::Decode(message) => {
                StudioError::Decode(format!("reference image {}: {message}", idx + 1))
            }
            other => other,
        })?;
        normalized.push(png);
    }
    Ok(normalized.into_iter().next())
}

pub fn decode_image(raw: &[u8]) -> StudioResult<DynamicImage> {
    if raw.is_empty() {
        return Err(StudioError::Decode("image data is empty".to_string()));
    }
    image::load_from_memory(raw).map_err(|err| StudioError::Decode(err.to_string()))
}

pub fn encode_png(image: &DynamicImage) -> StudioResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| StudioError::Export(format!("PNG encode failed: {err}")))?;
    Ok(buffer.into_inner())
}

/// Short stable identifier of an image's pixels, used in listings and the
/// session log.
pub fn fingerprint(image: &DynamicImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_be_bytes());
    hasher.update(image.height().to_be_bytes());
    hasher.update(image.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}
