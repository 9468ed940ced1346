//! Downloading and re-encoding article images.
//!
//! Every image is stored as a JPEG below a byte budget. Quality starts at
//! [`START_QUALITY`] and drops by [`QUALITY_STEP`] until the encoded size
//! fits, never going below [`QUALITY_FLOOR`]; at the floor the last encoding
//! is accepted even if it is still over budget.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, RgbImage};
use thiserror::Error;

use crate::app::KingsError;
use crate::domain::EmbeddedImage;
use crate::fetcher::Fetcher;

pub const START_QUALITY: u8 = 95;
pub const QUALITY_STEP: u8 = 5;
pub const QUALITY_FLOOR: u8 = 10;

/// Random bytes per image token; 5 bytes = 10 hex chars = 40 bits.
const TOKEN_BYTES: usize = 5;

pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

/// Why an image could not be embedded. The renderer drops the `<img>` node
/// and keeps the rest of the article.
#[derive(Debug, Error)]
pub enum EmbedFailure {
    #[error("error downloading image {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: KingsError,
    },

    #[error("error decoding image {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: ImageError,
    },

    #[error("error encoding image {url}: {source}")]
    Encode {
        url: String,
        #[source]
        source: ImageError,
    },
}

/// Output of [`compress`].
#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    /// Quality the bytes were encoded at.
    pub quality: u8,
}

pub struct ImageEmbedder {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    max_bytes: usize,
}

impl ImageEmbedder {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>, max_bytes: usize) -> Self {
        Self { fetcher, max_bytes }
    }

    /// Fetch `image_url` and return it as a JPEG asset under the byte
    /// budget. Adding the asset to a book is up to the caller.
    pub async fn embed(&self, image_url: &str) -> Result<EmbeddedImage, EmbedFailure> {
        let body = self
            .fetcher
            .fetch(image_url)
            .await
            .map_err(|source| EmbedFailure::Fetch {
                url: image_url.to_string(),
                source,
            })?;

        let image = image::load_from_memory(&body).map_err(|source| EmbedFailure::Decode {
            url: image_url.to_string(),
            source,
        })?;

        let compressed = compress(&image, self.max_bytes).map_err(|source| EmbedFailure::Encode {
            url: image_url.to_string(),
            source,
        })?;

        let token = new_token();
        let embedded = EmbeddedImage {
            file_name: format!("images/img_{token}.jpg"),
            internal_id: token,
            media_type: JPEG_MEDIA_TYPE.to_string(),
            content: compressed.bytes,
        };

        tracing::info!(
            "Embedded compressed image {} as {} ({} bytes, quality {})",
            image_url,
            embedded.file_name,
            embedded.content.len(),
            compressed.quality
        );

        Ok(embedded)
    }
}

/// Fresh hex token for an image id.
pub fn new_token() -> String {
    hex::encode(rand::random::<[u8; TOKEN_BYTES]>())
}

/// Encode `image` as JPEG no larger than `max_bytes`, lowering quality step
/// by step and stopping at [`QUALITY_FLOOR`].
pub fn compress(image: &DynamicImage, max_bytes: usize) -> Result<Compressed, ImageError> {
    // JPEG has no alpha channel.
    let rgb = image.to_rgb8();

    let mut quality = START_QUALITY;
    let mut bytes = encode_jpeg(&rgb, quality)?;

    while bytes.len() > max_bytes && quality > QUALITY_FLOOR {
        quality = quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
        bytes = encode_jpeg(&rgb, quality)?;
    }

    Ok(Compressed { bytes, quality })
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf.into_inner())
}
