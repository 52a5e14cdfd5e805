//! Artwork fetch and validation.
//!
//! The status surface hands artwork to the OS by URL, so this module only
//! has to prove that a URL points at a decodable image before it is
//! published. Any failure falls back silently to no artwork.

use std::io::Read;

use image::GenericImageView;
use log::{debug, warn};

use crate::protocol::ArtworkImage;

const MAX_ARTWORK_BYTES: u64 = 8 * 1024 * 1024;

/// Fetches and validates artwork. `None` on any failure.
pub fn fetch_artwork(http_client: &ureq::Agent, url: &str) -> Option<ArtworkImage> {
    if url.trim().is_empty() {
        return None;
    }
    let response = match http_client.get(url).call() {
        Ok(response) => response,
        Err(error) => {
            warn!("Artwork: failed to fetch {}: {}", url, error);
            return None;
        }
    };
    let mut bytes = Vec::new();
    if let Err(error) = response
        .into_reader()
        .take(MAX_ARTWORK_BYTES)
        .read_to_end(&mut bytes)
    {
        warn!("Artwork: failed to read {}: {}", url, error);
        return None;
    }
    decode_artwork(url, &bytes)
}

fn decode_artwork(url: &str, bytes: &[u8]) -> Option<ArtworkImage> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => {
            let (width, height) = decoded.dimensions();
            debug!("Artwork: validated {} ({}x{})", url, width, height);
            Some(ArtworkImage {
                url: url.to_string(),
                width,
                height,
            })
        }
        Err(error) => {
            warn!("Artwork: {} is not a decodable image: {}", url, error);
            None
        }
    }
}
