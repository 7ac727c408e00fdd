//! Encoding of page data for the transfer into the algorithm's data buffer.
//!
//! The encoding must mirror exactly what the on-target algorithm expects:
//! the algorithm blob of a `Miniz` algorithm contains the matching
//! decompressor. Using the wrong codec loads runnable-looking but corrupt
//! data with no host-visible error until verification fails.

use chipflash_target::TransferEncoding;

use super::builder::{FlashLayout, FlashPage};
use super::FlashError;

/// Compresses `data` into a zlib stream, as expected by miniz-decoding
/// flash loaders.
pub fn compress(data: &[u8]) -> Vec<u8> {
    // Level 10: spend host time to save transfer time.
    miniz_oxide::deflate::compress_to_vec_zlib(data, 10)
}

/// Decompresses a zlib stream produced by [`compress`].
///
/// For all byte sequences `x`, `decompress(&compress(x))` returns `x`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, FlashError> {
    miniz_oxide::inflate::decompress_to_vec_zlib(data).map_err(|_| FlashError::Decompression)
}

/// Transforms a [`FlashLayout`]'s pages into the transfer page stream the
/// flash algorithm accepts.
///
/// For the `Raw` encoding the layout's pages pass through unchanged. For
/// `Miniz`, contiguous runs of pages form an image which is compressed as
/// one zlib stream, prefixed with its 4-byte little-endian compressed
/// length, and chunked into buffer-sized transfer pages. All chunks of an
/// image carry the image's start address; the on-target loader tracks the
/// write offset within the current image and recognizes a new image by the
/// first non-full chunk.
pub struct FlashEncoder {
    pages: Vec<FlashPage>,
}

impl FlashEncoder {
    /// Creates the transfer page stream for the given layout.
    pub fn new(encoding: TransferEncoding, layout: &FlashLayout) -> Self {
        let pages = match encoding {
            TransferEncoding::Raw => layout.pages().to_vec(),
            TransferEncoding::Miniz => Self::compressed_pages(layout),
        };

        Self { pages }
    }

    fn compressed_pages(layout: &FlashLayout) -> Vec<FlashPage> {
        let mut pages = Vec::new();

        let Some(first) = layout.pages().first() else {
            return pages;
        };
        let chunk_size = first.data().len();

        let mut emit_image = |image: &[u8], start_address: u64| {
            if image.is_empty() {
                return;
            }

            let compressed = compress(image);
            tracing::debug!(
                "compressed image at {:#010x}: {} -> {} bytes",
                start_address,
                image.len(),
                compressed.len()
            );

            // The first chunk leads with the total compressed length.
            let first_len = compressed.len().min(chunk_size - 4);
            let (first, rest) = compressed.split_at(first_len);
            let first_chunk = (compressed.len() as u32)
                .to_le_bytes()
                .into_iter()
                .chain(first.iter().copied())
                .collect::<Vec<u8>>();

            pages.push(FlashPage {
                address: start_address,
                data: first_chunk,
            });
            for chunk in rest.chunks(chunk_size) {
                pages.push(FlashPage {
                    address: start_address,
                    data: chunk.to_vec(),
                });
            }
        };

        let mut image = Vec::new();
        let mut image_start = 0;

        for page in layout.pages() {
            if page.address() != image_start + image.len() as u64 {
                emit_image(&image, image_start);
                image.clear();
                image_start = page.address();
            }
            image.extend_from_slice(page.data());
        }
        emit_image(&image, image_start);

        pages
    }

    /// Returns the pages to transfer, in programming order.
    pub fn pages(&self) -> &[FlashPage] {
        &self.pages
    }

    /// Returns the total number of bytes that go over the transport.
    pub fn program_size(&self) -> u64 {
        self.pages.iter().map(|page| page.data().len() as u64).sum()
    }
}
