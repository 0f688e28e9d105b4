use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};

use crate::error::RegionError;

/// Compression format tag stored in front of every region payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    Gzip = 1,
    #[default]
    Zlib = 2,
    None = 3,
    Lz4 = 4,
}

impl Compression {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, RegionError> {
        match tag {
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Zlib),
            3 => Ok(Compression::None),
            4 => Ok(Compression::Lz4),
            other => Err(RegionError::UnknownCompression(other)),
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, RegionError> {
        match self {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, RegionError> {
        let mut out = Vec::new();
        match self {
            Compression::Gzip => {
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| RegionError::Corrupt(format!("gzip: {e}")))?;
            }
            Compression::Zlib => {
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| RegionError::Corrupt(format!("zlib: {e}")))?;
            }
            Compression::None => out.extend_from_slice(data),
            Compression::Lz4 => {
                out = lz4_flex::decompress_size_prepended(data)
                    .map_err(|e| RegionError::Corrupt(format!("lz4: {e}")))?;
            }
        }
        Ok(out)
    }
}
