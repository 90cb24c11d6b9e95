//! Firmware image inspection
//!
//! An incoming image is either a raw `.bin` payload or a ROM-wrapped
//! `.rom` file carrying an OTA header at a size-dependent offset. The
//! descriptor records the logical image size announced to the CEC and
//! the transfer parameters the copy phase needs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ImageError;
use crate::protocol::{
    MB_SIZE, OTA_HEADER_OFFSET_1MB, OTA_HEADER_OFFSET_2MB, OTA_HEADER_SIZE, OTA_SIZE_FIELD_OFFSET,
};

/// Firmware kind carried by an image, selecting the StartFWUpdate id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Bmc,
    Ap,
}

/// On-disk format of an incoming image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Bin,
    Rom,
}

/// Inspected firmware image
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub path: PathBuf,
    pub file_size: u64,
    pub kind: ImageKind,
    pub format: ImageFormat,
    /// OTA header offset for ROM-wrapped images
    pub ota_offset: Option<u64>,
    /// Logical image size announced to the CEC
    pub logical_size: u32,
}

/// Select the OTA header offset from the total file size
///
/// Files up to 1 MiB carry the header at 0xFF000, larger files at
/// 0x1FF000.
pub fn ota_header_offset(file_size: u64) -> u64 {
    if file_size > MB_SIZE {
        OTA_HEADER_OFFSET_2MB
    } else {
        OTA_HEADER_OFFSET_1MB
    }
}

/// Compute the logical image size from an OTA header
///
/// The header stores the payload length little-endian at 0xE8; the
/// logical size adds the fixed header length.
pub fn logical_size_from_header(header: &[u8]) -> Result<u32, ImageError> {
    if header.len() < OTA_SIZE_FIELD_OFFSET + 4 {
        return Err(ImageError::BadHeader(format!(
            "header of {} bytes is truncated",
            header.len()
        )));
    }
    let field = u32::from_le_bytes([
        header[OTA_SIZE_FIELD_OFFSET],
        header[OTA_SIZE_FIELD_OFFSET + 1],
        header[OTA_SIZE_FIELD_OFFSET + 2],
        header[OTA_SIZE_FIELD_OFFSET + 3],
    ]);
    field
        .checked_add(OTA_HEADER_SIZE)
        .ok_or_else(|| ImageError::BadHeader("logical size overflows 32 bits".to_string()))
}

impl ImageDescriptor {
    /// Inspect an image file and build its descriptor
    ///
    /// Fails before any I2C command is sent when the file is missing,
    /// carries an unknown extension, or is smaller than the OTA header.
    pub fn inspect(path: &Path, kind: ImageKind) -> Result<Self, ImageError> {
        let meta = std::fs::metadata(path).map_err(|_| ImageError::Missing(path.to_path_buf()))?;
        if !meta.is_file() {
            return Err(ImageError::Missing(path.to_path_buf()));
        }
        let file_size = meta.len();

        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => ImageFormat::Bin,
            Some("rom") => ImageFormat::Rom,
            _ => return Err(ImageError::BadExtension(path.to_path_buf())),
        };

        if file_size < u64::from(OTA_HEADER_SIZE) {
            return Err(ImageError::TooSmall {
                size: file_size,
                min: u64::from(OTA_HEADER_SIZE),
            });
        }

        let (ota_offset, logical_size) = match format {
            ImageFormat::Bin => {
                let logical = u32::try_from(file_size).map_err(|_| {
                    ImageError::BadHeader("image exceeds the 32-bit size limit".to_string())
                })?;
                (None, logical)
            }
            ImageFormat::Rom => {
                let offset = ota_header_offset(file_size);
                if file_size < offset + u64::from(OTA_HEADER_SIZE) {
                    return Err(ImageError::BadHeader(format!(
                        "file of {file_size} bytes has no OTA header at 0x{offset:X}"
                    )));
                }
                let header = read_header(path, offset)?;
                (Some(offset), logical_size_from_header(&header)?)
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            file_size,
            kind,
            format,
            ota_offset,
            logical_size,
        })
    }
}

fn read_header(path: &Path, offset: u64) -> Result<Vec<u8>, ImageError> {
    let mut file = File::open(path).map_err(|_| ImageError::Missing(path.to_path_buf()))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ImageError::BadHeader(e.to_string()))?;
    let mut header = vec![0u8; OTA_HEADER_SIZE as usize];
    file.read_exact(&mut header)
        .map_err(|e| ImageError::BadHeader(e.to_string()))?;
    Ok(header)
}
