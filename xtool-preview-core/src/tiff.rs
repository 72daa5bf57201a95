//! Baseline TIFF decoder for the uncompressed strip-based files the
//! capture tools emit.
//!
//! Only what `idevicescreenshot` actually produces is handled: little-
//! or big-endian byte order, magic 42, a single IFD, compression 1,
//! 8-bit RGB/RGBA samples stored as a sequence of strips. Anything
//! else is rejected with a typed error rather than guessed at.

use crate::error::PreviewError;

// ── Tag numbers ──────────────────────────────────────────────────

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;

/// Field type `SHORT` (2-byte unsigned). Every other type encountered
/// here is read as a 4-byte `LONG`.
const TYPE_SHORT: u16 = 3;

// ── RawImage ─────────────────────────────────────────────────────

/// A decoded uncompressed bitmap.
///
/// `pixels` is the concatenation of the file's strips in order and
/// holds at least `width * height * samples_per_pixel` bytes.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bytes per pixel: 3 (RGB) or 4 (RGBA).
    pub samples_per_pixel: u8,
    /// Strip data, concatenated.
    pub pixels: Vec<u8>,
}

// ── Byte-order aware reader ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// Bounds-checked fixed-width reads over the raw input.
struct Reader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn u16(&self, offset: usize) -> Result<u16, PreviewError> {
        let bytes: [u8; 2] = self
            .data
            .get(offset..offset + 2)
            .ok_or(PreviewError::TiffOutOfBounds)?
            .try_into()
            .expect("slice length checked");
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(&self, offset: usize) -> Result<u32, PreviewError> {
        let bytes: [u8; 4] = self
            .data
            .get(offset..offset + 4)
            .ok_or(PreviewError::TiffOutOfBounds)?
            .try_into()
            .expect("slice length checked");
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }
}

// ── IFD entries ──────────────────────────────────────────────────

/// One 12-byte IFD entry: tag, field type, count, and the 4-byte
/// value slot (either an immediate value or an offset to an array).
#[derive(Debug, Clone, Copy)]
struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    /// Byte offset of the 4-byte value slot within the file.
    slot: usize,
}

impl IfdEntry {
    /// Scalar value of a `count = 1` entry. A SHORT occupies the low
    /// two bytes of the slot; anything else is read as a LONG.
    fn scalar(&self, r: &Reader) -> Result<u32, PreviewError> {
        if self.field_type == TYPE_SHORT {
            Ok(u32::from(r.u16(self.slot)?))
        } else {
            r.u32(self.slot)
        }
    }

    /// Value array. A single-element entry is immediate; otherwise the
    /// slot holds an offset to the external array. SHORT arrays use
    /// 2-byte items, everything else 4-byte items.
    fn array(&self, r: &Reader) -> Result<Vec<u32>, PreviewError> {
        if self.count <= 1 {
            return Ok(vec![self.scalar(r)?]);
        }
        let base = r.u32(self.slot)? as usize;
        let item = if self.field_type == TYPE_SHORT { 2 } else { 4 };
        let mut values = Vec::with_capacity(self.count as usize);
        for i in 0..self.count as usize {
            let offset = base + i * item;
            values.push(if item == 2 {
                u32::from(r.u16(offset)?)
            } else {
                r.u32(offset)?
            });
        }
        Ok(values)
    }
}

// ── Decoder ──────────────────────────────────────────────────────

/// Decode an uncompressed baseline TIFF into a [`RawImage`].
pub fn decode(data: &[u8]) -> Result<RawImage, PreviewError> {
    if data.len() < 8 {
        return Err(PreviewError::InvalidTiffHeader);
    }

    let order = match &data[0..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return Err(PreviewError::InvalidTiffHeader),
    };
    let r = Reader { data, order };

    if r.u16(2)? != 42 {
        return Err(PreviewError::InvalidTiffHeader);
    }

    let ifd_offset = r.u32(4)? as usize;
    let entry_count = r.u16(ifd_offset)? as usize;

    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;
    let mut samples: u32 = 3;
    let mut compression: u32 = 1;
    let mut strip_offsets: Option<Vec<u32>> = None;
    let mut strip_counts: Option<Vec<u32>> = None;

    for i in 0..entry_count {
        let at = ifd_offset + 2 + i * 12;
        let entry = IfdEntry {
            tag: r.u16(at)?,
            field_type: r.u16(at + 2)?,
            count: r.u32(at + 4)?,
            slot: at + 8,
        };

        match entry.tag {
            TAG_IMAGE_WIDTH => width = Some(entry.scalar(&r)?),
            TAG_IMAGE_LENGTH => height = Some(entry.scalar(&r)?),
            TAG_COMPRESSION => compression = entry.scalar(&r)?,
            TAG_SAMPLES_PER_PIXEL => samples = entry.scalar(&r)?,
            TAG_STRIP_OFFSETS => strip_offsets = Some(entry.array(&r)?),
            TAG_STRIP_BYTE_COUNTS => strip_counts = Some(entry.array(&r)?),
            _ => {}
        }
    }

    if compression != 1 {
        return Err(PreviewError::UnsupportedFormat(format!(
            "compressed TIFF (compression={compression})"
        )));
    }
    if !matches!(samples, 3 | 4) {
        return Err(PreviewError::UnsupportedFormat(format!(
            "samples per pixel {samples}"
        )));
    }

    let width = width.ok_or(PreviewError::MissingTag(TAG_IMAGE_WIDTH))?;
    let height = height.ok_or(PreviewError::MissingTag(TAG_IMAGE_LENGTH))?;
    let offsets = strip_offsets.ok_or(PreviewError::MissingTag(TAG_STRIP_OFFSETS))?;
    let counts = strip_counts.ok_or(PreviewError::MissingTag(TAG_STRIP_BYTE_COUNTS))?;

    // Concatenate strips. A missing byte count on the final strip means
    // it extends to the end of the buffer.
    let mut pixels = Vec::new();
    for (i, &offset) in offsets.iter().enumerate() {
        let start = offset as usize;
        let end = match counts.get(i) {
            Some(&count) => start + count as usize,
            None if i == offsets.len() - 1 => data.len(),
            None => return Err(PreviewError::MissingTag(TAG_STRIP_BYTE_COUNTS)),
        };
        let strip = data.get(start..end).ok_or(PreviewError::TiffOutOfBounds)?;
        pixels.extend_from_slice(strip);
    }

    let expected = width as usize * height as usize * samples as usize;
    if pixels.len() < expected {
        return Err(PreviewError::TiffOutOfBounds);
    }

    Ok(RawImage {
        width,
        height,
        samples_per_pixel: samples as u8,
        pixels,
    })
}

// ── Tests ────────────────────────────────────────────────────────
