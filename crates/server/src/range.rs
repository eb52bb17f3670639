//! `Range: bytes=...` handling for chunked audio delivery.

/// Largest window served by one 206 response.
pub const CHUNK_SIZE: u64 = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Shrinks the window to at most `chunk` bytes from `start`.
    pub fn clamp_to(self, chunk: u64) -> Self {
        let last = self.start.saturating_add(chunk.max(1) - 1);
        Self {
            start: self.start,
            end: self.end.min(last),
        }
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    Invalid,
    Unsatisfiable,
}

fn range_spec(value: &str) -> Result<&str, RangeError> {
    let spec = value.trim().strip_prefix("bytes=").ok_or(RangeError::Invalid)?;
    if spec.contains(',') {
        return Err(RangeError::Invalid);
    }
    Ok(spec.trim())
}

pub fn parse_range_header(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = range_spec(value)?;
    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let suffix: u64 = suffix.parse().map_err(|_| RangeError::Invalid)?;
        if suffix == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let (start, end) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    let start: u64 = start.parse().map_err(|_| RangeError::Invalid)?;
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }
    let end = if end.is_empty() {
        size - 1
    } else {
        let end: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
        if end < start {
            return Err(RangeError::Invalid);
        }
        end.min(size - 1)
    };
    Ok(ByteRange { start, end })
}

/// Window for one chunk of a file of known size. A missing header starts
/// at zero.
pub fn chunk_window(header: Option<&str>, size: u64) -> Result<ByteRange, RangeError> {
    let range = match header {
        Some(value) => parse_range_header(value, size)?,
        None if size == 0 => return Err(RangeError::Unsatisfiable),
        None => ByteRange {
            start: 0,
            end: size - 1,
        },
    };
    Ok(range.clamp_to(CHUNK_SIZE))
}

/// First requested byte when the final size is not known yet. Suffix
/// ranges need the size and are rejected.
pub fn parse_range_start(header: Option<&str>) -> Result<u64, RangeError> {
    let Some(value) = header else {
        return Ok(0);
    };
    let spec = range_spec(value)?;
    let (start, _) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    start.parse().map_err(|_| RangeError::Invalid)
}
