//! Binary range log frame decoding.
//!
//! A sensor log is a plain sequence of frames with no delimiter other than
//! the marker byte of the next frame:
//!
//! | Field        | Size   | Encoding                         |
//! |--------------|--------|----------------------------------|
//! | marker       | 1      | ASCII `+`                        |
//! | version      | 3      | ASCII digits                     |
//! | seconds      | 10     | ASCII digits (unix time)         |
//! | milliseconds | 3      | ASCII digits                     |
//! | reserved     | 10     | opaque                           |
//! | length N     | 5      | ASCII hex                        |
//! | samples      | 2 * N  | little-endian `i16`              |

use std::io::{self, Read, Write};

use thiserror::Error;

/// Frame start marker.
pub const FRAME_MARKER: u8 = b'+';

const VERSION_LEN: usize = 3;
const SECONDS_LEN: usize = 10;
const MILLIS_LEN: usize = 3;
const RESERVED_LEN: usize = 10;
const LENGTH_LEN: usize = 5;

/// Largest sample count representable by the 5-digit hex length field.
pub const MAX_SAMPLES: usize = 0xF_FFFF;

/// Errors that can occur while decoding frames.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Expected frame marker '+', found byte 0x{0:02x}")]
    BadMarker(u8),

    #[error("Invalid {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Truncated frame: {field} needs {expected} bytes, only {read} available")]
    Truncated {
        field: &'static str,
        expected: usize,
        read: usize,
    },
}

impl FrameError {
    /// True if the stream ended inside a frame.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        matches!(self, FrameError::Truncated { .. })
    }

    /// True if the stream is misaligned and cannot be resumed.
    #[inline]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, FrameError::BadMarker(_) | FrameError::InvalidField { .. })
    }
}

/// Result type for frame operations.
pub type Result<T> = std::result::Result<T, FrameError>;

/// One decoded log record.
///
/// Header fields are kept as the raw bytes found in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub version: [u8; VERSION_LEN],
    pub seconds: [u8; SECONDS_LEN],
    pub millis: [u8; MILLIS_LEN],
    pub reserved: [u8; RESERVED_LEN],
    pub samples: Vec<i16>,
}

impl RawFrame {
    /// Version field as text.
    pub fn version(&self) -> String {
        String::from_utf8_lossy(&self.version).into_owned()
    }

    /// Timestamp in milliseconds since the unix epoch.
    pub fn timestamp_ms(&self) -> Result<i64> {
        let seconds = parse_digits("seconds", &self.seconds)?;
        let millis = parse_digits("milliseconds", &self.millis)?;
        Ok(seconds * 1000 + millis)
    }

    /// Number of range samples in this frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn parse_digits(field: &'static str, bytes: &[u8]) -> Result<i64> {
    let invalid = || FrameError::InvalidField {
        field,
        value: String::from_utf8_lossy(bytes).into_owned(),
    };

    let text = std::str::from_utf8(bytes).map_err(|_| invalid())?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    text.parse::<i64>().map_err(|_| invalid())
}

/// Read up to `buf.len()` bytes, returning how many were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_field<R: Read, const N: usize>(reader: &mut R, field: &'static str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    let read = read_full(reader, &mut buf)?;
    if read < N {
        return Err(FrameError::Truncated {
            field,
            expected: N,
            read,
        });
    }
    Ok(buf)
}

/// Decode exactly one frame from a reader positioned at a frame boundary.
///
/// Returns `Ok(None)` when the stream is exhausted before the marker byte.
/// On success the reader is positioned at the next frame's marker.
///
/// # Errors
///
/// - [`FrameError::BadMarker`] / [`FrameError::InvalidField`] if the header
///   does not follow the frame layout
/// - [`FrameError::Truncated`] if the stream ends inside the frame
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<RawFrame>> {
    let mut marker = [0u8; 1];
    if read_full(reader, &mut marker)? == 0 {
        return Ok(None);
    }
    if marker[0] != FRAME_MARKER {
        return Err(FrameError::BadMarker(marker[0]));
    }

    let version = read_field::<_, VERSION_LEN>(reader, "version")?;
    let seconds = read_field::<_, SECONDS_LEN>(reader, "seconds")?;
    let millis = read_field::<_, MILLIS_LEN>(reader, "milliseconds")?;
    let reserved = read_field::<_, RESERVED_LEN>(reader, "reserved")?;
    let length = read_field::<_, LENGTH_LEN>(reader, "length")?;

    let length_text = std::str::from_utf8(&length)
        .ok()
        .map(str::trim)
        .filter(|text| !text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit()));
    let num_samples = length_text
        .and_then(|text| usize::from_str_radix(text, 16).ok())
        .ok_or_else(|| FrameError::InvalidField {
            field: "length",
            value: String::from_utf8_lossy(&length).into_owned(),
        })?;

    let mut data = vec![0u8; num_samples * 2];
    let read = read_full(reader, &mut data)?;
    if read < data.len() {
        return Err(FrameError::Truncated {
            field: "samples",
            expected: data.len(),
            read,
        });
    }

    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(Some(RawFrame {
        version,
        seconds,
        millis,
        reserved,
        samples,
    }))
}

/// Sequential frame reader over one sensor log.
///
/// Iteration yields frames until end-of-stream and stops after the first
/// error, since the cursor can no longer be trusted to sit on a boundary.
pub struct FrameDecoder<R> {
    reader: R,
    frames_read: usize,
    finished: bool,
}

impl<R: Read> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames_read: 0,
            finished: false,
        }
    }

    /// Decode the next frame, `Ok(None)` at end-of-stream.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.finished {
            return Ok(None);
        }

        match read_frame(&mut self.reader) {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Number of frames decoded so far.
    #[inline]
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for FrameDecoder<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Encode one frame in the log layout.
///
/// `seconds` and `millis` are written zero-padded; `reserved` is written
/// verbatim.
///
/// # Errors
///
/// Returns [`FrameError::InvalidField`] if a value does not fit its field.
pub fn encode_frame<W: Write>(
    writer: &mut W,
    seconds: u64,
    millis: u16,
    samples: &[i16],
) -> Result<()> {
    let seconds_text = format!("{:010}", seconds);
    if seconds_text.len() != SECONDS_LEN {
        return Err(FrameError::InvalidField {
            field: "seconds",
            value: seconds_text,
        });
    }
    if millis > 999 {
        return Err(FrameError::InvalidField {
            field: "milliseconds",
            value: millis.to_string(),
        });
    }
    if samples.len() > MAX_SAMPLES {
        return Err(FrameError::InvalidField {
            field: "length",
            value: samples.len().to_string(),
        });
    }

    let mut header =
        Vec::with_capacity(1 + VERSION_LEN + SECONDS_LEN + MILLIS_LEN + RESERVED_LEN + LENGTH_LEN);
    header.push(FRAME_MARKER);
    header.extend_from_slice(b"003");
    header.extend_from_slice(seconds_text.as_bytes());
    header.extend_from_slice(format!("{:03}", millis).as_bytes());
    header.extend_from_slice(&[b'0'; RESERVED_LEN]);
    header.extend_from_slice(format!("{:05x}", samples.len()).as_bytes());
    writer.write_all(&header)?;

    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    writer.write_all(&data)?;

    Ok(())
}
