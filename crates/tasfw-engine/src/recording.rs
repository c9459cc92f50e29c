//! M64 input recordings.
//!
//! Layout:
//!
//! | offset | size | content |
//! |---|---|---|
//! | `0x000` | 4 | signature `M64\x1A` |
//! | `0x004` | 4 | version (u32 LE) |
//! | `0x018` | 4 | sample count (u32 LE) |
//! | `0x400` | 4 × n | samples |
//!
//! Each sample is the buttons as a big-endian `u16` followed by the stick x
//! and y as `i8`. Header bytes other than the signature and sample count are
//! kept as read.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::diff::Diff;
use crate::inputs::Inputs;

/// Header length in bytes.
pub const HEADER_LEN: usize = 0x400;

const SIGNATURE: [u8; 4] = *b"M64\x1A";
const VERSION_OFFSET: usize = 0x004;
const CONTROLLER_COUNT_OFFSET: usize = 0x015;
const SAMPLE_COUNT_OFFSET: usize = 0x018;
const CONTROLLER_FLAGS_OFFSET: usize = 0x020;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reading or writing a recording.
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("recording I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not an M64 recording (bad signature)", path.display())]
    BadSignature { path: PathBuf },

    #[error("{} is truncated: {len} bytes is shorter than the 1024-byte header", path.display())]
    Truncated { path: PathBuf, len: usize },
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// An M64 recording held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    header: Vec<u8>,
    samples: Vec<Inputs>,
}

impl Default for Recording {
    fn default() -> Self {
        let mut header = vec![0u8; HEADER_LEN];
        header[..4].copy_from_slice(&SIGNATURE);
        header[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&3u32.to_le_bytes());
        header[CONTROLLER_COUNT_OFFSET] = 1;
        header[CONTROLLER_FLAGS_OFFSET..CONTROLLER_FLAGS_OFFSET + 4]
            .copy_from_slice(&1u32.to_le_bytes());
        Self {
            header,
            samples: Vec::new(),
        }
    }
}

impl Recording {
    /// Read a recording. A missing file is an empty recording.
    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "recording not found, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RecordingError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let recording = Self::parse(&bytes, path)?;
        tracing::info!(path = %path.display(), frames = recording.len(), "recording loaded");
        Ok(recording)
    }

    /// Parse recording bytes; `path` is only used in errors.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self, RecordingError> {
        if bytes.len() < HEADER_LEN {
            return Err(RecordingError::Truncated {
                path: path.to_path_buf(),
                len: bytes.len(),
            });
        }
        if bytes[..4] != SIGNATURE {
            return Err(RecordingError::BadSignature {
                path: path.to_path_buf(),
            });
        }
        let io_err = |source: std::io::Error| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut cursor = Cursor::new(&bytes[SAMPLE_COUNT_OFFSET..SAMPLE_COUNT_OFFSET + 4]);
        let declared = cursor.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        let available = (bytes.len() - HEADER_LEN) / 4;
        if declared > available {
            tracing::warn!(declared, available, "sample count exceeds file length, truncating");
        }

        let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
        let mut samples = Vec::with_capacity(declared.min(available));
        for _ in 0..declared.min(available) {
            let buttons = cursor.read_u16::<BigEndian>().map_err(io_err)?;
            let stick_x = cursor.read_i8().map_err(io_err)?;
            let stick_y = cursor.read_i8().map_err(io_err)?;
            samples.push(Inputs::new(buttons, stick_x, stick_y));
        }

        Ok(Self {
            header: bytes[..HEADER_LEN].to_vec(),
            samples,
        })
    }

    /// Write the recording, updating the sample count.
    pub fn save(&self, path: &Path) -> Result<(), RecordingError> {
        let io_err = |source: std::io::Error| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        };
        let bytes = self.to_bytes().map_err(io_err)?;
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        tracing::info!(path = %path.display(), frames = self.len(), "recording saved");
        Ok(())
    }

    /// Serialized form.
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.samples.len() * 4);
        out.extend_from_slice(&self.header);
        let count = u32::try_from(self.samples.len())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "too many samples"))?;
        (&mut out[SAMPLE_COUNT_OFFSET..SAMPLE_COUNT_OFFSET + 4]).write_u32::<LittleEndian>(count)?;
        for sample in &self.samples {
            out.write_u16::<BigEndian>(sample.buttons)?;
            out.write_i8(sample.stick_x)?;
            out.write_i8(sample.stick_y)?;
        }
        Ok(out)
    }

    /// Number of frames recorded.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Inputs of `frame`, if recorded.
    pub fn get(&self, frame: u32) -> Option<Inputs> {
        self.samples.get(frame as usize).copied()
    }

    /// Raw header bytes.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Every recorded frame as a diff.
    pub fn to_diff(&self) -> Diff {
        (0u32..).zip(self.samples.iter().copied()).collect()
    }

    /// Write every entry of `diff` into the recording, extending it with
    /// neutral inputs where needed.
    pub fn apply_diff(&mut self, diff: &Diff) {
        for (frame, inputs) in diff.iter() {
            let index = frame as usize;
            if index >= self.samples.len() {
                self.samples.resize(index + 1, Inputs::default());
            }
            self.samples[index] = inputs;
        }
    }
}

impl FromIterator<Inputs> for Recording {
    fn from_iter<I: IntoIterator<Item = Inputs>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}
