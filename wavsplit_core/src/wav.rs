//! Streaming reader and random-access writer for RIFF/WAVE integer PCM files.
//!
//! The reader parses the RIFF header, the `fmt ` sub-chunk, and skips any
//! intervening chunks (`LIST`, `fact`, `JUNK`, `bext`, ...) until it reaches
//! `data`, after which it hands out the raw PCM byte stream. The writer lays
//! out a canonical 44-byte PCM header lazily on the first positional write and
//! patches the two length fields when closed, so payload bytes can be written
//! at arbitrary disjoint offsets by concurrent producers.
//!
//! Samples are never interpreted numerically anywhere in this module; both
//! halves move opaque little-endian PCM bytes.

use std::fs::File;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;

/// Canonical PCM header length; payload offsets are relative to this.
const HEADER_LEN: u64 = 44;

/// Sample widths the byte-wise pipeline can carry.
const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Errors raised while parsing or finalizing a wav file.
#[derive(Debug, Error)]
pub enum WavError {
    /// Wrapper around IO errors from the underlying byte source or sink.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the ASCII `RIFF` magic.
    #[error("missing RIFF magic")]
    MissingRiff,

    /// The RIFF form type is not `WAVE`.
    #[error("missing WAVE magic")]
    MissingWave,

    /// The first sub-chunk is not `fmt `.
    #[error("missing fmt chunk")]
    MissingFmt,

    /// The `fmt ` chunk size is not one of the known PCM layouts (16, 18, 40).
    #[error("unsupported fmt chunk size {0}")]
    UnsupportedFmtSize(u32),

    /// The audio format field is not 1 (integer PCM).
    #[error("audio format {0} is not integer PCM")]
    NotPcm(u16),

    /// The channel count field is zero or above 255.
    #[error("invalid channel count {0}")]
    InvalidChannelCount(u16),

    /// The sample rate field is zero.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    /// The bits-per-sample field is not 8, 16, 24, or 32.
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),

    /// The file ended before a `data` chunk was found.
    #[error("no data chunk found")]
    MissingDataChunk,

    /// The written payload no longer fits the 32-bit RIFF length fields.
    #[error("wav data exceeds the 4 GiB format limit")]
    DataTooLarge,
}

/// Format of a PCM stream, as recorded in the `fmt ` chunk plus the size of
/// the `data` payload that follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavSpec {
    pub audio_format: u16,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Size of the `data` chunk payload in bytes.
    pub data_size: u32,
}

impl WavSpec {
    /// Width of a single sample in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Width of one frame (one sample across every channel) in bytes,
    /// derived from the channel count and bit depth rather than trusting the
    /// file's own `block_align` field.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.num_channels) * self.bytes_per_sample()
    }

    /// Number of whole frames in the `data` payload.
    pub fn frames(&self) -> u64 {
        u64::from(self.data_size) / self.frame_bytes() as u64
    }

    /// Bytes covering one second of interleaved PCM.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }
}

/// Streaming parser over a wav byte source.
///
/// [`read_header`](WavReader::read_header) is idempotent; after it succeeds
/// the reader is positioned at the first PCM byte and
/// [`read`](WavReader::read) drains the payload. The reader does not clamp
/// reads at `data_size`; callers that must not consume trailing chunks keep
/// their own count.
#[derive(Debug)]
pub struct WavReader<R: Read> {
    inner: R,
    spec: Option<WavSpec>,
}

impl<R: Read> WavReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, spec: None }
    }

    /// Format fields, available once the header has been parsed.
    pub fn spec(&self) -> Option<&WavSpec> {
        self.spec.as_ref()
    }

    /// Parse the RIFF/`fmt ` header and scan forward to the `data` chunk.
    ///
    /// Calling this again after it succeeded is a no-op.
    pub fn read_header(&mut self) -> Result<&WavSpec, WavError> {
        if self.spec.is_some() {
            return Ok(self.spec.as_ref().expect("header just checked"));
        }

        let riff = self.take::<12>()?;
        if &riff[0..4] != b"RIFF" {
            return Err(WavError::MissingRiff);
        }
        // bytes 4..8 hold the file size minus 8; read but not validated
        if &riff[8..12] != b"WAVE" {
            return Err(WavError::MissingWave);
        }

        let fmt_head = self.take::<8>()?;
        if &fmt_head[0..4] != b"fmt " {
            return Err(WavError::MissingFmt);
        }
        let fmt_size = u32::from_le_bytes(fmt_head[4..8].try_into().expect("4 byte slice"));
        if !matches!(fmt_size, 16 | 18 | 40) {
            return Err(WavError::UnsupportedFmtSize(fmt_size));
        }

        let fmt = self.take::<16>()?;
        let audio_format = u16::from_le_bytes(fmt[0..2].try_into().expect("2 byte slice"));
        let num_channels = u16::from_le_bytes(fmt[2..4].try_into().expect("2 byte slice"));
        let sample_rate = u32::from_le_bytes(fmt[4..8].try_into().expect("4 byte slice"));
        let byte_rate = u32::from_le_bytes(fmt[8..12].try_into().expect("4 byte slice"));
        let block_align = u16::from_le_bytes(fmt[12..14].try_into().expect("2 byte slice"));
        let bits_per_sample = u16::from_le_bytes(fmt[14..16].try_into().expect("2 byte slice"));

        if audio_format != 1 {
            return Err(WavError::NotPcm(audio_format));
        }
        if num_channels == 0 || num_channels > 255 {
            return Err(WavError::InvalidChannelCount(num_channels));
        }
        if sample_rate == 0 {
            return Err(WavError::InvalidSampleRate(sample_rate));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&bits_per_sample) {
            return Err(WavError::UnsupportedBitDepth(bits_per_sample));
        }

        // extension bytes carried by the 18- and 40-byte fmt layouts
        self.skip(u64::from(fmt_size) - 16)?;

        let data_size = loop {
            let chunk_head = match self.take::<8>() {
                Ok(head) => head,
                Err(WavError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(WavError::MissingDataChunk);
                }
                Err(err) => return Err(err),
            };
            let size = u32::from_le_bytes(chunk_head[4..8].try_into().expect("4 byte slice"));
            if &chunk_head[0..4] == b"data" {
                break size;
            }
            // RIFF chunks are word aligned; odd sizes carry a pad byte
            self.skip(u64::from(size) + u64::from(size & 1))?;
        };

        Ok(self.spec.insert(WavSpec {
            audio_format,
            num_channels,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample,
            data_size,
        }))
    }

    /// Fill `dst` from the PCM payload, parsing the header first if needed.
    ///
    /// Returns the number of bytes read; short counts happen only at end of
    /// stream.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, WavError> {
        if self.spec.is_none() {
            self.read_header()?;
        }

        let mut filled = 0;
        while filled < dst.len() {
            match self.inner.read(&mut dst[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(WavError::Io(err)),
            }
        }
        Ok(filled)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WavError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn skip(&mut self, len: u64) -> Result<(), WavError> {
        let copied = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())?;
        if copied != len {
            return Err(WavError::MissingDataChunk);
        }
        Ok(())
    }
}

/// Positional-write capability required by [`WavWriter`].
pub trait WriteAt {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;
}

impl WriteAt for File {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::FileExt::write_all_at(self, buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut written = 0;
            while written < buf.len() {
                let n = self.seek_write(&buf[written..], offset + written as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                written += n;
            }
            Ok(())
        }
    }
}

/// Random-access writer for a canonical PCM wav file.
///
/// The first [`write_at`](WavWriter::write_at) emits a 44-byte header with
/// zeroed length fields and places payload bytes at `offset + 44`;
/// [`close`](WavWriter::close) patches the RIFF size (byte 4) and `data` size
/// (byte 40). The bytes-written counter is atomic, so `write_at` is safe
/// under concurrent callers as long as their offset ranges are disjoint.
pub struct WavWriter<W: WriteAt> {
    target: W,
    num_channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    header_written: AtomicBool,
    data_size: AtomicU64,
}

impl<W: WriteAt> WavWriter<W> {
    pub fn new(target: W, num_channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            target,
            num_channels,
            sample_rate,
            bits_per_sample,
            header_written: AtomicBool::new(false),
            data_size: AtomicU64::new(0),
        }
    }

    /// Write `bytes` at `offset` within the data payload.
    pub fn write_at(&self, bytes: &[u8], offset: u64) -> io::Result<()> {
        self.ensure_header()?;
        self.target.write_all_at(bytes, offset + HEADER_LEN)?;
        self.data_size.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Total payload bytes successfully written so far.
    pub fn data_size(&self) -> u64 {
        self.data_size.load(Ordering::SeqCst)
    }

    /// Patch the deferred length fields. A writer that saw no payload still
    /// produces a valid, empty wav file.
    pub fn close(&self) -> Result<(), WavError> {
        self.ensure_header()?;

        let data_size = self.data_size.load(Ordering::SeqCst);
        if data_size > u64::from(u32::MAX - 36) {
            return Err(WavError::DataTooLarge);
        }
        let data_size = data_size as u32;

        self.target
            .write_all_at(&(data_size + 36).to_le_bytes(), 4)?;
        self.target.write_all_at(&data_size.to_le_bytes(), 40)?;
        Ok(())
    }

    fn ensure_header(&self) -> io::Result<()> {
        if self.header_written.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(b"RIFF");
        // bytes 4..8: riff size, patched at close
        header[8..12].copy_from_slice(b"WAVE");
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&1u16.to_le_bytes());
        header[22..24].copy_from_slice(&self.num_channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        let block_align = self.num_channels * (self.bits_per_sample / 8);
        let byte_rate = self.sample_rate * u32::from(block_align);
        header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        header[32..34].copy_from_slice(&block_align.to_le_bytes());
        header[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        header[36..40].copy_from_slice(b"data");
        // bytes 40..44: data size, patched at close

        self.target.write_all_at(&header, 0)
    }
}
