//! Core logic for de-interleaving multi-channel WAV recordings into tracks.
//!
//! The crate exposes a [`Config`] type describing a run — an ordered list of
//! synchronized input files, an output directory, and an optional track
//! selection — and a [`run`] function that streams every input concurrently,
//! splits each frame across the configured tracks, and writes one output WAV
//! file per track. Successive inputs land back to back in every track file,
//! so a folder of consecutive takes concatenates seamlessly. Errors are
//! reported through [`WavSplitError`]; progress can be observed with
//! [`run_with_progress`] and a [`ProgressReporter`].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::error;
use thiserror::Error;

pub mod tracks;
pub mod wav;

mod extract;

pub use extract::{CancelToken, Progress, ProgressReporter};
pub use tracks::TrackLayout;

use extract::Input;
use tracks::Track;
use wav::{WavError, WavReader, WavSpec};

/// How often the progress reporter is invoked unless configured otherwise.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that can occur while extracting tracks.
///
/// # Examples
///
/// ```
/// use wavsplit_core::{Config, WavSplitError};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp = tempfile::tempdir()?;
/// let out = temp.path().join("out");
///
/// match Config::new(Vec::<std::path::PathBuf>::new(), &out) {
///     Err(WavSplitError::NoInputs) => {}
///     other => panic!("unexpected result: {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Error)]
pub enum WavSplitError {
    /// Wrapper around IO errors raised outside any tagged streaming context.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Error returned when a run is configured with no input files.
    #[error("no input files to extract from")]
    NoInputs,

    /// Error returned when a path cannot be used as requested.
    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    /// Error returned when an input file cannot be opened.
    #[error("failed to open input file {path}: {source}")]
    InputOpen { path: PathBuf, source: io::Error },

    /// Error returned when an input file is not a usable PCM wav file.
    #[error("invalid WAV file {name}: {source}")]
    InvalidInput { name: String, source: WavError },

    /// Error returned when an input's format differs from the first input's.
    #[error("{field} mismatch: {value} ({name}) != {first_value} ({first_name})")]
    FormatMismatch {
        field: &'static str,
        name: String,
        value: u32,
        first_name: String,
        first_value: u32,
    },

    /// Error returned when both selection grammars are supplied at once.
    #[error("stereo and channel selections are mutually exclusive")]
    ConflictingTrackSpecs,

    /// Error returned when a stereo entry is not an `L/R` pair.
    #[error("invalid stereo pair format: {0}")]
    InvalidPairEntry(String),

    /// Error returned when a selection token is not a number.
    #[error("invalid channel number: {0}")]
    InvalidChannelNumber(String),

    /// Error returned when a selected channel does not exist in the inputs.
    #[error("channel {value} is out of range, inputs have {max} channels")]
    ChannelOutOfRange { value: u16, max: u16 },

    /// Error returned when a pair names the same channel twice.
    #[error("left and right channels must differ in pair {0}")]
    IdenticalPairChannels(String),

    /// Error returned when a channel appears in more than one track.
    #[error("channel {0} appears in more than one track")]
    DuplicateChannel(u16),

    /// Error returned when the output directory already holds wav files and
    /// overwriting was not requested.
    #[error("output directory already contains wav files: {0}")]
    OutputNotEmpty(PathBuf),

    /// Error returned when the destination lacks sufficient free space.
    #[error(
        "insufficient disk space in {path}: required {required} bytes, only {available} bytes available"
    )]
    InsufficientDiskSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Error returned when an output file cannot be created.
    #[error("failed to create output file {path}: {source}")]
    TrackCreate { path: PathBuf, source: io::Error },

    /// Error returned when reading an input fails mid-stream.
    #[error("failed to read {name}: {source}")]
    InputRead { name: String, source: WavError },

    /// Error returned when writing a track fails mid-stream.
    #[error("failed to write {track}: {source}")]
    TrackWrite { track: String, source: io::Error },

    /// Error returned when a track's header cannot be finalized.
    #[error("failed to finalize {track}: {source}")]
    TrackClose { track: String, source: WavError },

    /// Error returned when a track's payload outgrows the wav format.
    #[error("track {track} exceeds the 4 GiB wav data limit")]
    TrackTooLarge { track: String },

    /// Error returned when a pipeline worker panicked.
    #[error("a pipeline worker panicked")]
    WorkerPanicked,

    /// The run was cancelled through its [`CancelToken`].
    #[error("extraction cancelled")]
    Cancelled,
}

/// Configuration for a track extraction run.
///
/// # Examples
///
/// ```
/// use wavsplit_core::Config;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp = tempfile::tempdir()?;
/// let input = temp.path().join("take1.wav");
/// std::fs::write(&input, b"placeholder")?;
/// let out = temp.path().join("out");
///
/// let config = Config::builder([&input], &out)
///     .stereo_spec("1/2")
///     .force(true)
///     .build()?;
/// assert_eq!(config.inputs.len(), 1);
/// assert!(config.output_dir.is_dir());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Input files in playback order.
    pub inputs: Vec<PathBuf>,
    /// Canonicalized directory the track files are written into.
    pub output_dir: PathBuf,
    /// Whether wav files already present in the output directory are deleted.
    pub force: bool,
    /// Stereo-pair selection, e.g. `1/2,3/4`.
    pub stereo_spec: Option<String>,
    /// Exact channel selection, e.g. `1/2,5`.
    pub channels_spec: Option<String>,
    /// Interval between progress callbacks.
    pub progress_interval: Duration,
    /// Token observed by every pipeline worker.
    pub cancel_token: CancelToken,
}

impl Config {
    /// Construct a [`Config`] with default options.
    pub fn new<I, P, Q>(inputs: I, output_dir: Q) -> Result<Self, WavSplitError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        ConfigBuilder::new(inputs, output_dir).build()
    }

    /// Create a [`ConfigBuilder`] pre-populated with the provided paths.
    pub fn builder<I, P, Q>(inputs: I, output_dir: Q) -> ConfigBuilder
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        ConfigBuilder::new(inputs, output_dir)
    }
}

/// Builder for [`Config`] instances.
pub struct ConfigBuilder {
    inputs: Vec<PathBuf>,
    output_dir: PathBuf,
    force: bool,
    stereo_spec: Option<String>,
    channels_spec: Option<String>,
    progress_interval: Duration,
    cancel_token: CancelToken,
}

impl ConfigBuilder {
    /// Create a builder over the given inputs (in playback order) and output
    /// directory.
    pub fn new<I, P, Q>(inputs: I, output_dir: Q) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            inputs: inputs
                .into_iter()
                .map(|path| path.as_ref().to_path_buf())
                .collect(),
            output_dir: output_dir.as_ref().to_path_buf(),
            force: false,
            stereo_spec: None,
            channels_spec: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cancel_token: CancelToken::new(),
        }
    }

    /// Allow deleting wav files already present in the output directory.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Select stereo pairs, e.g. `1/2,3/4`; unselected channels become
    /// implicit mono tracks.
    pub fn stereo_spec<S: Into<String>>(mut self, spec: S) -> Self {
        self.stereo_spec = Some(spec.into());
        self
    }

    /// Select an exact set of tracks, e.g. `1/2,5`.
    pub fn channels_spec<S: Into<String>>(mut self, spec: S) -> Self {
        self.channels_spec = Some(spec.into());
        self
    }

    /// Configure how often progress callbacks fire.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Attach a cancellation token shared with the caller.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Finalize the builder, creating the output directory when absent.
    pub fn build(self) -> Result<Config, WavSplitError> {
        if self.inputs.is_empty() {
            return Err(WavSplitError::NoInputs);
        }

        let stereo_spec = self.stereo_spec.filter(|spec| !spec.is_empty());
        let channels_spec = self.channels_spec.filter(|spec| !spec.is_empty());
        if stereo_spec.is_some() && channels_spec.is_some() {
            return Err(WavSplitError::ConflictingTrackSpecs);
        }

        let output_dir = prepare_output_directory(&self.output_dir)?;

        Ok(Config {
            inputs: self.inputs,
            output_dir,
            force: self.force,
            stereo_spec,
            channels_spec,
            progress_interval: self.progress_interval,
            cancel_token: self.cancel_token,
        })
    }
}

fn prepare_output_directory(path: &Path) -> Result<PathBuf, WavSplitError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(WavSplitError::Io)?;
    }

    let canonical =
        fs::canonicalize(path).map_err(|_| WavSplitError::InvalidPath(path.to_path_buf()))?;
    if canonical.is_dir() {
        Ok(canonical)
    } else {
        Err(WavSplitError::InvalidPath(path.to_path_buf()))
    }
}

/// Metrics captured during an extraction run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractMetrics {
    /// Total payload bytes across all inputs.
    pub total_input_bytes: u64,
    /// Input-domain bytes fully dispatched to every track.
    pub bytes_processed: u64,
    /// Whole frames carried through the pipeline.
    pub frames_processed: u64,
    /// Number of track files produced.
    pub tracks_written: u64,
}

struct NoProgressReporter;

impl ProgressReporter for NoProgressReporter {}

/// Extract every configured track.
///
/// # Examples
///
/// ```
/// use std::fs::File;
/// use std::io::Write;
/// use std::path::Path;
/// use wavsplit_core::{run, Config};
///
/// fn write_stereo_wav(path: &Path, frames: u16) -> std::io::Result<()> {
///     let mut samples = Vec::new();
///     for frame in 0..frames {
///         samples.extend_from_slice(&(frame * 2).to_le_bytes());
///         samples.extend_from_slice(&(frame * 2 + 1).to_le_bytes());
///     }
///
///     let mut file = File::create(path)?;
///     let data_len = samples.len() as u32;
///     file.write_all(b"RIFF")?;
///     file.write_all(&(36 + data_len).to_le_bytes())?;
///     file.write_all(b"WAVE")?;
///     file.write_all(b"fmt ")?;
///     file.write_all(&16u32.to_le_bytes())?;
///     file.write_all(&1u16.to_le_bytes())?;
///     file.write_all(&2u16.to_le_bytes())?;
///     file.write_all(&8_000u32.to_le_bytes())?;
///     file.write_all(&32_000u32.to_le_bytes())?;
///     file.write_all(&4u16.to_le_bytes())?;
///     file.write_all(&16u16.to_le_bytes())?;
///     file.write_all(b"data")?;
///     file.write_all(&data_len.to_le_bytes())?;
///     file.write_all(&samples)?;
///     Ok(())
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp = tempfile::tempdir()?;
/// let input = temp.path().join("take1.wav");
/// write_stereo_wav(&input, 100)?;
/// let out = temp.path().join("out");
///
/// let config = Config::builder([&input], &out).stereo_spec("1/2").build()?;
/// run(config)?;
///
/// assert!(out.join("track_1L_2R.wav").is_file());
/// # Ok(())
/// # }
/// ```
pub fn run(config: Config) -> Result<(), WavSplitError> {
    let mut progress = NoProgressReporter;
    run_internal(config, &mut progress).map(|_| ())
}

/// Extract every configured track while reporting progress.
pub fn run_with_progress<P: ProgressReporter + Send>(
    config: Config,
    progress: &mut P,
) -> Result<(), WavSplitError> {
    run_internal(config, progress).map(|_| ())
}

/// Extract every configured track and return metrics describing the run.
pub fn run_with_metrics<P: ProgressReporter + Send>(
    config: Config,
    progress: &mut P,
) -> Result<ExtractMetrics, WavSplitError> {
    run_internal(config, progress)
}

fn run_internal<P: ProgressReporter + Send>(
    config: Config,
    progress: &mut P,
) -> Result<ExtractMetrics, WavSplitError> {
    let inputs = open_inputs(&config.inputs)?;
    ensure_formats_match(&inputs)?;
    let spec = inputs[0].spec;

    let layouts = tracks::plan_tracks(
        config.stereo_spec.as_deref(),
        config.channels_spec.as_deref(),
        spec.num_channels,
    )?;

    clear_or_reject_existing_outputs(&config.output_dir, config.force)?;

    let total_frames: u64 = inputs.iter().map(|input| input.spec.frames()).sum();
    let total_input_bytes: u64 = inputs
        .iter()
        .map(|input| u64::from(input.spec.data_size))
        .sum();
    ensure_available_disk_space(
        &config.output_dir,
        required_output_bytes(total_frames, &layouts, &spec),
    )?;

    let tracks = tracks::open_tracks(&layouts, &config.output_dir, &spec)?;

    let pipeline_result = extract::run_pipeline(
        inputs,
        &tracks,
        config.progress_interval,
        progress,
        &config.cancel_token,
    );

    // close every writer even after a failure so partial files keep patched
    // headers where possible
    let close_result = close_tracks(&tracks);
    if pipeline_result.is_err() {
        if let Err(close_err) = &close_result {
            error!("failed to finalize track writers after extraction error: {close_err}");
        }
    }

    let bytes_processed = pipeline_result?;
    close_result?;

    Ok(ExtractMetrics {
        total_input_bytes,
        bytes_processed,
        frames_processed: bytes_processed / spec.frame_bytes() as u64,
        tracks_written: tracks.len() as u64,
    })
}

fn open_inputs(paths: &[PathBuf]) -> Result<Vec<Input>, WavSplitError> {
    paths
        .iter()
        .map(|path| {
            let file = File::open(path).map_err(|source| WavSplitError::InputOpen {
                path: path.clone(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            let mut reader = WavReader::new(file);
            let spec = *reader
                .read_header()
                .map_err(|source| WavSplitError::InvalidInput {
                    name: name.clone(),
                    source,
                })?;

            Ok(Input { name, reader, spec })
        })
        .collect()
}

fn ensure_formats_match(inputs: &[Input]) -> Result<(), WavSplitError> {
    for pair in inputs.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let fields = [
            ("sample rate", prev.spec.sample_rate, next.spec.sample_rate),
            (
                "channel count",
                u32::from(prev.spec.num_channels),
                u32::from(next.spec.num_channels),
            ),
            (
                "bit depth",
                u32::from(prev.spec.bits_per_sample),
                u32::from(next.spec.bits_per_sample),
            ),
        ];
        for (field, first_value, value) in fields {
            if value != first_value {
                return Err(WavSplitError::FormatMismatch {
                    field,
                    name: next.name.clone(),
                    value,
                    first_name: prev.name.clone(),
                    first_value,
                });
            }
        }
    }
    Ok(())
}

fn clear_or_reject_existing_outputs(output_dir: &Path, force: bool) -> Result<(), WavSplitError> {
    let mut existing = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        {
            existing.push(path);
        }
    }

    if existing.is_empty() {
        return Ok(());
    }
    if !force {
        return Err(WavSplitError::OutputNotEmpty(output_dir.to_path_buf()));
    }
    for path in existing {
        fs::remove_file(&path)?;
    }
    Ok(())
}

fn required_output_bytes(total_frames: u64, layouts: &[TrackLayout], spec: &WavSpec) -> u64 {
    layouts
        .iter()
        .map(|layout| 44 + total_frames * (layout.channels.len() * spec.bytes_per_sample()) as u64)
        .sum()
}

fn ensure_available_disk_space(
    output_dir: &Path,
    required_bytes: u64,
) -> Result<(), WavSplitError> {
    if required_bytes == 0 {
        return Ok(());
    }

    let available = query_available_space(output_dir).map_err(WavSplitError::Io)?;
    if available < required_bytes {
        Err(WavSplitError::InsufficientDiskSpace {
            path: output_dir.to_path_buf(),
            required: required_bytes,
            available,
        })
    } else {
        Ok(())
    }
}

fn query_available_space(path: &Path) -> io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let bytes = path.as_os_str().as_bytes();
        let c_path = CString::new(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if result != 0 {
            Err(io::Error::last_os_error())
        } else {
            let block_size = u128::from(stat.f_frsize);
            let available_blocks = u128::from(stat.f_bavail);
            let bytes = block_size.saturating_mul(available_blocks);
            Ok(bytes.min(u128::from(u64::MAX)) as u64)
        }
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(u64::MAX)
    }
}

fn close_tracks(tracks: &[Track]) -> Result<(), WavSplitError> {
    let mut first_error = None;
    for track in tracks {
        if let Err(err) = track.writer.close() {
            let err = match err {
                WavError::DataTooLarge => WavSplitError::TrackTooLarge {
                    track: track.name.clone(),
                },
                other => WavSplitError::TrackClose {
                    track: track.name.clone(),
                    source: other,
                },
            };
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
