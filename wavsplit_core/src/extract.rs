//! The parallel streaming de-interleave pipeline.
//!
//! One decode worker per input drains that file's PCM payload in one-second
//! chunks and broadcasts each chunk to every track worker. One writer worker
//! per output track extracts its channels from each chunk and writes the
//! result at an absolute offset, so the contributions of successive inputs
//! land back to back in every track file. A chunk buffer returns to the pool
//! exactly once, after every track worker has acknowledged it.

use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::tracks::Track;
use crate::wav::{WavReader, WavSpec};
use crate::WavSplitError;

/// An opened input positioned at its first PCM byte.
#[derive(Debug)]
pub(crate) struct Input {
    pub(crate) name: String,
    pub(crate) reader: WavReader<File>,
    pub(crate) spec: WavSpec,
}

/// A snapshot of extraction progress, in input-domain bytes.
#[derive(Clone, Copy, Debug)]
pub struct Progress {
    /// Total payload bytes across all inputs.
    pub total_bytes: u64,
    /// Payload bytes fully dispatched to every track so far.
    pub current_bytes: u64,
    /// Time since the pipeline started.
    pub elapsed: Duration,
}

/// Trait used to relay progress information while tracks are extracted.
pub trait ProgressReporter {
    /// Called once before any chunk is processed.
    fn start(&mut self, _total_bytes: u64) {}

    /// Called at every sampling interval with the current position.
    fn update(&mut self, _progress: Progress) {}

    /// Called once after the last update; never followed by another callback.
    fn finish(&mut self) {}
}

/// Cooperative cancellation flag shared by the caller and every worker.
///
/// Workers poll the token at the top of their loops and while waiting on a
/// chunk barrier; once cancelled they drop in-flight work and unwind through
/// the coordinator, which still closes the output writers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Pool of reusable chunk buffers, each holding one second of input PCM.
struct BufferPool {
    chunk_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Hand out a buffer, allocating a fresh one when the pool is dry.
    fn acquire(&self) -> Vec<u8> {
        let recycled = self.free.lock().expect("buffer pool poisoned").pop();
        recycled.unwrap_or_else(|| vec![0u8; self.chunk_size])
    }

    fn release(&self, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.chunk_size);
        self.free.lock().expect("buffer pool poisoned").push(buf);
    }
}

/// One chunk's worth of work for a single track.
struct TrackWriteTask {
    /// The interleaved input chunk, shared by every track worker.
    chunk: Arc<Vec<u8>>,
    /// Valid bytes in `chunk`; always a multiple of the input frame width.
    len: usize,
    /// Absolute payload offset this slice of the track starts at.
    offset: u64,
    /// Completion handle; dropped or signalled exactly once per task.
    done: mpsc::Sender<()>,
}

/// Copy the selected channels of every whole frame in `input` into `out`,
/// frame-major. Returns the number of output bytes produced.
///
/// Samples move byte-wise, which is exact for any little-endian integer PCM
/// width without knowing which.
fn deinterleave_frames(
    input: &[u8],
    channels: &[u16],
    num_channels: u16,
    bytes_per_sample: usize,
    out: &mut [u8],
) -> usize {
    let in_block = usize::from(num_channels) * bytes_per_sample;
    let out_block = channels.len() * bytes_per_sample;
    let frames = input.len() / in_block;

    for frame in 0..frames {
        let src_frame = frame * in_block;
        let dst_frame = frame * out_block;
        for (slot, &channel) in channels.iter().enumerate() {
            let src = src_frame + usize::from(channel) * bytes_per_sample;
            let dst = dst_frame + slot * bytes_per_sample;
            out[dst..dst + bytes_per_sample]
                .copy_from_slice(&input[src..src + bytes_per_sample]);
        }
    }

    frames * out_block
}

/// Run the full pipeline over already-opened inputs and tracks.
///
/// Returns the number of input-domain bytes processed. Writers are left open;
/// the caller closes them so headers get patched even after a failure.
pub(crate) fn run_pipeline<P: ProgressReporter + Send>(
    inputs: Vec<Input>,
    tracks: &[Track],
    interval: Duration,
    reporter: &mut P,
    cancel: &CancelToken,
) -> Result<u64, WavSplitError> {
    let spec = inputs[0].spec;
    let chunk_size = spec.bytes_per_second().max(spec.frame_bytes());
    let total_bytes: u64 = inputs.iter().map(|input| u64::from(input.spec.data_size)).sum();

    // prefix-summed frame counts place each input's output directly after its
    // predecessor's in every track file
    let mut base_frames = Vec::with_capacity(inputs.len());
    let mut frames_before = 0u64;
    for input in &inputs {
        base_frames.push(frames_before);
        frames_before += input.spec.frames();
    }

    let pool = BufferPool::new(chunk_size);
    let bytes_processed = AtomicU64::new(0);
    let started = Instant::now();

    // one bounded inbox per track; every decode worker holds a sender clone
    // and keeps at most one chunk outstanding, so sends never block for long
    let mut track_txs = Vec::with_capacity(tracks.len());
    let mut track_rxs = Vec::with_capacity(tracks.len());
    for _ in tracks {
        let (tx, rx) = mpsc::sync_channel::<TrackWriteTask>(inputs.len());
        track_txs.push(tx);
        track_rxs.push(rx);
    }

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let mut first_error: Option<WavSplitError> = None;

    reporter.start(total_bytes);

    thread::scope(|scope| {
        let pool = &pool;
        let bytes_processed = &bytes_processed;

        let sampler = scope.spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => reporter.update(Progress {
                        total_bytes,
                        current_bytes: bytes_processed.load(Ordering::SeqCst),
                        elapsed: started.elapsed(),
                    }),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            reporter.finish();
        });

        let mut track_handles = Vec::with_capacity(tracks.len());
        for (track, rx) in tracks.iter().zip(track_rxs) {
            track_handles.push(scope.spawn(move || track_worker(track, rx, spec, chunk_size, cancel)));
        }

        let mut decode_handles = Vec::with_capacity(inputs.len());
        for (input, base_frame) in inputs.into_iter().zip(base_frames) {
            let senders = track_txs.clone();
            decode_handles.push(scope.spawn(move || {
                decode_worker(input, senders, tracks, base_frame, pool, bytes_processed, cancel)
            }));
        }
        drop(track_txs); // track inboxes close once the last decode worker exits

        for handle in decode_handles {
            collect_worker(handle.join(), cancel, &mut first_error);
        }
        for handle in track_handles {
            collect_worker(handle.join(), cancel, &mut first_error);
        }

        drop(stop_tx);
        if sampler.join().is_err() {
            first_error.get_or_insert(WavSplitError::WorkerPanicked);
        }
    });

    if let Some(err) = first_error {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(WavSplitError::Cancelled);
    }
    Ok(bytes_processed.load(Ordering::SeqCst))
}

fn collect_worker(
    joined: thread::Result<Result<(), WavSplitError>>,
    cancel: &CancelToken,
    first_error: &mut Option<WavSplitError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            first_error.get_or_insert(err);
        }
        Err(_) => {
            cancel.cancel();
            first_error.get_or_insert(WavSplitError::WorkerPanicked);
        }
    }
}

/// Drain one input, chunk by chunk, broadcasting each chunk to every track.
fn decode_worker(
    mut input: Input,
    senders: Vec<SyncSender<TrackWriteTask>>,
    tracks: &[Track],
    base_frame: u64,
    pool: &BufferPool,
    bytes_processed: &AtomicU64,
    cancel: &CancelToken,
) -> Result<(), WavSplitError> {
    let spec = input.spec;
    let frame_bytes = spec.frame_bytes();
    let bytes_per_sample = spec.bytes_per_sample();

    let out_blocks: Vec<usize> = tracks
        .iter()
        .map(|track| track.channels.len() * bytes_per_sample)
        .collect();
    let mut cursors: Vec<u64> = out_blocks
        .iter()
        .map(|&out_block| base_frame * out_block as u64)
        .collect();

    // reads are clamped to the payload so trailing chunks after `data` never
    // bleed into the output
    let mut remaining = u64::from(spec.data_size);
    while remaining > 0 {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let mut buf = pool.acquire();
        let want = (buf.len() as u64).min(remaining) as usize;
        let read = match input.reader.read(&mut buf[..want]) {
            Ok(read) => read,
            Err(source) => {
                cancel.cancel();
                return Err(WavSplitError::InputRead {
                    name: input.name,
                    source,
                });
            }
        };
        if read == 0 {
            pool.release(buf);
            debug!("{}: payload ended {remaining} bytes early", input.name);
            break;
        }
        remaining -= read as u64;

        // a trailing partial frame in a malformed file is discarded
        let len = read - (read % frame_bytes);
        if len == 0 {
            pool.release(buf);
            break;
        }
        let frames = len / frame_bytes;

        let chunk = Arc::new(buf);
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut dispatched = 0;
        for (sender, (cursor, out_block)) in senders
            .iter()
            .zip(cursors.iter_mut().zip(out_blocks.iter()))
        {
            let task = TrackWriteTask {
                chunk: Arc::clone(&chunk),
                len,
                offset: *cursor,
                done: done_tx.clone(),
            };
            if sender.send(task).is_err() {
                // the receiving track worker failed and already cancelled
                break;
            }
            *cursor += (frames * out_block) as u64;
            dispatched += 1;
        }
        drop(done_tx);

        // chunk barrier: every dispatched task either acks or is dropped by
        // an aborting worker, so this cannot hang
        let mut acked = 0;
        while acked < dispatched {
            match done_rx.recv() {
                Ok(()) => acked += 1,
                Err(_) => break,
            }
        }

        if dispatched < senders.len() {
            return Ok(());
        }

        bytes_processed.fetch_add(len as u64, Ordering::SeqCst);
        if let Ok(buf) = Arc::try_unwrap(chunk) {
            pool.release(buf);
        }
    }

    Ok(())
}

/// Receive chunks from every decode worker and write this track's slice of
/// each at the offset carried by the task.
fn track_worker(
    track: &Track,
    rx: Receiver<TrackWriteTask>,
    spec: WavSpec,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<(), WavSplitError> {
    let mut out_buf = vec![0u8; chunk_size];

    while let Ok(task) = rx.recv() {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let TrackWriteTask {
            chunk,
            len,
            offset,
            done,
        } = task;
        let out_len = deinterleave_frames(
            &chunk[..len],
            &track.channels,
            spec.num_channels,
            spec.bytes_per_sample(),
            &mut out_buf,
        );
        drop(chunk); // let the decode worker reclaim the buffer

        if let Err(source) = track.writer.write_at(&out_buf[..out_len], offset) {
            cancel.cancel();
            return Err(WavSplitError::TrackWrite {
                track: track.name.clone(),
                source,
            });
        }
        let _ = done.send(());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_picks_channels_in_user_order() {
        // two frames of 4-channel 16-bit audio, sample (f, c) = f * 4 + c
        let mut input = Vec::new();
        for frame in 0u16..2 {
            for channel in 0u16..4 {
                input.extend_from_slice(&(frame * 4 + channel).to_le_bytes());
            }
        }

        let mut out = vec![0u8; input.len()];
        let out_len = deinterleave_frames(&input, &[3, 0], 4, 2, &mut out);
        assert_eq!(out_len, 8);

        let expected: Vec<u8> = [3u16, 0, 7, 4]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(&out[..out_len], &expected[..]);
    }

    #[test]
    fn deinterleave_moves_24_bit_samples_byte_wise() {
        // one frame, two channels, 3 bytes per sample
        let input = [0x01, 0x02, 0x03, 0x0A, 0x0B, 0x0C];
        let mut out = vec![0u8; 3];
        let out_len = deinterleave_frames(&input, &[1], 2, 3, &mut out);
        assert_eq!(out_len, 3);
        assert_eq!(out, [0x0A, 0x0B, 0x0C]);
    }

    #[test]
    fn deinterleave_ignores_trailing_partial_frame() {
        // 1.5 frames of stereo 16-bit; the half frame must not be emitted
        let input = [1, 0, 2, 0, 3, 0];
        let mut out = vec![0u8; 4];
        let out_len = deinterleave_frames(&input, &[0], 2, 2, &mut out);
        assert_eq!(out_len, 2);
        assert_eq!(&out[..2], &[1, 0]);
    }

    #[test]
    fn buffer_pool_recycles_buffers() {
        let pool = BufferPool::new(16);
        let first = pool.acquire();
        assert_eq!(first.len(), 16);

        let marker = first.as_ptr();
        pool.release(first);
        let second = pool.acquire();
        assert_eq!(second.as_ptr(), marker, "pool should reuse the buffer");

        // dry pool allocates instead of blocking
        let third = pool.acquire();
        assert_eq!(third.len(), 16);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
