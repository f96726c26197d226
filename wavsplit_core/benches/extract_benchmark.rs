use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use wavsplit_core::{run, Config};

struct SyntheticSession {
    _dir: TempDir,
    path: PathBuf,
    data_bytes: u64,
}

impl SyntheticSession {
    fn new(num_channels: u16, sample_rate: u32, seconds: u32) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.wav");
        let data_bytes = write_ramp_wav(&path, num_channels, sample_rate, seconds)?;
        Ok(Self {
            _dir: dir,
            path,
            data_bytes,
        })
    }
}

fn write_ramp_wav(
    path: &Path,
    num_channels: u16,
    sample_rate: u32,
    seconds: u32,
) -> io::Result<u64> {
    let total_frames = sample_rate as usize * seconds as usize;
    let mut samples = Vec::with_capacity(total_frames * usize::from(num_channels));
    for frame in 0..total_frames {
        let value = (frame % i16::MAX as usize) as i16;
        for _ in 0..num_channels {
            samples.push(value);
        }
    }

    let block_align = num_channels * 2;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = (samples.len() * 2) as u32;

    let mut file = File::create(path)?;
    file.write_all(b"RIFF")?;
    file.write_all(&(36 + data_len).to_le_bytes())?;
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&num_channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        file.write_all(&sample.to_le_bytes())?;
    }
    Ok(u64::from(data_len))
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    for &num_channels in &[2u16, 8] {
        let session =
            SyntheticSession::new(num_channels, 44_100, 2).expect("generate session fixture");
        group.throughput(Throughput::Bytes(session.data_bytes));
        group.bench_with_input(
            BenchmarkId::new("stereo_pairs", num_channels),
            &session,
            |b, session| {
                b.iter_batched(
                    || tempfile::tempdir().expect("create output dir"),
                    |out| {
                        let config = Config::builder([&session.path], out.path())
                            .stereo_spec("1/2")
                            .force(true)
                            .build()
                            .expect("valid config");
                        run(config).expect("extraction succeeds");
                        out
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_extract);
criterion_main!(benches);
