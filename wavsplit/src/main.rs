use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::{value_parser, Arg, ArgAction, Command};
use indicatif::{ProgressBar, ProgressStyle};
use wavsplit_core::{Config, Progress, ProgressReporter};

mod discover;

fn cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("De-interleave multi-channel WAV recordings into per-track files")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("in")
                .long("in")
                .value_name("PATH")
                .help("Input wav file, or a folder whose wav files are processed in natural order")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("OUTPUT_DIR")
                .help("Folder where the extracted tracks will be written")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .help("Delete wav files already present in the output folder")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stereo")
                .long("stereo")
                .value_name("PAIRS")
                .help("Stereo pairs to extract (e.g. 1/2,3/4); unlisted channels become mono tracks"),
        )
        .arg(
            Arg::new("channels")
                .long("channels")
                .value_name("LIST")
                .help("Exact channels to extract (e.g. 1/2,5)")
                .conflicts_with("stereo"),
        )
}

/// Renders extraction progress as an indicatif byte bar.
struct TermProgress {
    bar: Option<ProgressBar>,
}

impl TermProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgressReporter for TermProgress {
    fn start(&mut self, total_bytes: u64) {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::with_template(
                "{percent:>3}% [{bar:30}] {bytes} / {total_bytes} ({bytes_per_sec}) — {eta} remaining",
            )
            .expect("valid progress template")
            .progress_chars("= "),
        );
        self.bar = Some(bar);
    }

    fn update(&mut self, progress: Progress) {
        if let Some(bar) = &self.bar {
            bar.set_position(progress.current_bytes);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = cli().get_matches();
    let input = matches.get_one::<PathBuf>("in").expect("defaulted argument");
    let output_dir = matches.get_one::<PathBuf>("out").expect("required argument");

    let files = discover::wav_inputs(input)
        .with_context(|| format!("failed to collect wav files from '{}'", input.display()))?;
    if files.is_empty() {
        return Err(anyhow!("no wav files found in '{}'", input.display()));
    }

    let mut builder = Config::builder(&files, output_dir).force(matches.get_flag("force"));
    if let Some(spec) = matches.get_one::<String>("stereo") {
        builder = builder.stereo_spec(spec);
    }
    if let Some(spec) = matches.get_one::<String>("channels") {
        builder = builder.channels_spec(spec);
    }
    let config = builder.build().context("invalid configuration")?;

    let started = Instant::now();
    let mut progress = TermProgress::new();
    let metrics = wavsplit_core::run_with_metrics(config, &mut progress)
        .with_context(|| format!("failed to extract tracks from '{}'", input.display()))?;

    println!(
        "Extracted {} tracks from {} files ({} frames) in {:.1?}",
        metrics.tracks_written,
        files.len(),
        metrics.frames_processed,
        started.elapsed()
    );
    Ok(())
}
