//! Input discovery and ordering.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Collect the wav inputs for a run.
///
/// A file path is returned as-is (after checking its extension); a directory
/// yields every `*.wav`/`*.WAV` file directly inside it, sorted in natural
/// (human) order so `take2.wav` comes before `take10.wav`.
pub fn wav_inputs(path: &Path) -> io::Result<Vec<PathBuf>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        if !has_wav_extension(path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a wav file", path.display()),
            ));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry.file_type()?.is_file() && has_wav_extension(&entry_path) {
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push((name, entry_path));
        }
    }

    files.sort_by(|a, b| natord::compare(&a.0, &b.0));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn has_wav_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn directory_listing_uses_natural_order() {
        let temp = tempdir().expect("create temp dir");
        for name in ["take10.wav", "take2.wav", "take1.wav"] {
            File::create(temp.path().join(name)).expect("create fixture");
        }

        let files = wav_inputs(temp.path()).expect("discovery succeeds");
        let names: Vec<_> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["take1.wav", "take2.wav", "take10.wav"]);
    }

    #[test]
    fn non_wav_files_are_ignored() {
        let temp = tempdir().expect("create temp dir");
        File::create(temp.path().join("session.wav")).expect("create wav");
        File::create(temp.path().join("SESSION2.WAV")).expect("create upper-case wav");
        File::create(temp.path().join("notes.txt")).expect("create text file");

        let files = wav_inputs(temp.path()).expect("discovery succeeds");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn single_file_passes_through() {
        let temp = tempdir().expect("create temp dir");
        let input = temp.path().join("session.wav");
        File::create(&input).expect("create wav");

        let files = wav_inputs(&input).expect("discovery succeeds");
        assert_eq!(files, [input]);
    }

    #[test]
    fn single_non_wav_file_is_rejected() {
        let temp = tempdir().expect("create temp dir");
        let input = temp.path().join("notes.txt");
        File::create(&input).expect("create text file");

        let err = wav_inputs(&input).expect_err("non-wav input rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
