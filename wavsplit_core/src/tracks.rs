//! Output track selection.
//!
//! A run's output is described by one of two comma-separated grammars, both
//! using 1-based channel numbers:
//!
//! * a stereo spec such as `1/2,3/4` — every entry must be an `L/R` pair, and
//!   any channel not mentioned becomes an implicit mono track;
//! * a channels spec such as `1/2,5` — entries may be pairs or single
//!   channels, and the list is exact (no implicit tracks).
//!
//! With no spec at all, every input channel gets a mono track. Pair order is
//! preserved: `2/1` emits channel 2 on the left and channel 1 on the right.

use std::fs::File;
use std::path::Path;

use crate::wav::{WavSpec, WavWriter};
use crate::WavSplitError;

/// A validated output track before any file is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackLayout {
    /// Output file name, 1-based: `track_3.wav` or `track_1L_2R.wav`.
    pub name: String,
    /// Source channels in output order, zero-based, length 1 or 2.
    pub channels: Vec<u16>,
}

impl TrackLayout {
    fn stereo(left: u16, right: u16) -> Self {
        Self {
            name: format!("track_{left}L_{right}R.wav"),
            channels: vec![left - 1, right - 1],
        }
    }

    fn mono(channel: u16) -> Self {
        Self {
            name: format!("track_{channel}.wav"),
            channels: vec![channel - 1],
        }
    }
}

/// An output track bound to its writer.
pub(crate) struct Track {
    pub(crate) name: String,
    pub(crate) channels: Vec<u16>,
    pub(crate) writer: WavWriter<File>,
}

/// Materialize the track set for inputs with `num_channels` channels.
pub fn plan_tracks(
    stereo_spec: Option<&str>,
    channels_spec: Option<&str>,
    num_channels: u16,
) -> Result<Vec<TrackLayout>, WavSplitError> {
    match (stereo_spec, channels_spec) {
        (Some(_), Some(_)) => Err(WavSplitError::ConflictingTrackSpecs),
        (Some(spec), None) => plan_stereo(spec, num_channels),
        (None, Some(spec)) => plan_channels(spec, num_channels),
        (None, None) => Ok((1..=num_channels).map(TrackLayout::mono).collect()),
    }
}

fn plan_stereo(spec: &str, num_channels: u16) -> Result<Vec<TrackLayout>, WavSplitError> {
    let mut used = ChannelSet::new(num_channels);
    let mut tracks = Vec::new();

    for entry in spec.split(',') {
        let Some((left, right)) = entry.split_once('/') else {
            return Err(WavSplitError::InvalidPairEntry(entry.to_string()));
        };
        let (left, right) = parse_pair(entry, left, right, num_channels)?;
        used.claim(left)?;
        used.claim(right)?;
        tracks.push(TrackLayout::stereo(left, right));
    }

    // channels not claimed by a pair come out as mono tracks
    for channel in 1..=num_channels {
        if !used.contains(channel) {
            tracks.push(TrackLayout::mono(channel));
        }
    }

    Ok(tracks)
}

fn plan_channels(spec: &str, num_channels: u16) -> Result<Vec<TrackLayout>, WavSplitError> {
    let mut used = ChannelSet::new(num_channels);
    let mut tracks = Vec::new();

    for entry in spec.split(',') {
        match entry.split_once('/') {
            Some((left, right)) => {
                let (left, right) = parse_pair(entry, left, right, num_channels)?;
                used.claim(left)?;
                used.claim(right)?;
                tracks.push(TrackLayout::stereo(left, right));
            }
            None => {
                let channel = parse_channel(entry, num_channels)?;
                used.claim(channel)?;
                tracks.push(TrackLayout::mono(channel));
            }
        }
    }

    Ok(tracks)
}

fn parse_pair(
    entry: &str,
    left: &str,
    right: &str,
    num_channels: u16,
) -> Result<(u16, u16), WavSplitError> {
    let left = parse_channel(left, num_channels)?;
    let right = parse_channel(right, num_channels)?;
    if left == right {
        return Err(WavSplitError::IdenticalPairChannels(entry.to_string()));
    }
    Ok((left, right))
}

fn parse_channel(token: &str, num_channels: u16) -> Result<u16, WavSplitError> {
    let value: u16 = token
        .parse()
        .map_err(|_| WavSplitError::InvalidChannelNumber(token.to_string()))?;
    if !(1..=num_channels).contains(&value) {
        return Err(WavSplitError::ChannelOutOfRange {
            value,
            max: num_channels,
        });
    }
    Ok(value)
}

/// Tracks which 1-based channels a spec has already consumed.
struct ChannelSet {
    used: Vec<bool>,
}

impl ChannelSet {
    fn new(num_channels: u16) -> Self {
        Self {
            used: vec![false; usize::from(num_channels) + 1],
        }
    }

    fn claim(&mut self, channel: u16) -> Result<(), WavSplitError> {
        let slot = &mut self.used[usize::from(channel)];
        if *slot {
            return Err(WavSplitError::DuplicateChannel(channel));
        }
        *slot = true;
        Ok(())
    }

    fn contains(&self, channel: u16) -> bool {
        self.used[usize::from(channel)]
    }
}

/// Create the output file for each layout and wrap it in a wav writer that
/// shares the inputs' sample rate and bit depth.
pub(crate) fn open_tracks(
    layouts: &[TrackLayout],
    output_dir: &Path,
    spec: &WavSpec,
) -> Result<Vec<Track>, WavSplitError> {
    layouts
        .iter()
        .map(|layout| {
            let path = output_dir.join(&layout.name);
            let file = File::create(&path).map_err(|source| WavSplitError::TrackCreate {
                path: path.clone(),
                source,
            })?;
            Ok(Track {
                name: layout.name.clone(),
                channels: layout.channels.clone(),
                writer: WavWriter::new(
                    file,
                    layout.channels.len() as u16,
                    spec.sample_rate,
                    spec.bits_per_sample,
                ),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(layouts: &[TrackLayout]) -> Vec<&str> {
        layouts.iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn empty_selection_yields_all_mono_tracks() {
        let layouts = plan_tracks(None, None, 3).expect("valid plan");
        assert_eq!(names(&layouts), ["track_1.wav", "track_2.wav", "track_3.wav"]);
        assert_eq!(layouts[2].channels, [2]);
    }

    #[test]
    fn stereo_pairs_fill_remaining_channels_with_mono() {
        let layouts = plan_tracks(Some("1/2,5/6"), None, 8).expect("valid plan");
        assert_eq!(
            names(&layouts),
            [
                "track_1L_2R.wav",
                "track_5L_6R.wav",
                "track_3.wav",
                "track_4.wav",
                "track_7.wav",
                "track_8.wav",
            ]
        );
        assert_eq!(layouts[0].channels, [0, 1]);
        assert_eq!(layouts[1].channels, [4, 5]);
    }

    #[test]
    fn stereo_pair_order_follows_the_user() {
        let layouts = plan_tracks(Some("2/1"), None, 2).expect("valid plan");
        assert_eq!(names(&layouts), ["track_2L_1R.wav"]);
        assert_eq!(layouts[0].channels, [1, 0]);
    }

    #[test]
    fn stereo_spec_rejects_single_channel_entries() {
        let err = plan_tracks(Some("1/2,3"), None, 4).expect_err("mono entry rejected");
        assert!(matches!(err, WavSplitError::InvalidPairEntry(entry) if entry == "3"));
    }

    #[test]
    fn stereo_spec_rejects_identical_channels() {
        let err = plan_tracks(Some("2/2"), None, 4).expect_err("identical pair rejected");
        assert!(matches!(err, WavSplitError::IdenticalPairChannels(entry) if entry == "2/2"));
    }

    #[test]
    fn channels_spec_is_exact() {
        let layouts = plan_tracks(None, Some("1,4"), 4).expect("valid plan");
        assert_eq!(names(&layouts), ["track_1.wav", "track_4.wav"]);
    }

    #[test]
    fn channels_spec_mixes_pairs_and_mono() {
        let layouts = plan_tracks(None, Some("1/2,5"), 6).expect("valid plan");
        assert_eq!(names(&layouts), ["track_1L_2R.wav", "track_5.wav"]);
        assert_eq!(layouts[0].channels, [0, 1]);
        assert_eq!(layouts[1].channels, [4]);
    }

    #[test]
    fn duplicate_channel_across_entries_is_rejected() {
        let err = plan_tracks(None, Some("1/2,2"), 4).expect_err("duplicate rejected");
        assert!(matches!(err, WavSplitError::DuplicateChannel(2)));

        let err = plan_tracks(Some("1/2,2/3"), None, 4).expect_err("duplicate rejected");
        assert!(matches!(err, WavSplitError::DuplicateChannel(2)));
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        let err = plan_tracks(None, Some("5"), 4).expect_err("range enforced");
        assert!(matches!(
            err,
            WavSplitError::ChannelOutOfRange { value: 5, max: 4 }
        ));

        let err = plan_tracks(None, Some("0"), 4).expect_err("channels are 1-based");
        assert!(matches!(
            err,
            WavSplitError::ChannelOutOfRange { value: 0, max: 4 }
        ));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let err = plan_tracks(None, Some("one"), 4).expect_err("non-numeric rejected");
        assert!(matches!(err, WavSplitError::InvalidChannelNumber(token) if token == "one"));

        let err = plan_tracks(Some("1/2/3"), None, 4).expect_err("malformed pair rejected");
        assert!(matches!(err, WavSplitError::InvalidChannelNumber(token) if token == "2/3"));
    }

    #[test]
    fn both_specs_at_once_are_rejected() {
        let err = plan_tracks(Some("1/2"), Some("3"), 4).expect_err("mutually exclusive");
        assert!(matches!(err, WavSplitError::ConflictingTrackSpecs));
    }
}
