use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{Accessor, AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub genres: Vec<String>,
    pub isrc: Option<String>,
    pub lyrics: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate: Option<u32>,
    pub track_gain: Option<f32>,
    pub track_peak: Option<f32>,
    pub album_gain: Option<f32>,
    pub album_peak: Option<f32>,
}

impl TagInfo {
    pub fn genre(&self) -> Option<String> {
        if self.genres.is_empty() {
            None
        } else {
            Some(self.genres.join("; "))
        }
    }
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads tags and audio properties from a single file.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_tags(path)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    info.sample_rate = properties.sample_rate();
    info.channels = properties.channels();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.title().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        info.album = tag.get_string(&ItemKey::AlbumTitle).and_then(clean_text);
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).and_then(clean_text);
        let track_artist = tag.get_string(&ItemKey::TrackArtist).and_then(clean_text);
        info.artist = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.disc_no = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.isrc = tag.get_string(&ItemKey::Isrc).and_then(clean_text);
        info.lyrics = tag.get_string(&ItemKey::Lyrics).and_then(clean_text);
        info.track_gain = tag
            .get_string(&ItemKey::ReplayGainTrackGain)
            .and_then(parse_gain);
        info.track_peak = tag
            .get_string(&ItemKey::ReplayGainTrackPeak)
            .and_then(parse_gain);
        info.album_gain = tag
            .get_string(&ItemKey::ReplayGainAlbumGain)
            .and_then(parse_gain);
        info.album_peak = tag
            .get_string(&ItemKey::ReplayGainAlbumPeak)
            .and_then(parse_gain);
    }

    Ok(info)
}

fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok().filter(|value| *value > 0)
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

// ReplayGain values arrive as "-6.54 dB" or "0.988553".
fn parse_gain(text: &str) -> Option<f32> {
    let head = text.split_whitespace().next()?;
    head.trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

fn parse_genres(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    if out.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_numbers_with_totals() {
        assert_eq!(parse_u16("3/12"), Some(3));
        assert_eq!(parse_u16(" 07 "), Some(7));
        assert_eq!(parse_u16("0"), None);
        assert_eq!(parse_u16("side a"), None);
    }

    #[test]
    fn parses_year_prefix_of_dates() {
        assert_eq!(parse_year("1997-05-21"), Some(1997));
        assert_eq!(parse_year("2004"), Some(2004));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn parses_replay_gain_strings() {
        assert_eq!(parse_gain("-6.54 dB"), Some(-6.54));
        assert_eq!(parse_gain("+1.20dB"), Some(1.2));
        assert_eq!(parse_gain("0.988553"), Some(0.988553));
        assert_eq!(parse_gain(""), None);
    }

    #[test]
    fn splits_genre_lists() {
        assert_eq!(parse_genres("Rock; Pop"), vec!["Rock", "Pop"]);
        assert_eq!(parse_genres("Jazz"), vec!["Jazz"]);
        let info = TagInfo {
            genres: parse_genres("Ambient/Drone"),
            ..TagInfo::default()
        };
        assert_eq!(info.genre().as_deref(), Some("Ambient; Drone"));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp3");
        std::fs::write(&path, b"not really audio").unwrap();
        assert!(LoftyReader.read(&path).is_err());
    }
}
