pub mod parsers;

use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

pub use parsers::TagOptions;

/// Raw tag values as found in the file, before any library post-processing.
#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub date: Option<String>,
    pub genre: Option<String>,
    pub copyright: Option<String>,
    pub duration_secs: u32,
    /// Kilobits per second.
    pub bitrate: u32,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
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

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo {
        duration_secs: properties.duration().as_secs().min(u64::from(u32::MAX)) as u32,
        bitrate: properties
            .audio_bitrate()
            .or(properties.overall_bitrate())
            .unwrap_or(0),
        sample_rate: properties.sample_rate(),
        channels: properties.channels(),
        ..TagInfo::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = non_empty(tag.get_string(&ItemKey::TrackTitle));
        info.album = non_empty(tag.get_string(&ItemKey::AlbumTitle));
        info.artist = non_empty(tag.get_string(&ItemKey::TrackArtist));
        info.album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist));
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.disc_no = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_u16);
        info.date = non_empty(
            tag.get_string(&ItemKey::RecordingDate)
                .or_else(|| tag.get_string(&ItemKey::Year)),
        );
        info.genre = non_empty(tag.get_string(&ItemKey::Genre));
        info.copyright = non_empty(tag.get_string(&ItemKey::CopyrightMessage));
    }

    Ok(info)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}
