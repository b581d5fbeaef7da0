use std::fmt;
use std::path::Path;

use lofty::error::LoftyError;

mod artist_info;
mod image;
mod lofty_reader;
mod lyrics;
mod parser;
mod playlist;
mod split;

pub use artist_info::{parse_artist_info, ParsedArtistInfo};
pub use image::{read_image_info, ImageInfo};
pub use lofty_reader::{open_tag_reader, LoftyTagReader};
pub use lyrics::{parse_lyrics, parse_lyrics_str};
pub use parser::{
    compute_artist_display_name, ParsedArtist, ParsedMedium, ParsedRelease, ParsedTrack,
    ParserSettings, TrackMetadataParser, GENRE_CLUSTER, GROUPING_CLUSTER, LANGUAGE_CLUSTER,
    MOOD_CLUSTER,
};
pub use playlist::{parse_playlist, parse_playlist_str, ParsedPlayList};
pub use split::split_tag_value;

/// Well-known tags, independent of the container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagKind {
    Title,
    Artist,
    Artists,
    ArtistSortOrder,
    ArtistsSortOrder,
    MusicBrainzArtistId,
    Album,
    AlbumSortOrder,
    AlbumArtist,
    AlbumArtists,
    AlbumArtistSortOrder,
    AlbumArtistsSortOrder,
    MusicBrainzReleaseArtistId,
    MusicBrainzReleaseId,
    MusicBrainzReleaseGroupId,
    MusicBrainzTrackId,
    MusicBrainzRecordingId,
    TrackNumber,
    TotalTracks,
    DiscNumber,
    TotalDiscs,
    DiscSubtitle,
    Media,
    Date,
    Year,
    OriginalReleaseDate,
    OriginalReleaseYear,
    Genre,
    Mood,
    Language,
    Grouping,
    Composer,
    ComposerSortOrder,
    Conductor,
    Lyricist,
    Mixer,
    Producer,
    Remixer,
    Comment,
    Copyright,
    CopyrightUrl,
    Compilation,
    Barcode,
    RecordLabel,
    ReleaseCountry,
    ReleaseType,
    ReleaseComment,
    Advisory,
    ReplayGainTrackGain,
    ReplayGainAlbumGain,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioProperties {
    pub bitrate: u32,
    pub bits_per_sample: u32,
    pub channel_count: u32,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

/// Read access to one audio file's tags.
///
/// Values come back trimmed, one entry per stored value, and are not split
/// on delimiters.
pub trait TagReader: Send {
    fn audio_properties(&self) -> AudioProperties;
    fn values_for(&self, kind: TagKind) -> Vec<String>;
    fn values_for_raw(&self, name: &str) -> Vec<String>;
    /// Calls `visitor(role, name)` per performer; role may be empty.
    fn visit_performers(&self, visitor: &mut dyn FnMut(&str, &str));
    /// Calls `visitor(language, text)` per embedded lyrics block.
    fn visit_lyrics(&self, visitor: &mut dyn FnMut(&str, &str));
    fn has_embedded_image(&self) -> bool;
}

pub type OpenTagReader = fn(&Path) -> Result<Box<dyn TagReader>, MetadataError>;

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    UnsupportedImage,
    Malformed(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::UnsupportedImage => write!(f, "unsupported image format"),
            MetadataError::Malformed(reason) => write!(f, "malformed file: {}", reason),
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
