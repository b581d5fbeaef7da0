use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

mod date;

pub use date::{DatePrecision, PartialDate};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub mbid: Option<Uuid>,
    pub preferred_image_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub mbid: Option<Uuid>,
    pub group_mbid: Option<Uuid>,
    pub total_disc: Option<u32>,
    pub artist_display_name: String,
    pub is_compilation: bool,
    pub barcode: String,
    pub comment: String,
    pub labels: Vec<String>,
    pub countries: Vec<String>,
    pub release_types: Vec<String>,
    pub preferred_image_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub id: String,
    pub release_id: String,
    pub position: Option<u32>,
    pub name: String,
    pub media: String,
    pub track_count: Option<u32>,
    pub replay_gain: Option<f32>,
    pub preferred_image_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtistRole {
    Artist,
    ReleaseArtist,
    Composer,
    Conductor,
    Lyricist,
    Mixer,
    Performer,
    Producer,
    Remixer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistLink {
    pub artist_id: String,
    pub role: ArtistRole,
    /// Instrument or part for performers, empty otherwise.
    pub sub_role: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advisory {
    Unknown,
    Explicit,
    Clean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterType {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub type_name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Lyrics {
    pub language: String,
    pub offset_ms: i64,
    pub display_artist: String,
    pub display_album: String,
    pub display_title: String,
    pub synchronized_lines: BTreeMap<u64, String>,
    pub unsynchronized_lines: Vec<String>,
}

impl Lyrics {
    pub fn is_synchronized(&self) -> bool {
        !self.synchronized_lines.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.synchronized_lines.is_empty() && self.unsynchronized_lines.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub absolute_path: String,
    pub relative_path: String,
    pub directory: String,
    pub root: String,
    pub file_size: u64,
    /// Milliseconds since the unix epoch.
    pub last_write_time: u64,
    pub added_time: u64,
    pub scan_version: u32,
    pub title: String,
    pub position: Option<u32>,
    pub disc_number: Option<u32>,
    pub total_track: Option<u32>,
    pub disc_subtitle: String,
    pub release_id: Option<String>,
    pub medium_id: Option<String>,
    pub artist_display_name: String,
    pub artist_links: Vec<ArtistLink>,
    pub cluster_ids: Vec<String>,
    pub duration_ms: u64,
    pub bitrate: u32,
    pub bits_per_sample: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
    pub date: Option<PartialDate>,
    pub original_date: Option<PartialDate>,
    pub original_year: Option<i32>,
    pub mbid: Option<Uuid>,
    pub recording_mbid: Option<Uuid>,
    pub copyright: String,
    pub copyright_url: String,
    pub advisory: Option<Advisory>,
    pub comments: Vec<String>,
    pub replay_gain: Option<f32>,
    pub release_replay_gain: Option<f32>,
    pub lyrics: Vec<Lyrics>,
    pub has_cover: bool,
    /// Cover shown for the track: its own image, else the medium's, else the release's.
    pub preferred_image_id: Option<String>,
    /// Image of the physical medium the track sits on.
    pub preferred_media_image_id: Option<String>,
}

impl Track {
    pub fn new(id: String, absolute_path: String) -> Self {
        Self {
            id,
            absolute_path,
            relative_path: String::new(),
            directory: String::new(),
            root: String::new(),
            file_size: 0,
            last_write_time: 0,
            added_time: 0,
            scan_version: 0,
            title: String::new(),
            position: None,
            disc_number: None,
            total_track: None,
            disc_subtitle: String::new(),
            release_id: None,
            medium_id: None,
            artist_display_name: String::new(),
            artist_links: Vec::new(),
            cluster_ids: Vec::new(),
            duration_ms: 0,
            bitrate: 0,
            bits_per_sample: 0,
            channel_count: 0,
            sample_rate: 0,
            date: None,
            original_date: None,
            original_year: None,
            mbid: None,
            recording_mbid: None,
            copyright: String::new(),
            copyright_url: String::new(),
            advisory: None,
            comments: Vec::new(),
            replay_gain: None,
            release_replay_gain: None,
            lyrics: Vec::new(),
            has_cover: false,
            preferred_image_id: None,
            preferred_media_image_id: None,
        }
    }

    pub fn artist_ids(&self, role: ArtistRole) -> impl Iterator<Item = &str> {
        self.artist_links
            .iter()
            .filter(move |link| link.role == role)
            .map(|link| link.artist_id.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    pub id: String,
    pub absolute_path: String,
    pub directory: String,
    pub stem: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub last_write_time: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LyricsFile {
    pub id: String,
    pub absolute_path: String,
    pub directory: String,
    pub stem: String,
    pub file_size: u64,
    pub last_write_time: u64,
    pub lyrics: Lyrics,
    pub track_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayListFile {
    pub id: String,
    pub absolute_path: String,
    pub directory: String,
    pub name: String,
    /// Entries exactly as listed in the file.
    pub files: Vec<String>,
    /// Tracks the entries resolved to, in playlist order.
    pub track_ids: Vec<String>,
    pub file_size: u64,
    pub last_write_time: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtistInfo {
    pub id: String,
    pub absolute_path: String,
    pub directory: String,
    pub name: String,
    pub sort_name: String,
    pub mbid: Option<Uuid>,
    pub artist_type: String,
    pub gender: String,
    pub disambiguation: String,
    pub biography: String,
    pub artist_id: Option<String>,
    /// The linked artist carries the same MBID as the file.
    pub mbid_matched: bool,
    pub scan_version: u32,
    pub file_size: u64,
    pub last_write_time: u64,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn mbid_key(mbid: &Uuid) -> String {
    mbid.hyphenated().to_string()
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::{file_stem, relpath_from, stable_id};
    use std::path::Path;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("/music/Artist/Album/cover.jpg");
        let second = stable_id("/music/Artist/Album/cover.jpg");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("/music/Artist/Album/folder.jpg"));
    }

    #[test]
    fn relpath_uses_forward_slashes() {
        let root = Path::new("/music");
        let path = Path::new("/music/Artist/Album/01.flac");
        assert_eq!(
            relpath_from(root, path).as_deref(),
            Some("Artist/Album/01.flac")
        );
        assert_eq!(relpath_from(root, Path::new("/other/01.flac")), None);
    }

    #[test]
    fn file_stem_drops_extension() {
        assert_eq!(file_stem(Path::new("/music/a/01 - Intro.lrc")), "01 - Intro");
    }
}
