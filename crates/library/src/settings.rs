use std::fs;
use std::path::{Path, PathBuf};

use common::ArtistRole;
use metadata::ParserSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Audio,
    Image,
    Lyrics,
    PlayList,
    ArtistInfo,
}

/// Artist description files are recognised by name, ignoring case.
pub const ARTIST_INFO_FILE_NAME: &str = "artist.nfo";

/// Whether a name-only artist match may attach to an artist carrying an MBID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackSettings {
    pub artist: bool,
    pub release_artist: bool,
    pub composer: bool,
    pub conductor: bool,
    pub lyricist: bool,
    pub mixer: bool,
    pub performer: bool,
    pub producer: bool,
    pub remixer: bool,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            artist: false,
            release_artist: false,
            composer: true,
            conductor: true,
            lyricist: true,
            mixer: true,
            performer: true,
            producer: true,
            remixer: true,
        }
    }
}

impl FallbackSettings {
    pub fn allows(&self, role: ArtistRole) -> bool {
        match role {
            ArtistRole::Artist => self.artist,
            ArtistRole::ReleaseArtist => self.release_artist,
            ArtistRole::Composer => self.composer,
            ArtistRole::Conductor => self.conductor,
            ArtistRole::Lyricist => self.lyricist,
            ArtistRole::Mixer => self.mixer,
            ArtistRole::Performer => self.performer,
            ArtistRole::Producer => self.producer,
            ArtistRole::Remixer => self.remixer,
        }
    }
}

/// Settings captured once per run and shared read-only by workers and the
/// reconciler.
#[derive(Clone, Debug)]
pub struct ScanSettings {
    pub media_roots: Vec<PathBuf>,
    pub audio_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub lyrics_extensions: Vec<String>,
    pub playlist_extensions: Vec<String>,
    pub artist_delimiters: Vec<String>,
    pub default_delimiters: Vec<String>,
    pub artist_whitelist: Vec<String>,
    pub user_extra_tags: Vec<String>,
    pub fallback: FallbackSettings,
    pub skip_duplicate_mbid: bool,
    pub exclude_marker: Option<String>,
    pub worker_threads: usize,
    pub scan_version: u32,
    pub artist_info_scan_version: u32,
    /// Image stems tried for release covers, in order. `*` matches any run
    /// of characters.
    pub release_image_names: Vec<String>,
    pub medium_image_names: Vec<String>,
    pub artist_image_names: Vec<String>,
    pub artist_image_fallback_to_release: bool,
    pub reload_similarity: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            media_roots: Vec::new(),
            audio_extensions: strings(&[
                "mp3", "flac", "ogg", "oga", "opus", "m4a", "m4b", "mp4", "aac", "alac", "wav",
                "wv", "ape", "mpc", "aif", "aiff", "spx",
            ]),
            image_extensions: strings(&["jpg", "jpeg", "png"]),
            lyrics_extensions: strings(&["lrc"]),
            playlist_extensions: strings(&["m3u", "m3u8"]),
            artist_delimiters: Vec::new(),
            default_delimiters: Vec::new(),
            artist_whitelist: Vec::new(),
            user_extra_tags: Vec::new(),
            fallback: FallbackSettings::default(),
            skip_duplicate_mbid: false,
            exclude_marker: Some(".noscan".to_string()),
            worker_threads: 0,
            scan_version: 0,
            artist_info_scan_version: 0,
            release_image_names: strings(&["cover", "front", "folder", "default"]),
            medium_image_names: strings(&["disc", "cd", "medium"]),
            artist_image_names: strings(&["artist"]),
            artist_image_fallback_to_release: false,
            reload_similarity: false,
        }
    }
}

impl ScanSettings {
    /// Lower-cases extensions, trims names and canonicalises roots.
    pub fn normalized(mut self) -> Self {
        self.media_roots = self
            .media_roots
            .into_iter()
            .map(|root| fs::canonicalize(&root).unwrap_or(root))
            .collect();
        for list in [
            &mut self.audio_extensions,
            &mut self.image_extensions,
            &mut self.lyrics_extensions,
            &mut self.playlist_extensions,
        ] {
            *list = list
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        // Delimiters are literal substrings, surrounding spaces included.
        for list in [&mut self.artist_delimiters, &mut self.default_delimiters] {
            list.retain(|delimiter| !delimiter.is_empty());
        }
        for list in [
            &mut self.artist_whitelist,
            &mut self.user_extra_tags,
            &mut self.release_image_names,
            &mut self.medium_image_names,
            &mut self.artist_image_names,
        ] {
            *list = list
                .iter()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect();
        }
        // Longer whitelist entries are protected before the names they contain.
        self.artist_whitelist
            .sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        self.exclude_marker = self
            .exclude_marker
            .map(|marker| marker.trim().to_string())
            .filter(|marker| !marker.is_empty());
        self
    }

    pub fn parser_settings(&self) -> ParserSettings {
        ParserSettings {
            artist_delimiters: self.artist_delimiters.clone(),
            default_delimiters: self.default_delimiters.clone(),
            artist_whitelist: self.artist_whitelist.clone(),
            user_extra_tags: self.user_extra_tags.clone(),
        }
    }

    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            (num_cpus::get() / 2).max(1)
        }
    }

    pub fn file_kind(&self, path: &Path) -> Option<FileKind> {
        let is_artist_info = path
            .file_name()
            .map(|name| name.to_string_lossy().eq_ignore_ascii_case(ARTIST_INFO_FILE_NAME))
            .unwrap_or(false);
        if is_artist_info {
            return Some(FileKind::ArtistInfo);
        }
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        if self.audio_extensions.contains(&ext) {
            Some(FileKind::Audio)
        } else if self.image_extensions.contains(&ext) {
            Some(FileKind::Image)
        } else if self.lyrics_extensions.contains(&ext) {
            Some(FileKind::Lyrics)
        } else if self.playlist_extensions.contains(&ext) {
            Some(FileKind::PlayList)
        } else {
            None
        }
    }

    /// Everything the association steps depend on besides the files.
    pub fn association_fingerprint(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (label, names) in [
            ("release", &self.release_image_names),
            ("medium", &self.medium_image_names),
            ("artist", &self.artist_image_names),
        ] {
            out.push(format!("{}={}", label, names.join("\u{1f}")));
        }
        out.push(format!(
            "artist_fallback={}",
            self.artist_image_fallback_to_release
        ));
        out
    }

    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.media_roots
            .iter()
            .map(PathBuf::as_path)
            .find(|root| path.starts_with(root))
    }

    /// True when `dir` holds the exclude marker file.
    pub fn is_excluded_dir(&self, dir: &Path) -> bool {
        match &self.exclude_marker {
            Some(marker) => dir.join(marker).is_file(),
            None => false,
        }
    }

    /// True when `path` lies inside a root and no directory between them is
    /// excluded.
    pub fn is_in_scope(&self, path: &Path) -> bool {
        let root = match self.root_for(path) {
            Some(root) => root,
            None => return false,
        };
        let mut current = path.parent();
        while let Some(dir) = current {
            if self.is_excluded_dir(dir) {
                return false;
            }
            if dir == root {
                break;
            }
            current = dir.parent();
        }
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Re-parse every file even when its fingerprint is unchanged.
    pub full_scan: bool,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
