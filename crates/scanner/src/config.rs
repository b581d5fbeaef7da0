use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{FallbackSettings, ScanSettings};
use serde::{Deserialize, Serialize};
use time::Time;

use crate::schedule::{parse_start_time, UpdatePeriod};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_INDEX_PATH: &str = "catalog.redb";
const DEFAULT_START_TIME: &str = "00:00";

/// Whether a name-only match may attach to an artist that already has an MBID,
/// per role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
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

impl Default for FallbackConfig {
    fn default() -> Self {
        let defaults = FallbackSettings::default();
        Self {
            artist: defaults.artist,
            release_artist: defaults.release_artist,
            composer: defaults.composer,
            conductor: defaults.conductor,
            lyricist: defaults.lyricist,
            mixer: defaults.mixer,
            performer: defaults.performer,
            producer: defaults.producer,
            remixer: defaults.remixer,
        }
    }
}

impl FallbackConfig {
    fn to_settings(&self) -> FallbackSettings {
        FallbackSettings {
            artist: self.artist,
            release_artist: self.release_artist,
            composer: self.composer,
            conductor: self.conductor,
            lyricist: self.lyricist,
            mixer: self.mixer,
            performer: self.performer,
            producer: self.producer,
            remixer: self.remixer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub version: u32,
    pub index_path: String,
    pub media_roots: Vec<String>,
    pub update_period: UpdatePeriod,
    /// `HH:MM`, UTC.
    pub start_time: String,
    pub audio_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub lyrics_extensions: Vec<String>,
    pub playlist_extensions: Vec<String>,
    pub artist_delimiters: Vec<String>,
    pub default_delimiters: Vec<String>,
    pub artist_whitelist: Vec<String>,
    pub user_extra_tags: Vec<String>,
    pub fallback: FallbackConfig,
    pub skip_duplicate_mbid: bool,
    pub exclude_marker: String,
    pub worker_threads: usize,
    pub reload_similarity: bool,
    pub release_image_names: Vec<String>,
    pub medium_image_names: Vec<String>,
    pub artist_image_names: Vec<String>,
    pub artist_image_fallback_to_release: bool,
    pub scan_version: u32,
    /// Bumped when artist info files must be read again.
    pub artist_info_scan_version: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let defaults = ScanSettings::default();
        Self {
            version: CONFIG_VERSION,
            index_path: DEFAULT_INDEX_PATH.to_string(),
            media_roots: Vec::new(),
            update_period: UpdatePeriod::Never,
            start_time: DEFAULT_START_TIME.to_string(),
            audio_extensions: defaults.audio_extensions,
            image_extensions: defaults.image_extensions,
            lyrics_extensions: defaults.lyrics_extensions,
            playlist_extensions: defaults.playlist_extensions,
            artist_delimiters: Vec::new(),
            default_delimiters: Vec::new(),
            artist_whitelist: Vec::new(),
            user_extra_tags: Vec::new(),
            fallback: FallbackConfig::default(),
            skip_duplicate_mbid: false,
            exclude_marker: defaults.exclude_marker.unwrap_or_default(),
            worker_threads: 0,
            reload_similarity: false,
            release_image_names: defaults.release_image_names,
            medium_image_names: defaults.medium_image_names,
            artist_image_names: defaults.artist_image_names,
            artist_image_fallback_to_release: defaults.artist_image_fallback_to_release,
            scan_version: 0,
            artist_info_scan_version: 0,
        }
    }
}

impl ScannerConfig {
    pub fn start_time(&self) -> Result<Time, ConfigError> {
        parse_start_time(&self.start_time)
            .ok_or_else(|| ConfigError::InvalidStartTime(self.start_time.clone()))
    }

    /// True when switching from `self` to `other` changes how files are
    /// parsed or reconciled.
    pub fn affects_scan(&self, other: &ScannerConfig) -> bool {
        self.audio_extensions != other.audio_extensions
            || self.image_extensions != other.image_extensions
            || self.lyrics_extensions != other.lyrics_extensions
            || self.playlist_extensions != other.playlist_extensions
            || self.artist_delimiters != other.artist_delimiters
            || self.default_delimiters != other.default_delimiters
            || self.artist_whitelist != other.artist_whitelist
            || self.user_extra_tags != other.user_extra_tags
            || self.fallback != other.fallback
    }

    /// True when artist info files resolve to artists differently.
    pub fn affects_artist_infos(&self, other: &ScannerConfig) -> bool {
        self.fallback.artist != other.fallback.artist
    }

    /// Immutable snapshot handed to one scan run.
    pub fn to_scan_settings(&self, config_path: &Path) -> ScanSettings {
        let exclude_marker = self.exclude_marker.trim();
        ScanSettings {
            media_roots: self
                .media_roots
                .iter()
                .map(|root| root.trim())
                .filter(|root| !root.is_empty())
                .map(|root| resolve_path(config_path, root))
                .collect(),
            audio_extensions: self.audio_extensions.clone(),
            image_extensions: self.image_extensions.clone(),
            lyrics_extensions: self.lyrics_extensions.clone(),
            playlist_extensions: self.playlist_extensions.clone(),
            artist_delimiters: self.artist_delimiters.clone(),
            default_delimiters: self.default_delimiters.clone(),
            artist_whitelist: self.artist_whitelist.clone(),
            user_extra_tags: self.user_extra_tags.clone(),
            fallback: self.fallback.to_settings(),
            skip_duplicate_mbid: self.skip_duplicate_mbid,
            exclude_marker: if exclude_marker.is_empty() {
                None
            } else {
                Some(exclude_marker.to_string())
            },
            worker_threads: self.worker_threads,
            scan_version: self.scan_version,
            artist_info_scan_version: self.artist_info_scan_version,
            release_image_names: self.release_image_names.clone(),
            medium_image_names: self.medium_image_names.clone(),
            artist_image_names: self.artist_image_names.clone(),
            artist_image_fallback_to_release: self.artist_image_fallback_to_release,
            reload_similarity: self.reload_similarity,
        }
        .normalized()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidStartTime(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
            ConfigError::InvalidStartTime(value) => {
                write!(f, "invalid start time {:?} (expected HH:MM)", value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MEDIA_SCANNER_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ScannerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ScannerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = DEFAULT_INDEX_PATH.to_string();
        }
        if config.start_time.trim().is_empty() {
            config.start_time = DEFAULT_START_TIME.to_string();
        }
        config.start_time()?;
        return Ok((config, false));
    }

    let config = ScannerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ScannerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Validates and saves `updated`, bumping the scan version when the change
/// affects scanning. Returns the config as saved.
pub fn update_config(
    path: &Path,
    current: &ScannerConfig,
    mut updated: ScannerConfig,
) -> Result<ScannerConfig, ConfigError> {
    updated.start_time()?;
    updated.version = CONFIG_VERSION;
    updated.scan_version = current.scan_version;
    updated.artist_info_scan_version = current.artist_info_scan_version;
    if current.affects_scan(&updated) {
        updated.scan_version = current.scan_version.wrapping_add(1);
    }
    if current.affects_artist_infos(&updated) {
        updated.artist_info_scan_version = current.artist_info_scan_version.wrapping_add(1);
    }
    save_config(path, &updated)?;
    Ok(updated)
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
