use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStep {
    CheckForRemovedFiles,
    DiscoverFiles,
    ScanFiles,
    AssociateExternalLyrics,
    AssociatePlayListTracks,
    AssociateReleaseImages,
    AssociateMediumImages,
    AssociateTrackImages,
    AssociateArtistImages,
    RemoveOrphanedEntries,
    CheckForDuplicates,
    ReloadSimilarity,
}

impl ScanStep {
    pub const ALL: [ScanStep; 12] = [
        ScanStep::CheckForRemovedFiles,
        ScanStep::DiscoverFiles,
        ScanStep::ScanFiles,
        ScanStep::AssociateExternalLyrics,
        ScanStep::AssociatePlayListTracks,
        ScanStep::AssociateReleaseImages,
        ScanStep::AssociateMediumImages,
        ScanStep::AssociateTrackImages,
        ScanStep::AssociateArtistImages,
        ScanStep::RemoveOrphanedEntries,
        ScanStep::CheckForDuplicates,
        ScanStep::ReloadSimilarity,
    ];

    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|step| *step == self)
            .unwrap_or(0)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScanStep::CheckForRemovedFiles => "check for removed files",
            ScanStep::DiscoverFiles => "discover files",
            ScanStep::ScanFiles => "scan files",
            ScanStep::AssociateExternalLyrics => "associate external lyrics",
            ScanStep::AssociatePlayListTracks => "associate playlist tracks",
            ScanStep::AssociateReleaseImages => "associate release images",
            ScanStep::AssociateMediumImages => "associate medium images",
            ScanStep::AssociateTrackImages => "associate track images",
            ScanStep::AssociateArtistImages => "associate artist images",
            ScanStep::RemoveOrphanedEntries => "remove orphaned entries",
            ScanStep::CheckForDuplicates => "check for duplicates",
            ScanStep::ReloadSimilarity => "reload similarity",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub step: ScanStep,
    pub step_index: usize,
    pub step_count: usize,
    pub processed: usize,
    pub total: usize,
}

impl ScanProgress {
    pub fn new(step: ScanStep, total: usize) -> Self {
        Self {
            step,
            step_index: step.index(),
            step_count: ScanStep::ALL.len(),
            processed: 0,
            total,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanErrorKind {
    Io,
    CannotReadAudioFile,
    NoAudioTrack,
    BadDuration,
    CannotReadImageFile,
    CannotReadLyricsFile,
    CannotReadPlayListFile,
    CannotReadArtistInfoFile,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub path: String,
    pub kind: ScanErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDuplicate {
    pub track_id: String,
    pub path: String,
    pub mbid: String,
}

/// Counters and per-file problems of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub start_time: u64,
    pub stop_time: u64,
    pub total_file_count: usize,
    pub skips: usize,
    pub scans: usize,
    pub additions: usize,
    pub deletions: usize,
    pub updates: usize,
    pub errors: Vec<ScanError>,
    pub duplicates: Vec<ScanDuplicate>,
}

impl ScanStats {
    pub fn changes(&self) -> usize {
        self.additions + self.deletions + self.updates
    }

    pub fn processed_files(&self) -> usize {
        self.skips + self.scans
    }

    pub(crate) fn push_error(&mut self, path: &Path, kind: ScanErrorKind, message: impl Into<String>) {
        self.errors.push(ScanError {
            path: path.to_string_lossy().to_string(),
            kind,
            message: message.into(),
        });
    }
}

/// Receives notifications from a running scan. Called on the scan thread.
pub trait ScanListener: Send + Sync {
    fn on_progress(&self, _progress: &ScanProgress) {}

    /// Asked to rebuild similarity data after a run that changed the catalog.
    fn reload_similarity(&self) {}
}

pub struct NoopListener;

impl ScanListener for NoopListener {}
