use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{path_string, ArtistInfo, ImageFile, LyricsFile, PlayListFile, Track};
use metadata::{open_tag_reader, OpenTagReader, TrackMetadataParser};
use redb::{ReadTransaction, WriteTransaction};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::apply::Applier;
use crate::associate::Associator;
use crate::catalog::{self, Catalog};
use crate::queue::{FileInfo, FileScanQueue, ScanOutput, ScanRequest};
use crate::reconcile::sync_cluster_types;
use crate::settings::{FileKind, ScanOptions, ScanSettings};
use crate::stats::{
    ScanDuplicate, ScanErrorKind, ScanListener, ScanProgress, ScanStats, ScanStep,
};
use crate::{modified_millis, now_millis, LibraryError};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const REMOVED_FILES_BATCH: usize = 50;
const ORPHANS_BATCH: usize = 200;
const RESULTS_BATCH: usize = 50;

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(ScanStats),
    /// The abort flag was raised; everything committed so far is consistent.
    Aborted,
}

/// Runs scans against one catalog. A run is synchronous and must not overlap
/// with another run on the same catalog.
pub struct Scanner {
    catalog: Catalog,
    open_reader: OpenTagReader,
}

impl Scanner {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_tag_reader(catalog, open_tag_reader)
    }

    pub fn with_tag_reader(catalog: Catalog, open_reader: OpenTagReader) -> Self {
        Self {
            catalog,
            open_reader,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn run(
        &self,
        settings: Arc<ScanSettings>,
        options: ScanOptions,
        abort: Arc<AtomicBool>,
        listener: &dyn ScanListener,
    ) -> Result<ScanOutcome, LibraryError> {
        let run = ScanRun {
            catalog: &self.catalog,
            open_reader: self.open_reader,
            settings,
            options,
            abort,
            progress: Progress::new(listener),
            stats: ScanStats::default(),
            files: Vec::new(),
            first_scan: false,
            associations_needed: None,
        };
        run.execute()
    }
}

struct Progress<'a> {
    listener: &'a dyn ScanListener,
    current: ScanProgress,
    last_report: Instant,
}

impl<'a> Progress<'a> {
    fn new(listener: &'a dyn ScanListener) -> Self {
        Self {
            listener,
            current: ScanProgress::new(ScanStep::CheckForRemovedFiles, 0),
            last_report: Instant::now(),
        }
    }

    fn start(&mut self, step: ScanStep, total: usize) {
        self.current = ScanProgress::new(step, total);
        self.emit();
    }

    fn update(&mut self, processed: usize) {
        self.current.processed = processed;
        if self.current.total < processed {
            self.current.total = processed;
        }
        if self.last_report.elapsed() >= PROGRESS_INTERVAL {
            self.emit();
        }
    }

    fn finish(&mut self) {
        self.emit();
    }

    fn emit(&mut self) {
        self.last_report = Instant::now();
        self.listener.on_progress(&self.current);
    }
}

enum FileCheck {
    Skip,
    Scan(FileInfo),
    Failed,
}

trait FileRecord {
    fn record_id(&self) -> &str;
    fn record_path(&self) -> &str;
}

impl FileRecord for Track {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn record_path(&self) -> &str {
        &self.absolute_path
    }
}

impl FileRecord for ImageFile {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn record_path(&self) -> &str {
        &self.absolute_path
    }
}

impl FileRecord for LyricsFile {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn record_path(&self) -> &str {
        &self.absolute_path
    }
}

impl FileRecord for PlayListFile {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn record_path(&self) -> &str {
        &self.absolute_path
    }
}

impl FileRecord for ArtistInfo {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn record_path(&self) -> &str {
        &self.absolute_path
    }
}

struct ScanRun<'a> {
    catalog: &'a Catalog,
    open_reader: OpenTagReader,
    settings: Arc<ScanSettings>,
    options: ScanOptions,
    abort: Arc<AtomicBool>,
    progress: Progress<'a>,
    stats: ScanStats,
    files: Vec<(PathBuf, FileKind)>,
    first_scan: bool,
    /// Decided once the files are scanned.
    associations_needed: Option<bool>,
}

impl ScanRun<'_> {
    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn execute(mut self) -> Result<ScanOutcome, LibraryError> {
        self.stats.start_time = now_millis();
        info!(
            "Scan started (roots: {:?}, full: {})",
            self.settings.media_roots, self.options.full_scan
        );

        let extra_tags = self.settings.user_extra_tags.clone();
        if self.catalog.write(|txn| sync_cluster_types(txn, &extra_tags))? {
            info!("Cluster types updated");
        }
        self.first_scan = self.catalog.read(|txn| catalog::track_count(txn))? == 0;

        for step in ScanStep::ALL {
            if self.aborted() {
                break;
            }
            info!("Scan step {}/{}: {}", step.index() + 1, ScanStep::ALL.len(), step.name());
            match step {
                ScanStep::CheckForRemovedFiles => self.check_for_removed_files()?,
                ScanStep::DiscoverFiles => self.discover_files(),
                ScanStep::ScanFiles => self.scan_files()?,
                ScanStep::AssociateExternalLyrics
                | ScanStep::AssociatePlayListTracks
                | ScanStep::AssociateReleaseImages
                | ScanStep::AssociateMediumImages
                | ScanStep::AssociateTrackImages
                | ScanStep::AssociateArtistImages => self.associate(step)?,
                ScanStep::RemoveOrphanedEntries => self.remove_orphaned_entries()?,
                ScanStep::CheckForDuplicates => self.check_for_duplicates()?,
                ScanStep::ReloadSimilarity => self.reload_similarity(),
            }
        }

        if self.aborted() {
            info!("Scan aborted");
            return Ok(ScanOutcome::Aborted);
        }

        self.stats.stop_time = now_millis();
        let stats = self.stats;
        info!(
            "Scan complete in {} ms: {} files, {} skipped, {} scanned, {} added, {} updated, {} removed, {} errors, {} duplicates",
            stats.stop_time.saturating_sub(stats.start_time),
            stats.total_file_count,
            stats.skips,
            stats.scans,
            stats.additions,
            stats.updates,
            stats.deletions,
            stats.errors.len(),
            stats.duplicates.len()
        );
        Ok(ScanOutcome::Completed(stats))
    }

    /// Keeps a catalog file only while it exists, still has a known
    /// extension of its kind and stays inside a non-excluded root.
    fn is_current(&self, path: &Path, kind: FileKind) -> bool {
        self.settings.file_kind(path) == Some(kind)
            && self.settings.is_in_scope(path)
            && path.is_file()
    }

    fn check_for_removed_files(&mut self) -> Result<(), LibraryError> {
        let total = self.catalog.read(|txn| {
            Ok(catalog::track_count(txn)?
                + catalog::image_count(txn)?
                + catalog::lyrics_file_count(txn)?
                + catalog::playlist_count(txn)?
                + catalog::artist_info_count(txn)?)
        })?;
        self.progress.start(ScanStep::CheckForRemovedFiles, total as usize);

        let mut processed = 0;
        self.remove_missing(
            FileKind::Audio,
            &mut processed,
            |txn, after| catalog::tracks_page(txn, after, REMOVED_FILES_BATCH),
            |txn, id| catalog::remove_track(txn, id).map(|_| ()),
        )?;
        self.remove_missing(
            FileKind::Image,
            &mut processed,
            |txn, after| catalog::images_page(txn, after, REMOVED_FILES_BATCH),
            |txn, id| catalog::remove_image(txn, id),
        )?;
        self.remove_missing(
            FileKind::Lyrics,
            &mut processed,
            |txn, after| catalog::lyrics_files_page(txn, after, REMOVED_FILES_BATCH),
            |txn, id| catalog::remove_lyrics_file(txn, id),
        )?;
        self.remove_missing(
            FileKind::PlayList,
            &mut processed,
            |txn, after| catalog::playlists_page(txn, after, REMOVED_FILES_BATCH),
            |txn, id| catalog::remove_playlist(txn, id),
        )?;
        self.remove_missing(
            FileKind::ArtistInfo,
            &mut processed,
            |txn, after| catalog::artist_infos_page(txn, after, REMOVED_FILES_BATCH),
            |txn, id| catalog::remove_artist_info(txn, id),
        )?;
        self.progress.finish();
        Ok(())
    }

    fn remove_missing<T: FileRecord>(
        &mut self,
        kind: FileKind,
        processed: &mut usize,
        load_page: impl Fn(&ReadTransaction, Option<&str>) -> Result<Vec<T>, LibraryError>,
        remove: impl Fn(&WriteTransaction, &str) -> Result<(), LibraryError>,
    ) -> Result<(), LibraryError> {
        let mut after: Option<String> = None;
        loop {
            if self.aborted() {
                return Ok(());
            }
            let records = self.catalog.read(|txn| load_page(txn, after.as_deref()))?;
            let stale: Vec<&T> = records
                .iter()
                .filter(|record| !self.is_current(Path::new(record.record_path()), kind))
                .collect();
            if !stale.is_empty() {
                self.catalog.write(|txn| {
                    for record in &stale {
                        remove(txn, record.record_id())?;
                    }
                    Ok(())
                })?;
                for record in &stale {
                    debug!("Removed {:?} from catalog", record.record_path());
                }
                self.stats.deletions += stale.len();
            }

            *processed += records.len();
            self.progress.update(*processed);
            match records.last() {
                Some(last) if records.len() == REMOVED_FILES_BATCH => {
                    after = Some(last.record_id().to_string());
                }
                _ => return Ok(()),
            }
        }
    }

    fn discover_files(&mut self) {
        self.progress.start(ScanStep::DiscoverFiles, 0);
        let settings = Arc::clone(&self.settings);
        let mut files: Vec<(PathBuf, FileKind)> = Vec::new();

        for root in &settings.media_roots {
            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    !(entry.file_type().is_dir() && settings.is_excluded_dir(entry.path()))
                });
            for entry in walker {
                if self.aborted() {
                    return;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("Failed to walk {:?}: {}", err.path(), err);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(kind) = settings.file_kind(entry.path()) {
                    files.push((entry.into_path(), kind));
                    self.progress.update(files.len());
                }
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        files.dedup_by(|a, b| a.0 == b.0);
        info!("Discovered {} files", files.len());
        self.stats.total_file_count = files.len();
        self.files = files;
        self.progress.finish();
    }

    fn check_file(&mut self, path: &Path, kind: FileKind) -> Result<FileCheck, LibraryError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to stat {:?}: {}", path, err);
                self.stats.push_error(path, ScanErrorKind::Io, err.to_string());
                return Ok(FileCheck::Failed);
            }
        };
        let file_info = FileInfo {
            file_size: metadata.len(),
            last_write_time: modified_millis(&metadata),
        };
        if self.options.full_scan {
            return Ok(FileCheck::Scan(file_info));
        }

        let path_str = path_string(path);
        let scan_version = self.settings.scan_version;
        let artist_info_scan_version = self.settings.artist_info_scan_version;
        let unchanged = self.catalog.read(|txn| {
            Ok(match kind {
                FileKind::Audio => catalog::find_track_by_path(txn, &path_str)?.map_or(false, |track| {
                    track.last_write_time == file_info.last_write_time
                        && track.scan_version == scan_version
                }),
                FileKind::Image => catalog::find_image_by_path(txn, &path_str)?
                    .map_or(false, |image| image.last_write_time == file_info.last_write_time),
                FileKind::Lyrics => catalog::find_lyrics_file_by_path(txn, &path_str)?
                    .map_or(false, |lyrics| lyrics.last_write_time == file_info.last_write_time),
                FileKind::PlayList => catalog::find_playlist_by_path(txn, &path_str)?
                    .map_or(false, |playlist| playlist.last_write_time == file_info.last_write_time),
                FileKind::ArtistInfo => catalog::find_artist_info_by_path(txn, &path_str)?
                    .map_or(false, |info| {
                        info.last_write_time == file_info.last_write_time
                            && info.scan_version == artist_info_scan_version
                    }),
            })
        })?;
        Ok(if unchanged {
            FileCheck::Skip
        } else {
            FileCheck::Scan(file_info)
        })
    }

    fn scan_files(&mut self) -> Result<(), LibraryError> {
        let files = std::mem::take(&mut self.files);
        self.progress.start(ScanStep::ScanFiles, files.len());

        let parser = Arc::new(TrackMetadataParser::new(self.settings.parser_settings()));
        let queue = FileScanQueue::new(
            self.settings.effective_worker_threads(),
            parser,
            self.open_reader,
            Arc::clone(&self.abort),
        )?;
        let max_ongoing = queue.thread_count() * 2;
        debug!("Scanning with {} workers", queue.thread_count());

        let mut processed = 0;
        for (path, kind) in files {
            if self.aborted() {
                break;
            }
            match self.check_file(&path, kind)? {
                FileCheck::Skip => self.stats.skips += 1,
                FileCheck::Failed => {}
                FileCheck::Scan(file_info) => {
                    self.stats.scans += 1;
                    queue.push_scan_request(ScanRequest {
                        path,
                        kind,
                        file_info,
                    });
                }
            }
            queue.wait(max_ongoing);
            self.apply_results(&queue)?;
            processed += 1;
            self.progress.update(processed);
        }

        queue.wait(0);
        self.apply_results(&queue)?;
        self.progress.finish();
        Ok(())
    }

    fn apply_results(&mut self, queue: &FileScanQueue) -> Result<(), LibraryError> {
        let applier = Applier {
            settings: &self.settings,
            first_scan: self.first_scan,
        };
        loop {
            let results = queue.pop_results(RESULTS_BATCH);
            if results.is_empty() {
                return Ok(());
            }
            for result in results {
                // Parsed results are dropped once the run is aborted.
                if self.abort.load(Ordering::Relaxed) {
                    continue;
                }
                let stats = &mut self.stats;
                let request = &result.request;
                match result.output {
                    ScanOutput::Audio(parsed) => self
                        .catalog
                        .write(|txn| applier.apply_audio(txn, stats, request, parsed))?,
                    ScanOutput::Image(info) => self
                        .catalog
                        .write(|txn| applier.apply_image(txn, stats, request, info))?,
                    ScanOutput::Lyrics(lyrics) => self
                        .catalog
                        .write(|txn| applier.apply_lyrics(txn, stats, request, lyrics))?,
                    ScanOutput::PlayList(parsed) => self
                        .catalog
                        .write(|txn| applier.apply_playlist(txn, stats, request, parsed))?,
                    ScanOutput::ArtistInfo(parsed) => self
                        .catalog
                        .write(|txn| applier.apply_artist_info(txn, stats, request, parsed))?,
                    ScanOutput::Discarded => {}
                }
            }
        }
    }

    /// Association steps run when the catalog changed during this run or the
    /// settings they depend on differ from the last completed pass.
    fn needs_associations(&mut self) -> Result<bool, LibraryError> {
        if let Some(needed) = self.associations_needed {
            return Ok(needed);
        }
        let fingerprint = self.settings.association_fingerprint();
        let needed = self.stats.changes() > 0
            || self.options.full_scan
            || self.catalog.read(|txn| catalog::load_association_settings(txn))? != fingerprint;
        self.associations_needed = Some(needed);
        Ok(needed)
    }

    fn associate(&mut self, step: ScanStep) -> Result<(), LibraryError> {
        if !self.needs_associations()? {
            return Ok(());
        }
        let settings = Arc::clone(&self.settings);
        let abort = Arc::clone(&self.abort);
        let associator = Associator {
            catalog: self.catalog,
            settings: &settings,
            abort: &abort,
        };
        self.progress.start(step, associator.total(step)?);
        let progress = &mut self.progress;
        let updated = associator.run(step, &mut |processed| progress.update(processed))?;
        if updated > 0 {
            info!("{}: {} records updated", step.name(), updated);
        }
        self.progress.finish();

        if step == ScanStep::AssociateArtistImages && !self.aborted() {
            let fingerprint = settings.association_fingerprint();
            self.catalog
                .write(|txn| catalog::store_association_settings(txn, &fingerprint))?;
        }
        Ok(())
    }

    fn remove_orphaned_entries(&mut self) -> Result<(), LibraryError> {
        let (clusters, artists, mediums, releases) = self.catalog.read(|txn| {
            let refs = catalog::collect_references(txn)?;
            let unreferenced = |ids: Vec<String>, used: &std::collections::HashSet<String>| {
                ids.into_iter()
                    .filter(|id| !used.contains(id))
                    .collect::<Vec<String>>()
            };
            Ok((
                unreferenced(catalog::cluster_ids(txn)?, &refs.clusters),
                unreferenced(catalog::artist_ids(txn)?, &refs.artists),
                unreferenced(catalog::medium_ids(txn)?, &refs.mediums),
                unreferenced(catalog::release_ids(txn)?, &refs.releases),
            ))
        })?;

        let total = clusters.len() + artists.len() + mediums.len() + releases.len();
        self.progress.start(ScanStep::RemoveOrphanedEntries, total);
        let mut processed = 0;
        self.remove_orphans("clusters", &clusters, &mut processed, |txn, id| {
            catalog::remove_cluster(txn, id)
        })?;
        self.remove_orphans("artists", &artists, &mut processed, |txn, id| {
            catalog::remove_artist(txn, id)
        })?;
        self.remove_orphans("mediums", &mediums, &mut processed, |txn, id| {
            catalog::remove_medium(txn, id)
        })?;
        self.remove_orphans("releases", &releases, &mut processed, |txn, id| {
            catalog::remove_release(txn, id)
        })?;
        self.progress.finish();
        Ok(())
    }

    fn remove_orphans(
        &mut self,
        label: &str,
        ids: &[String],
        processed: &mut usize,
        remove: impl Fn(&WriteTransaction, &str) -> Result<bool, LibraryError>,
    ) -> Result<(), LibraryError> {
        for chunk in ids.chunks(ORPHANS_BATCH) {
            if self.aborted() {
                return Ok(());
            }
            self.catalog.write(|txn| {
                for id in chunk {
                    remove(txn, id)?;
                }
                Ok(())
            })?;
            *processed += chunk.len();
            self.progress.update(*processed);
        }
        if !ids.is_empty() {
            info!("Removed {} orphaned {}", ids.len(), label);
        }
        Ok(())
    }

    fn check_for_duplicates(&mut self) -> Result<(), LibraryError> {
        self.progress.start(ScanStep::CheckForDuplicates, 0);
        let duplicates = self.catalog.read(|txn| {
            let mut duplicates = Vec::new();
            for (mbid, ids) in catalog::duplicate_mbid_groups(txn)? {
                for id in ids {
                    if let Some(track) = catalog::get_track(txn, &id)? {
                        duplicates.push(ScanDuplicate {
                            track_id: id,
                            path: track.absolute_path,
                            mbid: mbid.clone(),
                        });
                    }
                }
            }
            Ok(duplicates)
        })?;
        for duplicate in &duplicates {
            warn!("Duplicate track MBID {}: {:?}", duplicate.mbid, duplicate.path);
        }
        self.progress.update(duplicates.len());
        self.stats.duplicates = duplicates;
        self.progress.finish();
        Ok(())
    }

    fn reload_similarity(&mut self) {
        if !self.settings.reload_similarity || self.stats.changes() == 0 {
            return;
        }
        self.progress.start(ScanStep::ReloadSimilarity, 1);
        self.progress.listener.reload_similarity();
        self.progress.update(1);
        self.progress.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicUsize;

    use common::ArtistRole;
    use metadata::{AudioProperties, MetadataError, TagKind, TagReader};

    use super::*;
    use crate::stats::NoopListener;

    /// Reads `KEY=value` lines; a line `BROKEN` makes the file unreadable.
    struct FakeTagReader {
        values: Vec<(String, String)>,
    }

    impl FakeTagReader {
        fn value(&self, key: &str) -> Option<&str> {
            self.values
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        }

        fn number(&self, key: &str, default: u64) -> u64 {
            self.value(key)
                .and_then(|value| value.parse().ok())
                .unwrap_or(default)
        }
    }

    impl TagReader for FakeTagReader {
        fn audio_properties(&self) -> AudioProperties {
            AudioProperties {
                bitrate: 320,
                bits_per_sample: 16,
                channel_count: self.number("CHANNELS", 2) as u32,
                duration_ms: self.number("DURATION", 180_000),
                sample_rate: self.number("SAMPLERATE", 44_100) as u32,
            }
        }

        fn values_for(&self, kind: TagKind) -> Vec<String> {
            let key = match kind {
                TagKind::Title => "TITLE",
                TagKind::Artist => "ARTIST",
                TagKind::MusicBrainzArtistId => "MUSICBRAINZ_ARTISTID",
                TagKind::Album => "ALBUM",
                TagKind::AlbumArtist => "ALBUMARTIST",
                TagKind::MusicBrainzTrackId => "MUSICBRAINZ_TRACKID",
                TagKind::TrackNumber => "TRACKNUMBER",
                TagKind::DiscNumber => "DISCNUMBER",
                TagKind::DiscSubtitle => "DISCSUBTITLE",
                TagKind::MusicBrainzReleaseId => "MUSICBRAINZ_ALBUMID",
                TagKind::Genre => "GENRE",
                TagKind::Conductor => "CONDUCTOR",
                _ => return Vec::new(),
            };
            self.values_for_raw(key)
        }

        fn values_for_raw(&self, name: &str) -> Vec<String> {
            self.values
                .iter()
                .filter(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .collect()
        }

        fn visit_performers(&self, _visitor: &mut dyn FnMut(&str, &str)) {}

        fn visit_lyrics(&self, _visitor: &mut dyn FnMut(&str, &str)) {}

        fn has_embedded_image(&self) -> bool {
            false
        }
    }

    fn open_fake(path: &Path) -> Result<Box<dyn TagReader>, MetadataError> {
        let text = fs::read_to_string(path)?;
        if text.lines().any(|line| line.trim() == "BROKEN") {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "broken tags").into());
        }
        let values = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Ok(Box::new(FakeTagReader { values }))
    }

    struct Library {
        _db_dir: tempfile::TempDir,
        media: tempfile::TempDir,
        scanner: Scanner,
    }

    impl Library {
        fn new() -> Self {
            let db_dir = tempfile::tempdir().unwrap();
            let media = tempfile::tempdir().unwrap();
            let catalog = Catalog::open(&db_dir.path().join("catalog.redb")).unwrap();
            Self {
                _db_dir: db_dir,
                media,
                scanner: Scanner::with_tag_reader(catalog, open_fake),
            }
        }

        fn root(&self) -> PathBuf {
            fs::canonicalize(self.media.path()).unwrap()
        }

        fn write(&self, rel: &str, lines: &[&str]) -> PathBuf {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, lines.join("\n")).unwrap();
            path
        }

        /// Just enough of a PNG for its header to be read.
        fn write_png(&self, rel: &str) -> PathBuf {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            let mut data = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR".to_vec();
            data.extend_from_slice(&300u32.to_be_bytes());
            data.extend_from_slice(&300u32.to_be_bytes());
            data.extend_from_slice(&[8, 2, 0, 0, 0, 0, 0, 0, 0]);
            fs::write(&path, data).unwrap();
            path
        }

        fn settings(&self) -> ScanSettings {
            ScanSettings {
                media_roots: vec![self.root()],
                worker_threads: 2,
                ..ScanSettings::default()
            }
        }

        fn scan_with(&self, settings: ScanSettings, options: ScanOptions) -> ScanStats {
            let abort = Arc::new(AtomicBool::new(false));
            match self
                .scanner
                .run(Arc::new(settings), options, abort, &NoopListener)
                .unwrap()
            {
                ScanOutcome::Completed(stats) => stats,
                ScanOutcome::Aborted => panic!("scan aborted"),
            }
        }

        fn scan(&self) -> ScanStats {
            self.scan_with(self.settings(), ScanOptions::default())
        }

        fn tracks(&self) -> Vec<Track> {
            self.scanner
                .catalog()
                .read(|txn| catalog::tracks_page(txn, None, 1000))
                .unwrap()
        }

        fn track_at(&self, path: &Path) -> Option<Track> {
            self.scanner
                .catalog()
                .read(|txn| catalog::find_track_by_path(txn, &path_string(path)))
                .unwrap()
        }
    }

    #[test]
    fn second_scan_changes_nothing() {
        let lib = Library::new();
        lib.write("a/1.flac", &["TITLE=One", "ARTIST=Alice", "ALBUM=First"]);
        lib.write("a/2.flac", &["TITLE=Two", "ARTIST=Alice", "ALBUM=First"]);
        lib.write("b/3.mp3", &["TITLE=Three", "ARTIST=Bob"]);
        lib.write("b/notes.txt", &["not music"]);

        let first = lib.scan();
        assert_eq!(first.total_file_count, 3);
        assert_eq!(first.additions, 3);
        assert_eq!(first.scans, 3);
        assert!(first.errors.is_empty());

        let second = lib.scan();
        assert_eq!(second.skips, 3);
        assert_eq!(second.scans, 0);
        assert_eq!(second.changes(), 0);
        assert_eq!(lib.tracks().len(), 3);
    }

    #[test]
    fn tracks_share_release_and_artists() {
        let lib = Library::new();
        let one = lib.write(
            "album/1.flac",
            &["TITLE=One", "ARTIST=Alice", "ALBUM=First", "TRACKNUMBER=1"],
        );
        let two = lib.write(
            "album/2.flac",
            &["TITLE=Two", "ARTIST=Alice", "ALBUM=First", "TRACKNUMBER=2"],
        );
        lib.scan();

        let one = lib.track_at(&one).unwrap();
        let two = lib.track_at(&two).unwrap();
        assert!(one.release_id.is_some());
        assert_eq!(one.release_id, two.release_id);
        assert_eq!(one.medium_id, two.medium_id);
        let alice: Vec<&str> = one.artist_ids(ArtistRole::Artist).collect();
        assert_eq!(alice, two.artist_ids(ArtistRole::Artist).collect::<Vec<_>>());
        assert_eq!(one.position, Some(1));
        assert_eq!(one.relative_path, "album/1.flac");
    }

    #[test]
    fn full_scan_reparses_everything() {
        let lib = Library::new();
        lib.write("1.flac", &["TITLE=One"]);
        lib.write("2.flac", &["TITLE=Two"]);
        lib.scan();

        let stats = lib.scan_with(lib.settings(), ScanOptions { full_scan: true });
        assert_eq!(stats.scans, 2);
        assert_eq!(stats.updates, 2);
        assert_eq!(stats.additions, 0);
    }

    #[test]
    fn scan_version_bump_reparses_audio() {
        let lib = Library::new();
        let path = lib.write("1.flac", &["TITLE=One"]);
        lib.scan();

        let settings = ScanSettings {
            scan_version: 1,
            ..lib.settings()
        };
        let stats = lib.scan_with(settings, ScanOptions::default());
        assert_eq!(stats.updates, 1);
        assert_eq!(lib.track_at(&path).unwrap().scan_version, 1);
    }

    #[test]
    fn deleted_files_are_removed() {
        let lib = Library::new();
        let gone = lib.write("1.flac", &["TITLE=One"]);
        lib.write("2.flac", &["TITLE=Two"]);
        lib.scan();

        fs::remove_file(&gone).unwrap();
        let stats = lib.scan();
        assert_eq!(stats.deletions, 1);
        assert!(lib.track_at(&gone).is_none());
        assert_eq!(lib.tracks().len(), 1);
    }

    #[test]
    fn files_leaving_scope_are_removed() {
        let lib = Library::new();
        lib.write("keep/1.flac", &["TITLE=One"]);
        lib.write("hide/2.flac", &["TITLE=Two"]);
        lib.write("3.mp3", &["TITLE=Three"]);
        lib.scan();
        assert_eq!(lib.tracks().len(), 3);

        fs::write(lib.root().join("hide").join(".noscan"), b"").unwrap();
        let mut settings = lib.settings();
        settings.audio_extensions.retain(|ext| ext != "mp3");
        let stats = lib.scan_with(settings, ScanOptions::default());
        assert_eq!(stats.deletions, 2);
        let titles: Vec<String> = lib.tracks().into_iter().map(|track| track.title).collect();
        assert_eq!(titles, vec!["One".to_string()]);

        let elsewhere = tempfile::tempdir().unwrap();
        let settings = ScanSettings {
            media_roots: vec![fs::canonicalize(elsewhere.path()).unwrap()],
            ..lib.settings()
        };
        let stats = lib.scan_with(settings, ScanOptions::default());
        assert_eq!(stats.deletions, 1);
        assert!(lib.tracks().is_empty());
    }

    #[test]
    fn orphaned_entities_are_swept() {
        let lib = Library::new();
        lib.write("1.flac", &["TITLE=One", "ARTIST=Alice", "ALBUM=First", "GENRE=Rock"]);
        let pop = lib.write("2.flac", &["TITLE=Two", "ARTIST=Bob", "ALBUM=Second", "GENRE=Pop"]);
        lib.scan();

        fs::remove_file(&pop).unwrap();
        lib.scan();

        let catalog = lib.scanner.catalog();
        catalog
            .read(|txn| {
                let genre = metadata::GENRE_CLUSTER;
                assert!(catalog::find_cluster(txn, genre, "Rock")?.is_some());
                assert!(catalog::find_cluster(txn, genre, "Pop")?.is_none());
                assert!(catalog::find_artists_by_name(txn, "Bob")?.is_empty());
                assert_eq!(catalog::find_artists_by_name(txn, "Alice")?.len(), 1);
                assert!(catalog::find_releases_by_name(txn, "Second")?.is_empty());
                assert_eq!(catalog::release_ids(txn)?.len(), 1);
                assert_eq!(catalog::medium_ids(txn)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn preset_abort_leaves_catalog_untouched() {
        let lib = Library::new();
        lib.write("1.flac", &["TITLE=One"]);
        let abort = Arc::new(AtomicBool::new(true));
        let outcome = lib
            .scanner
            .run(Arc::new(lib.settings()), ScanOptions::default(), abort, &NoopListener)
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Aborted));
        assert!(lib.tracks().is_empty());
    }

    struct AbortDuringScan {
        abort: Arc<AtomicBool>,
    }

    impl ScanListener for AbortDuringScan {
        fn on_progress(&self, progress: &ScanProgress) {
            if progress.step == ScanStep::ScanFiles {
                self.abort.store(true, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn abort_mid_run_keeps_catalog_consistent() {
        let lib = Library::new();
        for idx in 0..20 {
            lib.write(&format!("{:02}.flac", idx), &["ALBUM=Big", "ARTIST=Alice"]);
        }
        let abort = Arc::new(AtomicBool::new(false));
        let listener = AbortDuringScan {
            abort: Arc::clone(&abort),
        };
        let outcome = lib
            .scanner
            .run(Arc::new(lib.settings()), ScanOptions::default(), abort, &listener)
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Aborted));

        lib.scanner
            .catalog()
            .read(|txn| {
                for track in catalog::tracks_page(txn, None, 100)? {
                    let release_id = track.release_id.clone().unwrap();
                    assert!(catalog::get_release(txn, &release_id)?.is_some());
                }
                Ok(())
            })
            .unwrap();

        let stats = lib.scan();
        assert_eq!(lib.tracks().len(), 20);
        assert_eq!(stats.errors.len(), 0);
    }

    #[test]
    fn unreadable_files_are_reported_and_dropped() {
        let lib = Library::new();
        let path = lib.write("1.flac", &["TITLE=One"]);
        lib.scan();
        assert!(lib.track_at(&path).is_some());

        lib.write("1.flac", &["BROKEN"]);
        let stats = lib.scan_with(lib.settings(), ScanOptions { full_scan: true });
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].kind, ScanErrorKind::CannotReadAudioFile);
        assert_eq!(stats.deletions, 1);
        assert!(lib.track_at(&path).is_none());
    }

    #[test]
    fn silent_or_empty_audio_is_rejected() {
        let lib = Library::new();
        lib.write("silent.flac", &["TITLE=Silent", "CHANNELS=0", "SAMPLERATE=0"]);
        lib.write("empty.flac", &["TITLE=Empty", "DURATION=0"]);
        let stats = lib.scan();
        let mut kinds: Vec<ScanErrorKind> = stats.errors.iter().map(|error| error.kind).collect();
        kinds.sort_by_key(|kind| format!("{:?}", kind));
        assert_eq!(kinds, vec![ScanErrorKind::BadDuration, ScanErrorKind::NoAudioTrack]);
        assert!(lib.tracks().is_empty());
    }

    #[test]
    fn missing_title_falls_back_to_file_name() {
        let lib = Library::new();
        let path = lib.write("Some Song.flac", &["ARTIST=Alice"]);
        lib.scan();
        assert_eq!(lib.track_at(&path).unwrap().title, "Some Song.flac");
    }

    /// Runs only the file scan step over `files`, the way a run sees files
    /// that moved after stale removal already passed.
    fn scan_only(lib: &Library, files: Vec<PathBuf>) -> ScanStats {
        let mut run = ScanRun {
            catalog: lib.scanner.catalog(),
            open_reader: open_fake,
            settings: Arc::new(lib.settings()),
            options: ScanOptions::default(),
            abort: Arc::new(AtomicBool::new(false)),
            progress: Progress::new(&NoopListener),
            stats: ScanStats::default(),
            files: files.into_iter().map(|path| (path, FileKind::Audio)).collect(),
            first_scan: false,
            associations_needed: None,
        };
        run.scan_files().unwrap();
        run.stats
    }

    fn move_file(from: &Path, to: &Path) {
        fs::create_dir_all(to.parent().unwrap()).unwrap();
        fs::copy(from, to).unwrap();
        fs::remove_file(from).unwrap();
    }

    #[test]
    fn moved_file_keeps_its_identity() {
        let lib = Library::new();
        let old = lib.write(
            "old/1.flac",
            &["TITLE=One", "ALBUM=First", "TRACKNUMBER=1", "DISCNUMBER=1"],
        );
        lib.scan();
        let before = lib.track_at(&old).unwrap();

        let new = lib.root().join("new").join("1.flac");
        move_file(&old, &new);
        let stats = scan_only(&lib, vec![new.clone()]);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.additions, 0);

        let moved = lib.track_at(&new).unwrap();
        assert_eq!(moved.id, before.id);
        assert_eq!(moved.added_time, before.added_time);
        assert_eq!(moved.relative_path, "new/1.flac");
        assert!(lib.track_at(&old).is_none());
        assert_eq!(lib.tracks().len(), 1);
    }

    #[test]
    fn moved_file_with_mbid_keeps_its_identity() {
        let lib = Library::new();
        let mbid = "9e1c1f2a-3b4c-4d5e-8f60-718293a4b5c6";
        let old = lib.write("a.flac", &["TITLE=One", &format!("MUSICBRAINZ_TRACKID={}", mbid)]);
        lib.scan();
        let id = lib.track_at(&old).unwrap().id;

        // Retagged as well as moved: only the MBID still matches.
        let new = lib.write("b.flac", &["TITLE=Uno", &format!("MUSICBRAINZ_TRACKID={}", mbid)]);
        fs::remove_file(&old).unwrap();
        let stats = scan_only(&lib, vec![new.clone()]);
        assert_eq!(stats.updates, 1);
        assert_eq!(lib.track_at(&new).unwrap().id, id);
        assert!(lib.track_at(&old).is_none());
    }

    #[test]
    fn moved_files_found_by_stale_removal_are_re_added() {
        let lib = Library::new();
        let old = lib.write("old/1.flac", &["TITLE=One"]);
        lib.scan();

        move_file(&old, &lib.root().join("new").join("1.flac"));
        let stats = lib.scan();
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.additions, 1);
        assert_eq!(lib.tracks().len(), 1);
    }

    #[test]
    fn duplicate_mbids_are_reported() {
        let lib = Library::new();
        let mbid = "0f1e2d3c-4b5a-4968-8776-a5b4c3d2e1f0";
        lib.write("a.flac", &["TITLE=One", &format!("MUSICBRAINZ_TRACKID={}", mbid)]);
        lib.write("b.flac", &["TITLE=One", &format!("MUSICBRAINZ_TRACKID={}", mbid)]);
        let stats = lib.scan();
        assert_eq!(stats.duplicates.len(), 2);
        assert!(stats.duplicates.iter().all(|dup| dup.mbid == mbid));

        let settings = ScanSettings {
            skip_duplicate_mbid: true,
            ..lib.settings()
        };
        lib.scan_with(settings, ScanOptions { full_scan: true });
        assert_eq!(lib.tracks().len(), 1);
    }

    #[test]
    fn images_and_lyrics_are_tracked() {
        let lib = Library::new();
        let song = lib.write("album/1.flac", &["TITLE=One"]);
        lib.write("album/1.lrc", &["[00:01.00]Hello", "[00:02.00]World"]);
        lib.write("album/2.lrc", &["[00:01.00]Other"]);
        lib.write("album/cover.jpg", &["not an image"]);
        let stats = lib.scan();

        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].kind, ScanErrorKind::CannotReadImageFile);
        let track = lib.track_at(&song).unwrap();
        let (count, matching) = lib
            .scanner
            .catalog()
            .read(|txn| {
                Ok((
                    catalog::lyrics_file_count(txn)?,
                    catalog::lyrics_files_for_track(txn, &track.id)?,
                ))
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].lyrics.synchronized_lines.len(), 2);
    }

    #[test]
    fn first_scan_dates_tracks_by_modification_time() {
        let lib = Library::new();
        let path = lib.write("1.flac", &["TITLE=One"]);
        lib.scan();
        let track = lib.track_at(&path).unwrap();
        assert_eq!(track.added_time, track.last_write_time);

        let later = lib.write("2.flac", &["TITLE=Two"]);
        lib.scan();
        let track = lib.track_at(&later).unwrap();
        assert!(track.added_time >= track.last_write_time);
    }

    #[test]
    fn conductor_reuses_mbid_artist_by_name() {
        let lib = Library::new();
        let mbid = "11111111-2222-4333-8444-555555555555";
        lib.write(
            "1.flac",
            &["TITLE=One", "ARTIST=Karajan", &format!("MUSICBRAINZ_ARTISTID={}", mbid)],
        );
        lib.scan();
        let second = lib.write("2.flac", &["TITLE=Two", "CONDUCTOR=Karajan"]);
        lib.scan();

        let track = lib.track_at(&second).unwrap();
        let conductor: Vec<&str> = track.artist_ids(ArtistRole::Conductor).collect();
        let artists = lib
            .scanner
            .catalog()
            .read(|txn| catalog::find_artists_by_name(txn, "Karajan"))
            .unwrap();
        assert_eq!(artists.len(), 1);
        assert_eq!(conductor, vec![artists[0].id.as_str()]);
    }

    struct CountingListener {
        reloads: AtomicUsize,
        steps: parking_lot::Mutex<Vec<ScanStep>>,
    }

    impl ScanListener for CountingListener {
        fn on_progress(&self, progress: &ScanProgress) {
            let mut steps = self.steps.lock();
            if steps.last() != Some(&progress.step) {
                steps.push(progress.step);
            }
        }

        fn reload_similarity(&self) {
            self.reloads.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn similarity_reload_follows_changes() {
        let lib = Library::new();
        lib.write("1.flac", &["TITLE=One"]);
        let settings = ScanSettings {
            reload_similarity: true,
            ..lib.settings()
        };
        let listener = CountingListener {
            reloads: AtomicUsize::new(0),
            steps: parking_lot::Mutex::new(Vec::new()),
        };
        let abort = Arc::new(AtomicBool::new(false));
        let settings = Arc::new(settings);
        lib.scanner
            .run(Arc::clone(&settings), ScanOptions::default(), Arc::clone(&abort), &listener)
            .unwrap();
        assert_eq!(listener.reloads.load(Ordering::Relaxed), 1);
        assert_eq!(listener.steps.lock().len(), ScanStep::ALL.len());

        lib.scanner
            .run(settings, ScanOptions::default(), abort, &listener)
            .unwrap();
        assert_eq!(listener.reloads.load(Ordering::Relaxed), 1);
    }

    fn image_id(path: &Path) -> Option<String> {
        Some(common::stable_id(&path_string(path)))
    }

    impl Library {
        fn release_of(&self, track: &Track) -> common::Release {
            let id = track.release_id.clone().unwrap();
            self.scanner
                .catalog()
                .read(|txn| catalog::get_release(txn, &id))
                .unwrap()
                .unwrap()
        }

        fn medium_of(&self, track: &Track) -> common::Medium {
            let id = track.medium_id.clone().unwrap();
            self.scanner
                .catalog()
                .read(|txn| catalog::get_medium(txn, &id))
                .unwrap()
                .unwrap()
        }

        fn artist_named(&self, name: &str) -> common::Artist {
            let mut artists = self
                .scanner
                .catalog()
                .read(|txn| catalog::find_artists_by_name(txn, name))
                .unwrap();
            assert_eq!(artists.len(), 1);
            artists.remove(0)
        }
    }

    #[test]
    fn lyrics_with_language_suffix_follow_their_track() {
        let lib = Library::new();
        let song = lib.write("a/song.flac", &["TITLE=Song"]);
        let lrc = lib.write("a/song.en.lrc", &["[00:01.00]Hello"]);
        lib.write("a/other.lrc", &["[00:01.00]Nobody"]);
        lib.scan();

        let track = lib.track_at(&song).unwrap();
        let linked = lib
            .scanner
            .catalog()
            .read(|txn| catalog::lyrics_files_for_track(txn, &track.id))
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].absolute_path, path_string(&lrc));

        fs::remove_file(&song).unwrap();
        lib.scan();
        let (orphaned, file) = lib
            .scanner
            .catalog()
            .read(|txn| {
                Ok((
                    catalog::lyrics_files_for_track(txn, &track.id)?,
                    catalog::find_lyrics_file_by_path(txn, &path_string(&lrc))?,
                ))
            })
            .unwrap();
        assert!(orphaned.is_empty());
        assert_eq!(file.unwrap().track_id, None);
    }

    #[test]
    fn release_medium_and_track_images_are_associated() {
        let lib = Library::new();
        let tags = |title: &str, disc: &str| {
            vec![
                format!("TITLE={}", title),
                "ALBUM=Double".to_string(),
                "ALBUMARTIST=Alice".to_string(),
                format!("DISCNUMBER={}", disc),
            ]
        };
        let write = |rel: &str, lines: Vec<String>| {
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            lib.write(rel, &lines)
        };
        let first = write("Alice/Double/CD1/01.flac", tags("One", "1/2"));
        let second = write("Alice/Double/CD1/02.flac", tags("Two", "1/2"));
        let mut encore_tags = tags("Three", "2/2");
        encore_tags.push("DISCSUBTITLE=Encore".to_string());
        let third = write("Alice/Double/CD2/01.flac", encore_tags);
        let cover = lib.write_png("Alice/Double/Cover.png");
        let encore = lib.write_png("Alice/Double/CD2/Encore.png");
        let own = lib.write_png("Alice/Double/CD1/02.png");
        let portrait = lib.write_png("Alice/artist.png");
        let stats = lib.scan();
        assert!(stats.errors.is_empty());

        let first = lib.track_at(&first).unwrap();
        let second = lib.track_at(&second).unwrap();
        let third = lib.track_at(&third).unwrap();
        assert_eq!(first.release_id, third.release_id);
        assert_eq!(lib.release_of(&first).preferred_image_id, image_id(&cover));
        assert_eq!(lib.medium_of(&first).preferred_image_id, None);
        assert_eq!(lib.medium_of(&third).preferred_image_id, image_id(&encore));

        assert_eq!(first.preferred_image_id, image_id(&cover));
        assert_eq!(first.preferred_media_image_id, None);
        assert_eq!(second.preferred_image_id, image_id(&own));
        assert_eq!(third.preferred_image_id, image_id(&encore));
        assert_eq!(third.preferred_media_image_id, image_id(&encore));
        assert_eq!(lib.artist_named("Alice").preferred_image_id, image_id(&portrait));

        let again = lib.scan();
        assert_eq!(again.changes(), 0);
        assert_eq!(lib.track_at(Path::new(&first.absolute_path)).unwrap(), first);

        fs::remove_file(&cover).unwrap();
        lib.scan();
        let first = lib.track_at(Path::new(&first.absolute_path)).unwrap();
        assert_eq!(lib.release_of(&first).preferred_image_id, None);
        assert_eq!(first.preferred_image_id, None);
    }

    #[test]
    fn release_image_by_mbid_wins_anywhere() {
        let lib = Library::new();
        let mbid = "9d5a3c1e-0b7f-4e62-8d13-2f4a6b8c0e91";
        let song = lib.write(
            "Album/1.flac",
            &["TITLE=One", "ALBUM=Tagged", &format!("MUSICBRAINZ_ALBUMID={}", mbid)],
        );
        lib.write_png("Album/cover.png");
        let by_mbid = lib.write_png(&format!("Artwork/{}.png", mbid));
        lib.scan();

        let track = lib.track_at(&song).unwrap();
        assert_eq!(lib.release_of(&track).preferred_image_id, image_id(&by_mbid));
    }

    #[test]
    fn changed_image_names_reassociate_without_file_changes() {
        let lib = Library::new();
        let song = lib.write("Album/1.flac", &["TITLE=One", "ALBUM=Named"]);
        let front = lib.write_png("Album/front.png");
        let folder = lib.write_png("Album/folder.png");
        lib.scan();
        let track = lib.track_at(&song).unwrap();
        assert_eq!(lib.release_of(&track).preferred_image_id, image_id(&front));

        let settings = ScanSettings {
            release_image_names: vec!["fold*".to_string()],
            ..lib.settings()
        };
        let stats = lib.scan_with(settings, ScanOptions::default());
        assert_eq!(stats.changes(), 0);
        assert_eq!(lib.release_of(&track).preferred_image_id, image_id(&folder));
    }

    #[test]
    fn playlist_entries_resolve_to_tracks() {
        let lib = Library::new();
        let one = lib.write("Artist/Album/01.flac", &["TITLE=One"]);
        let two = lib.write("Artist/Album/02.flac", &["TITLE=Two"]);
        let list = lib.write(
            "Lists/mix.m3u",
            &[
                "#EXTM3U",
                "#PLAYLIST:Mix",
                "../Artist/Album/02.flac",
                "../Artist/Album/03.flac",
                "../Artist/Album/01.flac",
            ],
        );
        let unnamed = lib.write("Lists/Road Trip.m3u8", &["../Artist/Album/01.flac"]);
        lib.scan();

        let playlist = |path: &Path| {
            lib.scanner
                .catalog()
                .read(|txn| catalog::find_playlist_by_path(txn, &path_string(path)))
                .unwrap()
                .unwrap()
        };
        let one = lib.track_at(&one).unwrap();
        let two = lib.track_at(&two).unwrap();
        let mix = playlist(&list);
        assert_eq!(mix.name, "Mix");
        assert_eq!(mix.files.len(), 3);
        assert_eq!(mix.track_ids, vec![two.id.clone(), one.id.clone()]);
        assert_eq!(playlist(&unnamed).name, "Road Trip");

        let three = lib.write("Artist/Album/03.flac", &["TITLE=Three"]);
        lib.scan();
        let three = lib.track_at(&three).unwrap();
        assert_eq!(playlist(&list).track_ids, vec![two.id, three.id, one.id]);
    }

    #[test]
    fn artist_info_links_artists_and_keeps_them_alive() {
        let lib = Library::new();
        let mbid = "38811c52-85e3-4e2e-3319-ab7d9f2cfa5b";
        let song = lib.write(
            "Tim/01.flac",
            &["TITLE=One", "ARTIST=Tim", &format!("MUSICBRAINZ_ARTISTID={}", mbid)],
        );
        let nfo = lib.write(
            "Tim/artist.nfo",
            &[
                "<artist>",
                "  <name>Tim Taylor</name>",
                &format!("  <musicBrainzArtistID>{}</musicBrainzArtistID>", mbid),
                "  <biography>DJ &amp; producer</biography>",
                "</artist>",
            ],
        );
        let folder = lib.write_png("Tim/folder.png");
        let lonely = lib.write("Nobody/artist.nfo", &["<artist><name>Nobody</name></artist>"]);
        let broken = lib.write("Broken/artist.nfo", &["<artist></artist>"]);
        let stats = lib.scan();
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].kind, ScanErrorKind::CannotReadArtistInfoFile);
        assert_eq!(stats.errors[0].path, path_string(&broken));

        let track = lib.track_at(&song).unwrap();
        let artist_id = track.artist_ids(ArtistRole::Artist).next().unwrap().to_string();
        let info = lib
            .scanner
            .catalog()
            .read(|txn| catalog::find_artist_info_by_path(txn, &path_string(&nfo)))
            .unwrap()
            .unwrap();
        assert_eq!(info.artist_id.as_deref(), Some(artist_id.as_str()));
        assert!(info.mbid_matched);
        assert_eq!(info.biography, "DJ & producer");
        let artist = lib
            .scanner
            .catalog()
            .read(|txn| catalog::get_artist(txn, &artist_id))
            .unwrap()
            .unwrap();
        assert_eq!(artist.preferred_image_id, image_id(&folder));

        // No track references this artist; its info file keeps it.
        let nobody = lib.artist_named("Nobody");
        assert_eq!(nobody.mbid, None);
        lib.scan();
        lib.artist_named("Nobody");

        fs::remove_file(&lonely).unwrap();
        lib.scan();
        let remaining = lib
            .scanner
            .catalog()
            .read(|txn| catalog::find_artists_by_name(txn, "Nobody"))
            .unwrap();
        assert!(remaining.is_empty());
    }
}
