use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use common::{
    mbid_key, path_string, Artist, ArtistRole, LyricsFile, Medium, PlayListFile, Release, Track,
};
use redb::{ReadTransaction, WriteTransaction};
use tracing::debug;

use crate::catalog::{self, Catalog, CatalogRead};
use crate::settings::ScanSettings;
use crate::stats::ScanStep;
use crate::LibraryError;

const ASSOCIATION_BATCH: usize = 50;
const ARTIST_INFO_IMAGE_NAMES: [&str; 3] = ["thumb", "folder", "fanart"];

trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Artist {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Release {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Medium {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Track {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for LyricsFile {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for PlayListFile {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Recomputes the links between catalog entries and the side files that
/// belong to them. Each step pages through one kind of record, compares the
/// computed link with the stored one and writes only what changed.
pub(crate) struct Associator<'a> {
    pub catalog: &'a Catalog,
    pub settings: &'a ScanSettings,
    pub abort: &'a AtomicBool,
}

impl Associator<'_> {
    /// Number of records the step walks through.
    pub fn total(&self, step: ScanStep) -> Result<usize, LibraryError> {
        let count = self.catalog.read(|txn| match step {
            ScanStep::AssociateExternalLyrics => catalog::lyrics_file_count(txn),
            ScanStep::AssociatePlayListTracks => catalog::playlist_count(txn),
            ScanStep::AssociateReleaseImages => Ok(catalog::release_ids(txn)?.len() as u64),
            ScanStep::AssociateMediumImages => Ok(catalog::medium_ids(txn)?.len() as u64),
            ScanStep::AssociateTrackImages => catalog::track_count(txn),
            ScanStep::AssociateArtistImages => Ok(catalog::artist_ids(txn)?.len() as u64),
            _ => Ok(0),
        })?;
        Ok(count as usize)
    }

    /// Runs one association step and returns how many records changed.
    pub fn run(&self, step: ScanStep, report: &mut dyn FnMut(usize)) -> Result<usize, LibraryError> {
        match step {
            ScanStep::AssociateExternalLyrics => self.update_all(
                report,
                |txn, after, limit| catalog::lyrics_files_page(txn, after, limit),
                |txn, file| {
                    let track_id = lyrics_track(txn, file)?;
                    Ok((track_id != file.track_id).then(|| {
                        debug!("Lyrics {:?} now belong to track {:?}", file.absolute_path, track_id);
                        LyricsFile {
                            track_id,
                            ..file.clone()
                        }
                    }))
                },
                catalog::save_lyrics_file,
            ),
            ScanStep::AssociatePlayListTracks => self.update_all(
                report,
                |txn, after, limit| catalog::playlists_page(txn, after, limit),
                |txn, playlist| {
                    let track_ids = playlist_tracks(txn, playlist)?;
                    Ok((track_ids != playlist.track_ids).then(|| PlayListFile {
                        track_ids,
                        ..playlist.clone()
                    }))
                },
                catalog::save_playlist,
            ),
            ScanStep::AssociateReleaseImages => self.update_all(
                report,
                |txn, after, limit| catalog::releases_page(txn, after, limit),
                |txn, release| {
                    let image_id = self.release_image(txn, release)?;
                    Ok((image_id != release.preferred_image_id).then(|| Release {
                        preferred_image_id: image_id,
                        ..release.clone()
                    }))
                },
                catalog::save_release,
            ),
            ScanStep::AssociateMediumImages => {
                let layout = self.catalog.read(|txn| TrackLayout::collect(txn))?;
                self.update_all(
                    report,
                    |txn, after, limit| catalog::mediums_page(txn, after, limit),
                    |txn, medium| {
                        let image_id = self.medium_image(txn, medium, &layout)?;
                        Ok((image_id != medium.preferred_image_id).then(|| Medium {
                            preferred_image_id: image_id,
                            ..medium.clone()
                        }))
                    },
                    catalog::save_medium,
                )
            }
            ScanStep::AssociateTrackImages => self.update_all(
                report,
                |txn, after, limit| catalog::tracks_page(txn, after, limit),
                |txn, track| {
                    let (image_id, media_image_id) = track_images(txn, track)?;
                    let unchanged = image_id == track.preferred_image_id
                        && media_image_id == track.preferred_media_image_id;
                    Ok((!unchanged).then(|| Track {
                        preferred_image_id: image_id,
                        preferred_media_image_id: media_image_id,
                        ..track.clone()
                    }))
                },
                catalog::save_track,
            ),
            ScanStep::AssociateArtistImages => {
                let layout = self.catalog.read(|txn| TrackLayout::collect(txn))?;
                self.update_all(
                    report,
                    |txn, after, limit| catalog::artists_page(txn, after, limit),
                    |txn, artist| {
                        let image_id = self.artist_image(txn, artist, &layout)?;
                        Ok((image_id != artist.preferred_image_id).then(|| Artist {
                            preferred_image_id: image_id,
                            ..artist.clone()
                        }))
                    },
                    catalog::save_artist,
                )
            }
            _ => Ok(0),
        }
    }

    fn update_all<T: Keyed>(
        &self,
        report: &mut dyn FnMut(usize),
        load_page: impl Fn(&ReadTransaction, Option<&str>, usize) -> Result<Vec<T>, LibraryError>,
        resolve: impl Fn(&ReadTransaction, &T) -> Result<Option<T>, LibraryError>,
        save: impl Fn(&WriteTransaction, &T) -> Result<(), LibraryError>,
    ) -> Result<usize, LibraryError> {
        let mut after: Option<String> = None;
        let mut processed = 0;
        let mut updated = 0;
        loop {
            if self.abort.load(Ordering::Relaxed) {
                return Ok(updated);
            }
            let (records, changed) = self.catalog.read(|txn| {
                let records = load_page(txn, after.as_deref(), ASSOCIATION_BATCH)?;
                let mut changed = Vec::new();
                for record in &records {
                    if let Some(record) = resolve(txn, record)? {
                        changed.push(record);
                    }
                }
                Ok((records, changed))
            })?;
            if !changed.is_empty() {
                self.catalog.write(|txn| {
                    for record in &changed {
                        save(txn, record)?;
                    }
                    Ok(())
                })?;
                updated += changed.len();
            }

            processed += records.len();
            report(processed);
            match records.last() {
                Some(last) if records.len() == ASSOCIATION_BATCH => {
                    after = Some(last.key().to_string());
                }
                _ => return Ok(updated),
            }
        }
    }

    /// An image named after the release MBID anywhere, else a configured name
    /// in the directory shared by all media, else in each track directory.
    fn release_image(
        &self,
        txn: &impl CatalogRead,
        release: &Release,
    ) -> Result<Option<String>, LibraryError> {
        if let Some(mbid) = &release.mbid {
            if let Some(image) = catalog::find_images_by_stem(txn, &mbid_key(mbid))?.into_iter().next() {
                return Ok(Some(image.id));
            }
        }
        let names = &self.settings.release_image_names;
        let directories = catalog::release_track_directories(txn, &release.id)?;
        if directories.len() > 1 {
            if let Some(common) = common_directory(directories.iter().map(Path::new)) {
                if let Some(id) = image_in_directory(txn, &path_string(&common), names, true)? {
                    return Ok(Some(id));
                }
            }
        }
        for directory in &directories {
            if let Some(id) = image_in_directory(txn, directory, names, true)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// An image named after the disc subtitle, else a configured medium name,
    /// looked up in the directories holding the medium's tracks.
    fn medium_image(
        &self,
        txn: &impl CatalogRead,
        medium: &Medium,
        layout: &TrackLayout,
    ) -> Result<Option<String>, LibraryError> {
        let Some(directories) = layout.medium_directories.get(&medium.id) else {
            return Ok(None);
        };
        let subtitle = sanitize_file_stem(&medium.name);
        for directory in directories {
            if !subtitle.is_empty() {
                if let Some(id) = image_in_directory(txn, directory, &[subtitle.as_str()], false)? {
                    return Ok(Some(id));
                }
            }
            if let Some(id) = image_in_directory(txn, directory, &self.settings.medium_image_names, true)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn artist_image(
        &self,
        txn: &impl CatalogRead,
        artist: &Artist,
        layout: &TrackLayout,
    ) -> Result<Option<String>, LibraryError> {
        if let Some(mbid) = &artist.mbid {
            if let Some(image) = catalog::find_images_by_stem(txn, &mbid_key(mbid))?.into_iter().next() {
                return Ok(Some(image.id));
            }
        }

        let infos = catalog::artist_infos_for_artist(txn, &artist.id)?;
        if infos.len() > 1 {
            debug!("Artist [{}] has {} artist info files", artist.id, infos.len());
        }
        for info in &infos {
            if let Some(id) = image_in_directory(txn, &info.directory, &ARTIST_INFO_IMAGE_NAMES, true)? {
                return Ok(Some(id));
            }
        }

        let names = &self.settings.artist_image_names;
        if let Some(directories) = layout.release_artist_directories.get(&artist.id) {
            // Artist/Release/tracks or Artist/Grouping/Release/tracks, with the
            // artist image next to the releases.
            if let Some(common) = common_directory(directories.iter().map(Path::new)) {
                let root = self.settings.root_for(&common).map(Path::to_path_buf);
                let mut current = Some(common.as_path());
                while let Some(directory) = current {
                    if let Some(id) = image_in_directory(txn, &path_string(directory), names, true)? {
                        return Ok(Some(id));
                    }
                    if root.as_deref().map_or(true, |root| directory == root) {
                        break;
                    }
                    current = directory.parent();
                }
            }
            for directory in directories {
                if let Some(id) = image_in_directory(txn, directory, names, true)? {
                    return Ok(Some(id));
                }
            }
        }

        if self.settings.artist_image_fallback_to_release {
            if let Some(release_ids) = layout.release_artist_releases.get(&artist.id) {
                for release_id in release_ids {
                    let image = catalog::get_release(txn, release_id)?
                        .and_then(|release| release.preferred_image_id);
                    if image.is_some() {
                        return Ok(image);
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Where the tracks of each medium and release artist live.
#[derive(Debug, Default)]
struct TrackLayout {
    medium_directories: HashMap<String, BTreeSet<String>>,
    release_artist_directories: HashMap<String, BTreeSet<String>>,
    release_artist_releases: HashMap<String, BTreeSet<String>>,
}

impl TrackLayout {
    fn collect(txn: &impl CatalogRead) -> Result<Self, LibraryError> {
        let mut layout = Self::default();
        let mut after: Option<String> = None;
        loop {
            let tracks = catalog::tracks_page(txn, after.as_deref(), 500)?;
            for track in &tracks {
                if let Some(medium_id) = &track.medium_id {
                    layout
                        .medium_directories
                        .entry(medium_id.clone())
                        .or_default()
                        .insert(track.directory.clone());
                }
                for artist_id in track.artist_ids(ArtistRole::ReleaseArtist) {
                    layout
                        .release_artist_directories
                        .entry(artist_id.to_string())
                        .or_default()
                        .insert(track.directory.clone());
                    if let Some(release_id) = &track.release_id {
                        layout
                            .release_artist_releases
                            .entry(artist_id.to_string())
                            .or_default()
                            .insert(release_id.clone());
                    }
                }
            }
            match tracks.last() {
                Some(last) if tracks.len() == 500 => after = Some(last.id.clone()),
                _ => return Ok(layout),
            }
        }
    }
}

/// The track next to the lyrics file with the same stem, or with the stem
/// minus a language suffix (`song.en.lrc` goes with `song.flac`).
fn lyrics_track(txn: &impl CatalogRead, file: &LyricsFile) -> Result<Option<String>, LibraryError> {
    let mut tracks = catalog::find_tracks_by_stem(txn, &file.directory, &file.stem)?;
    if tracks.is_empty() {
        if let Some((base, _)) = file.stem.rsplit_once('.') {
            if !base.is_empty() {
                tracks = catalog::find_tracks_by_stem(txn, &file.directory, base)?;
            }
        }
    }
    if tracks.len() > 1 {
        debug!(
            "Lyrics {:?} match {} tracks; keeping the last one",
            file.absolute_path,
            tracks.len()
        );
    }
    Ok(tracks.pop().map(|track| track.id))
}

fn playlist_tracks(
    txn: &impl CatalogRead,
    playlist: &PlayListFile,
) -> Result<Vec<String>, LibraryError> {
    let mut track_ids = Vec::new();
    for entry in &playlist.files {
        let path = resolve_entry(Path::new(&playlist.directory), entry);
        match catalog::find_track_by_path(txn, &path_string(&path))? {
            Some(track) => track_ids.push(track.id),
            None => debug!("Playlist {:?}: no track for {:?}", playlist.absolute_path, entry),
        }
    }
    Ok(track_ids)
}

/// The track's own image (same stem), else its medium's, else its release's.
/// The second value is the medium image alone.
fn track_images(
    txn: &impl CatalogRead,
    track: &Track,
) -> Result<(Option<String>, Option<String>), LibraryError> {
    let media_image = match &track.medium_id {
        Some(id) => catalog::get_medium(txn, id)?.and_then(|medium| medium.preferred_image_id),
        None => None,
    };
    let stem = common::file_stem(Path::new(&track.absolute_path));
    if let Some(id) = image_in_directory(txn, &track.directory, &[stem.as_str()], false)? {
        return Ok((Some(id), media_image));
    }
    if media_image.is_some() {
        return Ok((media_image.clone(), media_image));
    }
    let release_image = match &track.release_id {
        Some(id) => catalog::get_release(txn, id)?.and_then(|release| release.preferred_image_id),
        None => None,
    };
    Ok((release_image, media_image))
}

/// First image in `directory` whose stem matches one of `names`, tried in
/// order. With `wildcards`, `*` in a name matches any run of characters.
fn image_in_directory<S: AsRef<str>>(
    txn: &impl CatalogRead,
    directory: &str,
    names: &[S],
    wildcards: bool,
) -> Result<Option<String>, LibraryError> {
    let images = catalog::images_in_directory(txn, directory)?;
    if images.is_empty() {
        return Ok(None);
    }
    for name in names {
        let name = name.as_ref();
        let found = images.iter().find(|image| {
            if wildcards {
                stem_matches(name, &image.stem)
            } else {
                image.stem.to_lowercase() == name.to_lowercase()
            }
        });
        if let Some(image) = found {
            return Ok(Some(image.id.clone()));
        }
    }
    Ok(None)
}

/// Case-insensitive match of `stem` against `pattern`, where `*` stands for
/// any run of characters.
fn stem_matches(pattern: &str, stem: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let stem: Vec<char> = stem.to_lowercase().chars().collect();

    let (mut p, mut s) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while s < stem.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, s));
            p += 1;
        } else if p < pattern.len() && pattern[p] == stem[s] {
            p += 1;
            s += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            s = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Longest directory containing every path in `paths`.
fn common_directory<'a>(paths: impl Iterator<Item = &'a Path>) -> Option<PathBuf> {
    let mut common: Option<PathBuf> = None;
    for path in paths {
        common = Some(match common {
            None => path.to_path_buf(),
            Some(current) => current
                .components()
                .zip(path.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a.as_os_str())
                .collect(),
        });
    }
    common.filter(|path| !path.as_os_str().is_empty())
}

/// Joins a playlist entry onto the playlist directory and folds `.` and `..`
/// without touching the filesystem.
fn resolve_entry(directory: &Path, entry: &str) -> PathBuf {
    let entry = Path::new(entry);
    let joined = if entry.is_absolute() {
        entry.to_path_buf()
    } else {
        directory.join(entry)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn sanitize_file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_match_any_run() {
        assert!(stem_matches("cover", "Cover"));
        assert!(stem_matches("cover*", "cover-front"));
        assert!(stem_matches("*front*", "Album Front Scan"));
        assert!(stem_matches("cd*", "CD"));
        assert!(!stem_matches("cover", "cover2"));
        assert!(!stem_matches("disc*x", "disc1"));
    }

    #[test]
    fn common_directory_of_disc_folders() {
        let dirs = ["/music/Artist/Album/CD1", "/music/Artist/Album/CD2"];
        assert_eq!(
            common_directory(dirs.iter().map(Path::new)),
            Some(PathBuf::from("/music/Artist/Album"))
        );
        let single = ["/music/Artist/Album"];
        assert_eq!(
            common_directory(single.iter().map(Path::new)),
            Some(PathBuf::from("/music/Artist/Album"))
        );
        assert_eq!(common_directory(std::iter::empty()), None);
    }

    #[test]
    fn playlist_entries_resolve_relative_to_the_playlist() {
        let dir = Path::new("/music/Lists");
        assert_eq!(
            resolve_entry(dir, "../Artist/./01.flac"),
            PathBuf::from("/music/Artist/01.flac")
        );
        assert_eq!(
            resolve_entry(dir, "/other/02.flac"),
            PathBuf::from("/other/02.flac")
        );
        assert_eq!(resolve_entry(dir, "03.flac"), PathBuf::from("/music/Lists/03.flac"));
    }

    #[test]
    fn medium_names_become_file_stems() {
        assert_eq!(sanitize_file_stem(" Live: Part 1/2 "), "Live_ Part 1_2");
    }

    #[test]
    fn images_are_associated_before_orphans_are_removed() {
        let order = [
            ScanStep::ScanFiles,
            ScanStep::AssociateExternalLyrics,
            ScanStep::AssociateReleaseImages,
            ScanStep::AssociateMediumImages,
            ScanStep::AssociateTrackImages,
            ScanStep::AssociateArtistImages,
            ScanStep::RemoveOrphanedEntries,
        ];
        assert!(order.windows(2).all(|pair| pair[0].index() < pair[1].index()));
    }
}
