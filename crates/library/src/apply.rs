use std::path::Path;

use common::{
    file_stem, path_string, relpath_from, stable_id, ArtistInfo, ArtistLink, ArtistRole,
    ImageFile, Lyrics, LyricsFile, PlayListFile, Track,
};
use metadata::{ImageInfo, ParsedArtist, ParsedArtistInfo, ParsedPlayList, ParsedTrack};
use redb::WriteTransaction;
use tracing::{debug, warn};

use crate::catalog::{
    allocate_track_id, find_artist_info_by_path, find_image_by_path, find_lyrics_file_by_path,
    find_playlist_by_path, find_track_by_path, find_tracks_by_mbid, find_tracks_by_size,
    get_release, remove_artist_info, remove_image, remove_lyrics_file, remove_playlist,
    remove_track, save_artist_info, save_image, save_lyrics_file, save_playlist, save_track,
};
use crate::queue::ScanRequest;
use crate::reconcile::{
    get_or_create_artist, get_or_create_clusters, get_or_create_medium, get_or_create_release,
};
use crate::settings::ScanSettings;
use crate::stats::{ScanErrorKind, ScanStats};
use crate::{now_millis, LibraryError};

/// Writes one parsed file into the catalog. Runs on the coordinating thread,
/// inside the write transaction of that file.
pub(crate) struct Applier<'a> {
    pub settings: &'a ScanSettings,
    /// Set when the catalog held no track at the start of the run.
    pub first_scan: bool,
}

impl Applier<'_> {
    pub fn apply_audio(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        request: &ScanRequest,
        parsed: Result<ParsedTrack, String>,
    ) -> Result<(), LibraryError> {
        let path = request.path.as_path();
        let path_str = path_string(path);
        let existing = find_track_by_path(txn, &path_str)?;

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!("Failed to read tags for {:?}: {}", path, message);
                self.drop_existing(txn, stats, existing)?;
                stats.push_error(path, ScanErrorKind::CannotReadAudioFile, message);
                return Ok(());
            }
        };

        if let Some(mbid) = &parsed.mbid {
            if self.settings.skip_duplicate_mbid {
                let duplicate = find_tracks_by_mbid(txn, mbid)?.into_iter().find(|other| {
                    other.absolute_path != path_str
                        && self.settings.root_for(Path::new(&other.absolute_path)).is_some()
                });
                if let Some(other) = duplicate {
                    debug!(
                        "Skipped {:?}: MBID {} already used by {:?}",
                        path, mbid, other.absolute_path
                    );
                    self.drop_existing(txn, stats, existing)?;
                    return Ok(());
                }
            }
        }

        if parsed.audio.channel_count == 0 && parsed.audio.sample_rate == 0 {
            warn!("No audio track found in {:?}", path);
            self.drop_existing(txn, stats, existing)?;
            stats.push_error(path, ScanErrorKind::NoAudioTrack, "no audio track");
            return Ok(());
        }
        if parsed.audio.duration_ms == 0 {
            warn!("Bad duration for {:?}", path);
            self.drop_existing(txn, stats, existing)?;
            stats.push_error(path, ScanErrorKind::BadDuration, "zero duration");
            return Ok(());
        }

        let title = if parsed.title.is_empty() {
            path.file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            parsed.title.clone()
        };

        let (mut track, added) = match existing {
            Some(track) => (track, false),
            None => match find_moved_track(txn, request, &parsed, &title)? {
                Some(track) => {
                    debug!("Track moved from {:?} to {:?}", track.absolute_path, path);
                    (track, false)
                }
                None => {
                    let mut track = Track::new(allocate_track_id(txn)?, path_str.clone());
                    track.added_time = if self.first_scan {
                        request.file_info.last_write_time
                    } else {
                        now_millis()
                    };
                    (track, true)
                }
            },
        };

        let directory = path.parent().unwrap_or(path);
        let root = self.settings.root_for(path);
        track.absolute_path = path_str;
        track.relative_path = root
            .and_then(|root| relpath_from(root, path))
            .unwrap_or_default();
        track.directory = path_string(directory);
        track.root = root.map(path_string).unwrap_or_default();
        track.file_size = request.file_info.file_size;
        track.last_write_time = request.file_info.last_write_time;
        track.scan_version = self.settings.scan_version;

        track.title = title;
        track.position = parsed.position;
        track.release_id = None;
        track.medium_id = None;
        track.disc_number = None;
        track.total_track = None;
        track.disc_subtitle = String::new();
        track.release_replay_gain = None;

        let mut links: Vec<ArtistLink> = Vec::new();
        if let Some(medium) = &parsed.medium {
            track.disc_number = medium.position;
            track.total_track = medium.track_count;
            track.disc_subtitle = medium.name.clone();
            track.release_replay_gain = medium.replay_gain;
            if let Some(parsed_release) = &medium.release {
                let release = get_or_create_release(txn, parsed_release, directory)?;
                let db_medium = get_or_create_medium(txn, &release, medium)?;
                self.link_artists(txn, &mut links, &parsed_release.artists, ArtistRole::ReleaseArtist, "")?;
                track.release_id = Some(release.id);
                track.medium_id = Some(db_medium.id);
            }
        }

        self.link_artists(txn, &mut links, &parsed.artists, ArtistRole::Artist, "")?;
        self.link_artists(txn, &mut links, &parsed.composer_artists, ArtistRole::Composer, "")?;
        self.link_artists(txn, &mut links, &parsed.conductor_artists, ArtistRole::Conductor, "")?;
        self.link_artists(txn, &mut links, &parsed.lyricist_artists, ArtistRole::Lyricist, "")?;
        self.link_artists(txn, &mut links, &parsed.mixer_artists, ArtistRole::Mixer, "")?;
        self.link_artists(txn, &mut links, &parsed.producer_artists, ArtistRole::Producer, "")?;
        self.link_artists(txn, &mut links, &parsed.remixer_artists, ArtistRole::Remixer, "")?;
        for (role, performers) in &parsed.performer_artists {
            self.link_artists(txn, &mut links, performers, ArtistRole::Performer, role)?;
        }
        track.artist_links = links;
        track.artist_display_name = parsed.artist_display_name.clone();
        track.cluster_ids = get_or_create_clusters(txn, &parsed)?;

        track.duration_ms = parsed.audio.duration_ms;
        track.bitrate = parsed.audio.bitrate;
        track.bits_per_sample = parsed.audio.bits_per_sample;
        track.channel_count = parsed.audio.channel_count;
        track.sample_rate = parsed.audio.sample_rate;
        track.date = parsed.date;
        track.original_date = parsed.original_date;
        track.original_year = parsed.original_year;
        track.mbid = parsed.mbid;
        track.recording_mbid = parsed.recording_mbid;
        track.copyright = parsed.copyright;
        track.copyright_url = parsed.copyright_url;
        track.advisory = parsed.advisory;
        track.comments = parsed.comments;
        track.replay_gain = parsed.replay_gain;
        track.lyrics = parsed.lyrics;
        track.has_cover = parsed.has_embedded_image;

        save_track(txn, &track)?;
        if added {
            debug!("Added {:?}", track.absolute_path);
            stats.additions += 1;
        } else {
            debug!("Updated {:?}", track.absolute_path);
            stats.updates += 1;
        }
        Ok(())
    }

    pub fn apply_image(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        request: &ScanRequest,
        info: Result<ImageInfo, String>,
    ) -> Result<(), LibraryError> {
        let path = request.path.as_path();
        let path_str = path_string(path);
        let existing = find_image_by_path(txn, &path_str)?;
        match info {
            Ok(info) => {
                let image = ImageFile {
                    id: stable_id(&path_str),
                    directory: path.parent().map(path_string).unwrap_or_default(),
                    stem: file_stem(path),
                    absolute_path: path_str,
                    width: info.width,
                    height: info.height,
                    file_size: request.file_info.file_size,
                    last_write_time: request.file_info.last_write_time,
                };
                save_image(txn, &image)?;
                count_change(stats, existing.is_some());
            }
            Err(message) => {
                warn!("Failed to read image {:?}: {}", path, message);
                if let Some(existing) = existing {
                    remove_image(txn, &existing.id)?;
                    stats.deletions += 1;
                }
                stats.push_error(path, ScanErrorKind::CannotReadImageFile, message);
            }
        }
        Ok(())
    }

    pub fn apply_lyrics(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        request: &ScanRequest,
        lyrics: Result<Lyrics, String>,
    ) -> Result<(), LibraryError> {
        let path = request.path.as_path();
        let path_str = path_string(path);
        let existing = find_lyrics_file_by_path(txn, &path_str)?;
        match lyrics {
            Ok(lyrics) => {
                let file = LyricsFile {
                    id: stable_id(&path_str),
                    directory: path.parent().map(path_string).unwrap_or_default(),
                    stem: file_stem(path),
                    absolute_path: path_str,
                    file_size: request.file_info.file_size,
                    last_write_time: request.file_info.last_write_time,
                    lyrics,
                    track_id: existing.as_ref().and_then(|file| file.track_id.clone()),
                };
                save_lyrics_file(txn, &file)?;
                count_change(stats, existing.is_some());
            }
            Err(message) => {
                warn!("Failed to read lyrics {:?}: {}", path, message);
                if let Some(existing) = existing {
                    remove_lyrics_file(txn, &existing.id)?;
                    stats.deletions += 1;
                }
                stats.push_error(path, ScanErrorKind::CannotReadLyricsFile, message);
            }
        }
        Ok(())
    }

    pub fn apply_playlist(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        request: &ScanRequest,
        parsed: Result<ParsedPlayList, String>,
    ) -> Result<(), LibraryError> {
        let path = request.path.as_path();
        let path_str = path_string(path);
        let existing = find_playlist_by_path(txn, &path_str)?;
        match parsed {
            Ok(parsed) => {
                let name = if parsed.name.is_empty() {
                    file_stem(path)
                } else {
                    parsed.name
                };
                // Entries resolve to tracks once every file of the run is in.
                let track_ids = match &existing {
                    Some(playlist) if playlist.files == parsed.files => playlist.track_ids.clone(),
                    _ => Vec::new(),
                };
                let playlist = PlayListFile {
                    id: stable_id(&path_str),
                    directory: path.parent().map(path_string).unwrap_or_default(),
                    absolute_path: path_str,
                    name,
                    files: parsed.files,
                    track_ids,
                    file_size: request.file_info.file_size,
                    last_write_time: request.file_info.last_write_time,
                };
                save_playlist(txn, &playlist)?;
                count_change(stats, existing.is_some());
            }
            Err(message) => {
                warn!("Failed to read playlist {:?}: {}", path, message);
                if let Some(existing) = existing {
                    remove_playlist(txn, &existing.id)?;
                    stats.deletions += 1;
                }
                stats.push_error(path, ScanErrorKind::CannotReadPlayListFile, message);
            }
        }
        Ok(())
    }

    /// Stores the file and links it to an artist, creating or renaming one
    /// the same way a track's artist tag would.
    pub fn apply_artist_info(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        request: &ScanRequest,
        parsed: Result<ParsedArtistInfo, String>,
    ) -> Result<(), LibraryError> {
        let path = request.path.as_path();
        let path_str = path_string(path);
        let existing = find_artist_info_by_path(txn, &path_str)?;
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!("Failed to read artist info {:?}: {}", path, message);
                if let Some(existing) = existing {
                    remove_artist_info(txn, &existing.id)?;
                    stats.deletions += 1;
                }
                stats.push_error(path, ScanErrorKind::CannotReadArtistInfoFile, message);
                return Ok(());
            }
        };

        let sort_name = (!parsed.sort_name.is_empty()).then(|| parsed.sort_name.clone());
        let artist = get_or_create_artist(
            txn,
            &ParsedArtist {
                name: parsed.name.clone(),
                sort_name,
                mbid: parsed.mbid,
            },
            self.settings.fallback.allows(ArtistRole::Artist),
        )?;
        let mbid_matched = parsed.mbid.is_some() && artist.mbid == parsed.mbid;
        debug!("Artist info {:?} linked to artist [{}]", path, artist.id);

        let info = ArtistInfo {
            id: stable_id(&path_str),
            directory: path.parent().map(path_string).unwrap_or_default(),
            absolute_path: path_str,
            name: parsed.name,
            sort_name: parsed.sort_name,
            mbid: parsed.mbid,
            artist_type: parsed.artist_type,
            gender: parsed.gender,
            disambiguation: parsed.disambiguation,
            biography: parsed.biography,
            artist_id: Some(artist.id),
            mbid_matched,
            scan_version: self.settings.artist_info_scan_version,
            file_size: request.file_info.file_size,
            last_write_time: request.file_info.last_write_time,
        };
        save_artist_info(txn, &info)?;
        count_change(stats, existing.is_some());
        Ok(())
    }

    fn drop_existing(
        &self,
        txn: &WriteTransaction,
        stats: &mut ScanStats,
        existing: Option<Track>,
    ) -> Result<(), LibraryError> {
        if let Some(track) = existing {
            remove_track(txn, &track.id)?;
            debug!("Removed {:?}", track.absolute_path);
            stats.deletions += 1;
        }
        Ok(())
    }

    fn link_artists(
        &self,
        txn: &WriteTransaction,
        links: &mut Vec<ArtistLink>,
        parsed: &[ParsedArtist],
        role: ArtistRole,
        sub_role: &str,
    ) -> Result<(), LibraryError> {
        let allow_fallback = self.settings.fallback.allows(role);
        for parsed_artist in parsed {
            let artist = get_or_create_artist(txn, parsed_artist, allow_fallback)?;
            let exists = links.iter().any(|link| {
                link.artist_id == artist.id && link.role == role && link.sub_role == sub_role
            });
            if !exists {
                links.push(ArtistLink {
                    artist_id: artist.id,
                    role,
                    sub_role: sub_role.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn count_change(stats: &mut ScanStats, existed: bool) {
    if existed {
        stats.updates += 1;
    } else {
        stats.additions += 1;
    }
}

/// A catalog track whose file vanished and which looks like the file at the
/// request path: same MBID, else same size, title, numbering and release.
fn find_moved_track(
    txn: &WriteTransaction,
    request: &ScanRequest,
    parsed: &ParsedTrack,
    title: &str,
) -> Result<Option<Track>, LibraryError> {
    if let Some(mbid) = &parsed.mbid {
        for candidate in find_tracks_by_mbid(txn, mbid)? {
            if !Path::new(&candidate.absolute_path).exists() {
                return Ok(Some(candidate));
            }
        }
    }

    let disc_number = parsed.medium.as_ref().and_then(|medium| medium.position);
    let release_name = parsed.release().map(|release| release.name.as_str());
    for candidate in find_tracks_by_size(txn, request.file_info.file_size)? {
        if Path::new(&candidate.absolute_path).exists() {
            continue;
        }
        if candidate.title != title
            || candidate.position != parsed.position
            || candidate.disc_number != disc_number
        {
            continue;
        }
        let candidate_release = match &candidate.release_id {
            Some(id) => get_release(txn, id)?.map(|release| release.name),
            None => None,
        };
        if candidate_release.as_deref() != release_name {
            continue;
        }
        return Ok(Some(candidate));
    }
    Ok(None)
}
