use std::collections::BTreeSet;
use std::path::Path;

use common::{Artist, Medium, Release};
use metadata::{
    ParsedArtist, ParsedMedium, ParsedRelease, ParsedTrack, GENRE_CLUSTER, GROUPING_CLUSTER,
    LANGUAGE_CLUSTER, MOOD_CLUSTER,
};
use redb::WriteTransaction;
use tracing::{debug, info};

use crate::catalog::{
    self, create_artist, create_cluster, create_cluster_type, create_medium, create_release,
    find_artist_by_mbid, find_artists_by_name, find_cluster, find_cluster_type, find_medium,
    find_release_by_mbid, find_releases_by_name, release_track_directories, save_artist,
    save_medium, save_release,
};
use crate::LibraryError;

/// Finds the catalog artist for `parsed`, creating or refreshing it.
///
/// An MBID is authoritative: the artist carrying it is renamed to match.
/// Without one, the oldest artist of the same name is reused, but only if it
/// has no MBID or `allow_fallback` permits attaching to one.
pub fn get_or_create_artist(
    txn: &WriteTransaction,
    parsed: &ParsedArtist,
    allow_fallback: bool,
) -> Result<Artist, LibraryError> {
    let sort_name = parsed.sort_name.as_deref().unwrap_or(&parsed.name);

    if let Some(mbid) = parsed.mbid {
        return match find_artist_by_mbid(txn, &mbid)? {
            Some(mut artist) => {
                let mut changed = false;
                if artist.name != parsed.name {
                    debug!("Artist [{}] renamed to {:?}", artist.id, parsed.name);
                    artist.name = parsed.name.clone();
                    changed = true;
                }
                if artist.sort_name != sort_name {
                    artist.sort_name = sort_name.to_string();
                    changed = true;
                }
                if changed {
                    save_artist(txn, &artist)?;
                }
                Ok(artist)
            }
            None => create_artist(txn, &parsed.name, sort_name, Some(mbid)),
        };
    }

    for mut artist in find_artists_by_name(txn, &parsed.name)? {
        if artist.mbid.is_some() && !allow_fallback {
            continue;
        }
        if let Some(sort_name) = &parsed.sort_name {
            if &artist.sort_name != sort_name {
                artist.sort_name = sort_name.clone();
                save_artist(txn, &artist)?;
            }
        }
        return Ok(artist);
    }

    create_artist(txn, &parsed.name, sort_name, None)
}

/// Finds the catalog release for `parsed`, creating or refreshing it.
///
/// Without an MBID a same-named release only matches when its other fields
/// agree and it already has tracks in `directory`, or in a sibling of it when
/// the release spans several media.
pub fn get_or_create_release(
    txn: &WriteTransaction,
    parsed: &ParsedRelease,
    directory: &Path,
) -> Result<Release, LibraryError> {
    if let Some(mbid) = parsed.mbid {
        return match find_release_by_mbid(txn, &mbid)? {
            Some(mut release) => {
                if apply_release_fields(&mut release, parsed) {
                    save_release(txn, &release)?;
                }
                Ok(release)
            }
            None => create_release(txn, new_release(parsed)),
        };
    }

    let search_siblings = parsed.medium_count.map(|count| count > 1).unwrap_or(false);
    for mut release in find_releases_by_name(txn, &parsed.name)? {
        if release.mbid.is_some() || !release_matches(&release, parsed) {
            continue;
        }
        let directories = release_track_directories(txn, &release.id)?;
        let in_scope = directories.iter().any(|candidate| {
            let candidate = Path::new(candidate);
            if search_siblings {
                candidate.parent() == directory.parent()
            } else {
                candidate == directory
            }
        });
        if !in_scope {
            continue;
        }
        if apply_release_fields(&mut release, parsed) {
            save_release(txn, &release)?;
        }
        return Ok(release);
    }

    create_release(txn, new_release(parsed))
}

fn new_release(parsed: &ParsedRelease) -> Release {
    let mut release = Release {
        id: String::new(),
        name: String::new(),
        sort_name: String::new(),
        mbid: parsed.mbid,
        group_mbid: None,
        total_disc: None,
        artist_display_name: String::new(),
        is_compilation: false,
        barcode: String::new(),
        comment: String::new(),
        labels: Vec::new(),
        countries: Vec::new(),
        release_types: Vec::new(),
        preferred_image_id: None,
    };
    apply_release_fields(&mut release, parsed);
    release
}

fn release_matches(release: &Release, parsed: &ParsedRelease) -> bool {
    release.name == parsed.name
        && release.sort_name == parsed.sort_name
        && release.total_disc == parsed.medium_count
        && release.is_compilation == parsed.is_compilation
        && release.barcode == parsed.barcode
        && as_set(&release.labels) == as_set(&parsed.labels)
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn apply_release_fields(release: &mut Release, parsed: &ParsedRelease) -> bool {
    let before = release.clone();
    release.name = parsed.name.clone();
    release.sort_name = parsed.sort_name.clone();
    release.group_mbid = parsed.group_mbid;
    release.total_disc = parsed.medium_count;
    release.artist_display_name = parsed.artist_display_name.clone();
    release.is_compilation = parsed.is_compilation;
    release.barcode = parsed.barcode.clone();
    release.comment = parsed.comment.clone();
    release.labels = parsed.labels.clone();
    release.countries = parsed.countries.clone();
    release.release_types = parsed.release_types.clone();
    *release != before
}

pub fn get_or_create_medium(
    txn: &WriteTransaction,
    release: &Release,
    parsed: &ParsedMedium,
) -> Result<Medium, LibraryError> {
    match find_medium(txn, &release.id, parsed.position)? {
        Some(mut medium) => {
            let before = medium.clone();
            medium.name = parsed.name.clone();
            medium.media = parsed.media.clone();
            medium.track_count = parsed.track_count;
            medium.replay_gain = parsed.replay_gain;
            if medium != before {
                save_medium(txn, &medium)?;
            }
            Ok(medium)
        }
        None => create_medium(
            txn,
            Medium {
                id: String::new(),
                release_id: release.id.clone(),
                position: parsed.position,
                name: parsed.name.clone(),
                media: parsed.media.clone(),
                track_count: parsed.track_count,
                replay_gain: parsed.replay_gain,
                preferred_image_id: None,
            },
        ),
    }
}

/// Cluster ids for every tag value whose type is registered. Unknown types
/// are skipped.
pub fn get_or_create_clusters(
    txn: &WriteTransaction,
    parsed: &ParsedTrack,
) -> Result<Vec<String>, LibraryError> {
    let mut ids: Vec<String> = Vec::new();
    for (type_name, values) in parsed.clusters() {
        if find_cluster_type(txn, type_name)?.is_none() {
            continue;
        }
        for value in values {
            let cluster = match find_cluster(txn, type_name, value)? {
                Some(cluster) => cluster,
                None => create_cluster(txn, type_name, value)?,
            };
            if !ids.contains(&cluster.id) {
                ids.push(cluster.id);
            }
        }
    }
    Ok(ids)
}

/// Registers the built-in cluster types plus `extra`, dropping any other
/// type together with its clusters. Returns true when anything changed.
pub fn sync_cluster_types(txn: &WriteTransaction, extra: &[String]) -> Result<bool, LibraryError> {
    let mut wanted: Vec<&str> = vec![GENRE_CLUSTER, MOOD_CLUSTER, GROUPING_CLUSTER, LANGUAGE_CLUSTER];
    for name in extra {
        if !wanted.contains(&name.as_str()) {
            wanted.push(name);
        }
    }

    let mut changed = false;
    for existing in catalog::cluster_types(txn)? {
        if wanted.contains(&existing.name.as_str()) {
            continue;
        }
        let removed = catalog::remove_cluster_type(txn, &existing.name)?;
        info!(
            "Removed cluster type {:?} ({} clusters)",
            existing.name,
            removed.len()
        );
        changed = true;
    }
    for name in wanted {
        if find_cluster_type(txn, name)?.is_none() {
            create_cluster_type(txn, name)?;
            info!("Added cluster type {:?}", name);
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use metadata::{ParsedArtist, ParsedMedium, ParsedRelease, ParsedTrack};
    use uuid::Uuid;

    use super::*;
    use crate::catalog::{self, Catalog};

    fn temp_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        (dir, catalog)
    }

    fn artist(name: &str, mbid: Option<Uuid>) -> ParsedArtist {
        ParsedArtist {
            mbid,
            ..ParsedArtist::new(name)
        }
    }

    fn release(name: &str) -> ParsedRelease {
        ParsedRelease {
            name: name.to_string(),
            sort_name: name.to_string(),
            ..ParsedRelease::default()
        }
    }

    #[test]
    fn same_mbid_resolves_to_one_artist_with_latest_name() {
        let (_dir, catalog) = temp_catalog();
        let mbid = Uuid::from_u128(5);
        let (first, second) = catalog
            .write(|txn| {
                let first = get_or_create_artist(txn, &artist("Old Name", Some(mbid)), false)?;
                let second = get_or_create_artist(txn, &artist("New Name", Some(mbid)), false)?;
                Ok((first, second))
            })
            .unwrap();
        assert_eq!(first.id, second.id);
        let stored = catalog
            .read(|txn| catalog::get_artist(txn, &first.id))
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "New Name");
        assert_eq!(catalog.read(|txn| catalog::artist_ids(txn)).unwrap().len(), 1);
    }

    #[test]
    fn fallback_permission_decides_name_match_on_tagged_artist() {
        let (_dir, catalog) = temp_catalog();
        let tagged = catalog
            .write(|txn| get_or_create_artist(txn, &artist("Karajan", Some(Uuid::from_u128(9))), false))
            .unwrap();

        let primary = catalog
            .write(|txn| get_or_create_artist(txn, &artist("Karajan", None), false))
            .unwrap();
        assert_ne!(primary.id, tagged.id);
        assert!(primary.mbid.is_none());

        let conductor = catalog
            .write(|txn| get_or_create_artist(txn, &artist("Karajan", None), true))
            .unwrap();
        assert_eq!(conductor.id, tagged.id);
    }

    #[test]
    fn untagged_name_match_is_reused() {
        let (_dir, catalog) = temp_catalog();
        let (first, second) = catalog
            .write(|txn| {
                let first = get_or_create_artist(txn, &artist("Solo", None), false)?;
                let second = get_or_create_artist(txn, &artist("Solo", None), false)?;
                Ok((first, second))
            })
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn release_without_tracks_in_directory_is_not_matched() {
        let (_dir, catalog) = temp_catalog();
        let (first, second) = catalog
            .write(|txn| {
                let first = get_or_create_release(txn, &release("Greatest Hits"), Path::new("/music/a"))?;
                let second = get_or_create_release(txn, &release("Greatest Hits"), Path::new("/music/b"))?;
                Ok((first, second))
            })
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn release_matches_by_mbid_across_directories() {
        let (_dir, catalog) = temp_catalog();
        let parsed = ParsedRelease {
            mbid: Some(Uuid::from_u128(3)),
            ..release("Album")
        };
        let (first, second) = catalog
            .write(|txn| {
                let first = get_or_create_release(txn, &parsed, Path::new("/music/a"))?;
                let second = get_or_create_release(txn, &parsed, Path::new("/elsewhere"))?;
                Ok((first, second))
            })
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn medium_is_reused_by_position() {
        let (_dir, catalog) = temp_catalog();
        let parsed = ParsedMedium {
            position: Some(1),
            name: "Disc one".to_string(),
            ..ParsedMedium::default()
        };
        let (first, second) = catalog
            .write(|txn| {
                let release = get_or_create_release(txn, &release("Album"), Path::new("/music/a"))?;
                let first = get_or_create_medium(txn, &release, &parsed)?;
                let second = get_or_create_medium(txn, &release, &parsed)?;
                Ok((first, second))
            })
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn clusters_need_a_registered_type() {
        let (_dir, catalog) = temp_catalog();
        let mut parsed = ParsedTrack {
            genres: vec!["Rock".to_string(), "Rock".to_string()],
            ..ParsedTrack::default()
        };
        parsed
            .user_extra_tags
            .insert("UNREGISTERED".to_string(), vec!["x".to_string()]);

        let ids = catalog
            .write(|txn| {
                sync_cluster_types(txn, &[])?;
                get_or_create_clusters(txn, &parsed)
            })
            .unwrap();
        assert_eq!(ids.len(), 1);
        catalog
            .read(|txn| {
                assert!(catalog::find_cluster(txn, "GENRE", "Rock")?.is_some());
                assert!(catalog::find_cluster(txn, "UNREGISTERED", "x")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn dropped_extra_tag_type_is_removed() {
        let (_dir, catalog) = temp_catalog();
        let extra = vec!["MY_TAG".to_string()];
        assert!(catalog.write(|txn| sync_cluster_types(txn, &extra)).unwrap());
        assert!(!catalog.write(|txn| sync_cluster_types(txn, &extra)).unwrap());
        assert!(catalog.write(|txn| sync_cluster_types(txn, &[])).unwrap());
        assert!(catalog
            .read(|txn| catalog::find_cluster_type(txn, "MY_TAG"))
            .unwrap()
            .is_none());
    }
}
