use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{
    file_stem, mbid_key, stable_id, Artist, ArtistInfo, Cluster, ClusterType, ImageFile,
    LyricsFile, Medium, PlayListFile, Release, Track,
};
use redb::{
    Database, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::LibraryError;

pub const CATALOG_VERSION: u32 = 2;
const KEY_SEP: char = '\x1f';
const KEY_END: char = '\u{10ffff}';

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const META_TABLE: Table = TableDefinition::new("meta");
const ARTISTS_TABLE: Table = TableDefinition::new("artists");
const ARTISTS_BY_NAME_TABLE: Table = TableDefinition::new("artists_by_name");
const ARTISTS_BY_MBID_TABLE: Table = TableDefinition::new("artists_by_mbid");
const RELEASES_TABLE: Table = TableDefinition::new("releases");
const RELEASES_BY_NAME_TABLE: Table = TableDefinition::new("releases_by_name");
const RELEASES_BY_MBID_TABLE: Table = TableDefinition::new("releases_by_mbid");
const MEDIUMS_TABLE: Table = TableDefinition::new("mediums");
const MEDIUMS_BY_RELEASE_TABLE: Table = TableDefinition::new("mediums_by_release");
const CLUSTER_TYPES_TABLE: Table = TableDefinition::new("cluster_types");
const CLUSTERS_TABLE: Table = TableDefinition::new("clusters");
const CLUSTERS_BY_VALUE_TABLE: Table = TableDefinition::new("clusters_by_value");
const TRACKS_TABLE: Table = TableDefinition::new("tracks");
const TRACKS_BY_PATH_TABLE: Table = TableDefinition::new("tracks_by_path");
const TRACKS_BY_MBID_TABLE: Table = TableDefinition::new("tracks_by_mbid");
const TRACKS_BY_RELEASE_TABLE: Table = TableDefinition::new("tracks_by_release");
const TRACKS_BY_SIZE_TABLE: Table = TableDefinition::new("tracks_by_size");
const TRACKS_BY_DIRECTORY_TABLE: Table = TableDefinition::new("tracks_by_directory");
const IMAGES_TABLE: Table = TableDefinition::new("images");
const IMAGES_BY_DIRECTORY_TABLE: Table = TableDefinition::new("images_by_directory");
const IMAGES_BY_STEM_TABLE: Table = TableDefinition::new("images_by_stem");
const LYRICS_FILES_TABLE: Table = TableDefinition::new("lyrics_files");
const LYRICS_FILES_BY_TRACK_TABLE: Table = TableDefinition::new("lyrics_files_by_track");
const PLAYLISTS_TABLE: Table = TableDefinition::new("playlists");
const ARTIST_INFOS_TABLE: Table = TableDefinition::new("artist_infos");
const ARTIST_INFOS_BY_ARTIST_TABLE: Table = TableDefinition::new("artist_infos_by_artist");

const ALL_TABLES: [Table; 26] = [
    META_TABLE,
    ARTISTS_TABLE,
    ARTISTS_BY_NAME_TABLE,
    ARTISTS_BY_MBID_TABLE,
    RELEASES_TABLE,
    RELEASES_BY_NAME_TABLE,
    RELEASES_BY_MBID_TABLE,
    MEDIUMS_TABLE,
    MEDIUMS_BY_RELEASE_TABLE,
    CLUSTER_TYPES_TABLE,
    CLUSTERS_TABLE,
    CLUSTERS_BY_VALUE_TABLE,
    TRACKS_TABLE,
    TRACKS_BY_PATH_TABLE,
    TRACKS_BY_MBID_TABLE,
    TRACKS_BY_RELEASE_TABLE,
    TRACKS_BY_SIZE_TABLE,
    TRACKS_BY_DIRECTORY_TABLE,
    IMAGES_TABLE,
    IMAGES_BY_DIRECTORY_TABLE,
    IMAGES_BY_STEM_TABLE,
    LYRICS_FILES_TABLE,
    LYRICS_FILES_BY_TRACK_TABLE,
    PLAYLISTS_TABLE,
    ARTIST_INFOS_TABLE,
    ARTIST_INFOS_BY_ARTIST_TABLE,
];

const META_VERSION_KEY: &str = "version";
const META_ASSOCIATION_KEY: &str = "association_settings";

/// Handle on the catalog database. Cheap to clone.
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    /// Opens or creates the catalog, failing on a version mismatch.
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        Self::open_with(path, false)
    }

    /// Opens or creates the catalog, wiping it when the version differs.
    pub fn open_or_reset(path: &Path) -> Result<Self, LibraryError> {
        Self::open_with(path, true)
    }

    fn open_with(path: &Path, reset_on_mismatch: bool) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let catalog = Self { db: Arc::new(db) };

        let version: Option<u32> = catalog.read(|txn| load(txn, META_TABLE, META_VERSION_KEY))?;
        match version {
            Some(version) if version == CATALOG_VERSION => {
                info!("Loaded catalog from {:?}", path);
            }
            Some(version) if !reset_on_mismatch => {
                return Err(LibraryError::VersionMismatch(version));
            }
            Some(version) => {
                warn!("Catalog version mismatch ({}); resetting", version);
                catalog.reset()?;
            }
            None => {
                info!("Creating catalog at {:?}", path);
                catalog.reset()?;
            }
        }
        Ok(catalog)
    }

    fn reset(&self) -> Result<(), LibraryError> {
        self.write(|txn| {
            for table in ALL_TABLES {
                clear_table(txn, table)?;
            }
            store(txn, META_TABLE, META_VERSION_KEY, &CATALOG_VERSION)
        })
    }

    pub fn read<T, F>(&self, f: F) -> Result<T, LibraryError>
    where
        F: FnOnce(&ReadTransaction) -> Result<T, LibraryError>,
    {
        let txn = self.db.begin_read()?;
        f(&txn)
    }

    /// Runs `f` in a write transaction, committing only when it returns `Ok`.
    pub fn write<T, F>(&self, f: F) -> Result<T, LibraryError>
    where
        F: FnOnce(&WriteTransaction) -> Result<T, LibraryError>,
    {
        let txn = self.db.begin_write()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort()?;
                Err(err)
            }
        }
    }
}

/// Lookups shared by read and write transactions.
pub trait CatalogRead {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, LibraryError>;
    fn range_raw(
        &self,
        table: Table,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, LibraryError>;
    fn count(&self, table: Table) -> Result<u64, LibraryError>;
}

impl CatalogRead for ReadTransaction<'_> {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, LibraryError> {
        match self.open_table(table) {
            Ok(table) => get_from(&table, key),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn range_raw(
        &self,
        table: Table,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, LibraryError> {
        match self.open_table(table) {
            Ok(table) => range_from(&table, start, end, limit),
            Err(TableError::TableDoesNotExist(_)) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn count(&self, table: Table) -> Result<u64, LibraryError> {
        match self.open_table(table) {
            Ok(table) => Ok(table.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl CatalogRead for WriteTransaction<'_> {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, LibraryError> {
        let table = self.open_table(table)?;
        get_from(&table, key)
    }

    fn range_raw(
        &self,
        table: Table,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, LibraryError> {
        let table = self.open_table(table)?;
        range_from(&table, start, end, limit)
    }

    fn count(&self, table: Table) -> Result<u64, LibraryError> {
        let table = self.open_table(table)?;
        Ok(table.len()?)
    }
}

fn get_from<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    key: &str,
) -> Result<Option<Vec<u8>>, LibraryError> {
    Ok(table.get(key)?.map(|value| value.value().to_vec()))
}

fn range_from<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    start: &str,
    end: &str,
    limit: usize,
) -> Result<Vec<(String, Vec<u8>)>, LibraryError> {
    let mut out = Vec::new();
    if limit == 0 {
        return Ok(out);
    }
    for entry in table.range(start..end)? {
        let (key, value) = entry?;
        out.push((key.value().to_string(), value.value().to_vec()));
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(txn: &WriteTransaction, table: Table) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn load<T: for<'de> Deserialize<'de>>(
    txn: &impl CatalogRead,
    table: Table,
    key: &str,
) -> Result<Option<T>, LibraryError> {
    match txn.get_raw(table, key)? {
        Some(bytes) => Ok(Some(decode_value(&bytes)?)),
        None => Ok(None),
    }
}

fn store<T: Serialize>(
    txn: &WriteTransaction,
    table: Table,
    key: &str,
    value: &T,
) -> Result<(), LibraryError> {
    let bytes = encode_value(value)?;
    put_raw(txn, table, key, &bytes)
}

fn put_raw(txn: &WriteTransaction, table: Table, key: &str, value: &[u8]) -> Result<(), LibraryError> {
    let mut table = txn.open_table(table)?;
    table.insert(key, value)?;
    Ok(())
}

fn remove_raw(txn: &WriteTransaction, table: Table, key: &str) -> Result<(), LibraryError> {
    let mut table = txn.open_table(table)?;
    table.remove(key)?;
    Ok(())
}

fn load_prefixed<T: for<'de> Deserialize<'de>>(
    txn: &impl CatalogRead,
    index: Table,
    prefix: &str,
    records: Table,
) -> Result<Vec<T>, LibraryError> {
    let mut out = Vec::new();
    for id in ids_with_prefix(txn, index, prefix)? {
        if let Some(record) = load(txn, records, &id)? {
            out.push(record);
        }
    }
    Ok(out)
}

/// Ids stored as the last component of `prefix\x1f...\x1fid` index keys.
fn ids_with_prefix(
    txn: &impl CatalogRead,
    index: Table,
    prefix: &str,
) -> Result<Vec<String>, LibraryError> {
    let start = prefix_key(prefix);
    let mut end = start.clone();
    end.push(KEY_END);
    let mut ids = Vec::new();
    for (key, _) in txn.range_raw(index, &start, &end, usize::MAX)? {
        let (_, id) = split_key_last(&key)?;
        ids.push(id.to_string());
    }
    Ok(ids)
}

fn page<T: for<'de> Deserialize<'de>>(
    txn: &impl CatalogRead,
    table: Table,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<T>, LibraryError> {
    let start = match after {
        Some(key) => format!("{}\0", key),
        None => String::new(),
    };
    let end = KEY_END.to_string();
    txn.range_raw(table, &start, &end, limit)?
        .iter()
        .map(|(_, bytes)| decode_value(bytes))
        .collect()
}

fn all_keys(txn: &impl CatalogRead, table: Table) -> Result<Vec<String>, LibraryError> {
    let end = KEY_END.to_string();
    Ok(txn
        .range_raw(table, "", &end, usize::MAX)?
        .into_iter()
        .map(|(key, _)| key)
        .collect())
}

fn join_key(parts: &[&str]) -> String {
    let mut out = String::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            out.push(KEY_SEP);
        }
        out.push_str(part);
    }
    out
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

/// Allocates the next id of `kind`; ids sort in creation order.
fn next_id(txn: &WriteTransaction, kind: &str) -> Result<String, LibraryError> {
    let key = join_key(&["seq", kind]);
    let current: u64 = load(txn, META_TABLE, &key)?.unwrap_or(0);
    let next = current + 1;
    store(txn, META_TABLE, &key, &next)?;
    Ok(format!("{:016x}", next))
}

fn size_key(size: u64) -> String {
    format!("{:016x}", size)
}

fn position_key(position: Option<u32>) -> String {
    match position {
        Some(position) => format!("{:08x}", position),
        None => "~".to_string(),
    }
}

// Artists

pub fn get_artist(txn: &impl CatalogRead, id: &str) -> Result<Option<Artist>, LibraryError> {
    load(txn, ARTISTS_TABLE, id)
}

pub fn find_artist_by_mbid(
    txn: &impl CatalogRead,
    mbid: &Uuid,
) -> Result<Option<Artist>, LibraryError> {
    match txn.get_raw(ARTISTS_BY_MBID_TABLE, &mbid_key(mbid))? {
        Some(id) => get_artist(txn, &String::from_utf8_lossy(&id)),
        None => Ok(None),
    }
}

/// Artists named exactly `name`, oldest first.
pub fn find_artists_by_name(txn: &impl CatalogRead, name: &str) -> Result<Vec<Artist>, LibraryError> {
    load_prefixed(txn, ARTISTS_BY_NAME_TABLE, name, ARTISTS_TABLE)
}

pub fn create_artist(
    txn: &WriteTransaction,
    name: &str,
    sort_name: &str,
    mbid: Option<Uuid>,
) -> Result<Artist, LibraryError> {
    let artist = Artist {
        id: next_id(txn, "artist")?,
        name: name.to_string(),
        sort_name: sort_name.to_string(),
        mbid,
        preferred_image_id: None,
    };
    save_artist(txn, &artist)?;
    Ok(artist)
}

pub fn save_artist(txn: &WriteTransaction, artist: &Artist) -> Result<(), LibraryError> {
    if let Some(previous) = get_artist(txn, &artist.id)? {
        unindex_artist(txn, &previous)?;
    }
    store(txn, ARTISTS_TABLE, &artist.id, artist)?;
    put_raw(txn, ARTISTS_BY_NAME_TABLE, &join_key(&[&artist.name, &artist.id]), &[])?;
    if let Some(mbid) = &artist.mbid {
        put_raw(txn, ARTISTS_BY_MBID_TABLE, &mbid_key(mbid), artist.id.as_bytes())?;
    }
    Ok(())
}

pub fn remove_artist(txn: &WriteTransaction, id: &str) -> Result<bool, LibraryError> {
    match get_artist(txn, id)? {
        Some(artist) => {
            unindex_artist(txn, &artist)?;
            remove_raw(txn, ARTISTS_TABLE, id)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn unindex_artist(txn: &WriteTransaction, artist: &Artist) -> Result<(), LibraryError> {
    remove_raw(txn, ARTISTS_BY_NAME_TABLE, &join_key(&[&artist.name, &artist.id]))?;
    if let Some(mbid) = &artist.mbid {
        remove_raw(txn, ARTISTS_BY_MBID_TABLE, &mbid_key(mbid))?;
    }
    Ok(())
}

pub fn artist_ids(txn: &impl CatalogRead) -> Result<Vec<String>, LibraryError> {
    all_keys(txn, ARTISTS_TABLE)
}

pub fn artists_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Artist>, LibraryError> {
    page(txn, ARTISTS_TABLE, after, limit)
}

// Releases

pub fn get_release(txn: &impl CatalogRead, id: &str) -> Result<Option<Release>, LibraryError> {
    load(txn, RELEASES_TABLE, id)
}

pub fn find_release_by_mbid(
    txn: &impl CatalogRead,
    mbid: &Uuid,
) -> Result<Option<Release>, LibraryError> {
    match txn.get_raw(RELEASES_BY_MBID_TABLE, &mbid_key(mbid))? {
        Some(id) => get_release(txn, &String::from_utf8_lossy(&id)),
        None => Ok(None),
    }
}

pub fn find_releases_by_name(
    txn: &impl CatalogRead,
    name: &str,
) -> Result<Vec<Release>, LibraryError> {
    load_prefixed(txn, RELEASES_BY_NAME_TABLE, name, RELEASES_TABLE)
}

pub fn create_release(txn: &WriteTransaction, mut release: Release) -> Result<Release, LibraryError> {
    release.id = next_id(txn, "release")?;
    save_release(txn, &release)?;
    Ok(release)
}

pub fn save_release(txn: &WriteTransaction, release: &Release) -> Result<(), LibraryError> {
    if let Some(previous) = get_release(txn, &release.id)? {
        unindex_release(txn, &previous)?;
    }
    store(txn, RELEASES_TABLE, &release.id, release)?;
    put_raw(txn, RELEASES_BY_NAME_TABLE, &join_key(&[&release.name, &release.id]), &[])?;
    if let Some(mbid) = &release.mbid {
        put_raw(txn, RELEASES_BY_MBID_TABLE, &mbid_key(mbid), release.id.as_bytes())?;
    }
    Ok(())
}

/// Removes the release and its mediums.
pub fn remove_release(txn: &WriteTransaction, id: &str) -> Result<bool, LibraryError> {
    let release = match get_release(txn, id)? {
        Some(release) => release,
        None => return Ok(false),
    };
    for medium in mediums_of_release(txn, id)? {
        remove_medium(txn, &medium.id)?;
    }
    unindex_release(txn, &release)?;
    remove_raw(txn, RELEASES_TABLE, id)?;
    Ok(true)
}

fn unindex_release(txn: &WriteTransaction, release: &Release) -> Result<(), LibraryError> {
    remove_raw(txn, RELEASES_BY_NAME_TABLE, &join_key(&[&release.name, &release.id]))?;
    if let Some(mbid) = &release.mbid {
        remove_raw(txn, RELEASES_BY_MBID_TABLE, &mbid_key(mbid))?;
    }
    Ok(())
}

pub fn release_ids(txn: &impl CatalogRead) -> Result<Vec<String>, LibraryError> {
    all_keys(txn, RELEASES_TABLE)
}

pub fn releases_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Release>, LibraryError> {
    page(txn, RELEASES_TABLE, after, limit)
}

/// Distinct directories holding tracks of the release.
pub fn release_track_directories(
    txn: &impl CatalogRead,
    release_id: &str,
) -> Result<Vec<String>, LibraryError> {
    let start = prefix_key(release_id);
    let mut end = start.clone();
    end.push(KEY_END);
    let mut directories: Vec<String> = Vec::new();
    for (key, _) in txn.range_raw(TRACKS_BY_RELEASE_TABLE, &start, &end, usize::MAX)? {
        let (head, _) = split_key_last(&key)?;
        let directory = &head[start.len()..];
        if directories.last().map(|last| last != directory).unwrap_or(true) {
            directories.push(directory.to_string());
        }
    }
    Ok(directories)
}

// Mediums

pub fn get_medium(txn: &impl CatalogRead, id: &str) -> Result<Option<Medium>, LibraryError> {
    load(txn, MEDIUMS_TABLE, id)
}

pub fn mediums_of_release(
    txn: &impl CatalogRead,
    release_id: &str,
) -> Result<Vec<Medium>, LibraryError> {
    load_prefixed(txn, MEDIUMS_BY_RELEASE_TABLE, release_id, MEDIUMS_TABLE)
}

pub fn find_medium(
    txn: &impl CatalogRead,
    release_id: &str,
    position: Option<u32>,
) -> Result<Option<Medium>, LibraryError> {
    let prefix = join_key(&[release_id, &position_key(position)]);
    Ok(load_prefixed(txn, MEDIUMS_BY_RELEASE_TABLE, &prefix, MEDIUMS_TABLE)?
        .into_iter()
        .next())
}

pub fn create_medium(txn: &WriteTransaction, mut medium: Medium) -> Result<Medium, LibraryError> {
    medium.id = next_id(txn, "medium")?;
    save_medium(txn, &medium)?;
    Ok(medium)
}

pub fn save_medium(txn: &WriteTransaction, medium: &Medium) -> Result<(), LibraryError> {
    if let Some(previous) = get_medium(txn, &medium.id)? {
        remove_raw(txn, MEDIUMS_BY_RELEASE_TABLE, &medium_index_key(&previous))?;
    }
    store(txn, MEDIUMS_TABLE, &medium.id, medium)?;
    put_raw(txn, MEDIUMS_BY_RELEASE_TABLE, &medium_index_key(medium), &[])
}

pub fn remove_medium(txn: &WriteTransaction, id: &str) -> Result<bool, LibraryError> {
    match get_medium(txn, id)? {
        Some(medium) => {
            remove_raw(txn, MEDIUMS_BY_RELEASE_TABLE, &medium_index_key(&medium))?;
            remove_raw(txn, MEDIUMS_TABLE, id)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn medium_ids(txn: &impl CatalogRead) -> Result<Vec<String>, LibraryError> {
    all_keys(txn, MEDIUMS_TABLE)
}

pub fn mediums_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Medium>, LibraryError> {
    page(txn, MEDIUMS_TABLE, after, limit)
}

fn medium_index_key(medium: &Medium) -> String {
    join_key(&[&medium.release_id, &position_key(medium.position), &medium.id])
}

// Clusters

pub fn cluster_types(txn: &impl CatalogRead) -> Result<Vec<ClusterType>, LibraryError> {
    let end = KEY_END.to_string();
    txn.range_raw(CLUSTER_TYPES_TABLE, "", &end, usize::MAX)?
        .iter()
        .map(|(_, bytes)| decode_value(bytes))
        .collect()
}

pub fn find_cluster_type(
    txn: &impl CatalogRead,
    name: &str,
) -> Result<Option<ClusterType>, LibraryError> {
    load(txn, CLUSTER_TYPES_TABLE, name)
}

pub fn create_cluster_type(txn: &WriteTransaction, name: &str) -> Result<ClusterType, LibraryError> {
    let cluster_type = ClusterType {
        name: name.to_string(),
    };
    store(txn, CLUSTER_TYPES_TABLE, name, &cluster_type)?;
    Ok(cluster_type)
}

/// Removes a cluster type together with its clusters.
pub fn remove_cluster_type(txn: &WriteTransaction, name: &str) -> Result<Vec<String>, LibraryError> {
    let removed = ids_with_prefix(txn, CLUSTERS_BY_VALUE_TABLE, name)?;
    for id in &removed {
        remove_cluster(txn, id)?;
    }
    remove_raw(txn, CLUSTER_TYPES_TABLE, name)?;
    Ok(removed)
}

pub fn get_cluster(txn: &impl CatalogRead, id: &str) -> Result<Option<Cluster>, LibraryError> {
    load(txn, CLUSTERS_TABLE, id)
}

pub fn find_cluster(
    txn: &impl CatalogRead,
    type_name: &str,
    value: &str,
) -> Result<Option<Cluster>, LibraryError> {
    match txn.get_raw(CLUSTERS_BY_VALUE_TABLE, &join_key(&[type_name, value]))? {
        Some(id) => get_cluster(txn, &String::from_utf8_lossy(&id)),
        None => Ok(None),
    }
}

pub fn create_cluster(
    txn: &WriteTransaction,
    type_name: &str,
    value: &str,
) -> Result<Cluster, LibraryError> {
    let cluster = Cluster {
        id: next_id(txn, "cluster")?,
        type_name: type_name.to_string(),
        value: value.to_string(),
    };
    store(txn, CLUSTERS_TABLE, &cluster.id, &cluster)?;
    put_raw(
        txn,
        CLUSTERS_BY_VALUE_TABLE,
        &join_key(&[type_name, value]),
        cluster.id.as_bytes(),
    )?;
    Ok(cluster)
}

pub fn remove_cluster(txn: &WriteTransaction, id: &str) -> Result<bool, LibraryError> {
    match get_cluster(txn, id)? {
        Some(cluster) => {
            remove_raw(
                txn,
                CLUSTERS_BY_VALUE_TABLE,
                &join_key(&[&cluster.type_name, &cluster.value]),
            )?;
            remove_raw(txn, CLUSTERS_TABLE, id)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn cluster_ids(txn: &impl CatalogRead) -> Result<Vec<String>, LibraryError> {
    all_keys(txn, CLUSTERS_TABLE)
}

// Tracks

pub fn get_track(txn: &impl CatalogRead, id: &str) -> Result<Option<Track>, LibraryError> {
    load(txn, TRACKS_TABLE, id)
}

pub fn find_track_by_path(txn: &impl CatalogRead, path: &str) -> Result<Option<Track>, LibraryError> {
    match txn.get_raw(TRACKS_BY_PATH_TABLE, path)? {
        Some(id) => get_track(txn, &String::from_utf8_lossy(&id)),
        None => Ok(None),
    }
}

pub fn find_tracks_by_mbid(txn: &impl CatalogRead, mbid: &Uuid) -> Result<Vec<Track>, LibraryError> {
    load_prefixed(txn, TRACKS_BY_MBID_TABLE, &mbid_key(mbid), TRACKS_TABLE)
}

pub fn find_tracks_by_size(txn: &impl CatalogRead, size: u64) -> Result<Vec<Track>, LibraryError> {
    load_prefixed(txn, TRACKS_BY_SIZE_TABLE, &size_key(size), TRACKS_TABLE)
}

pub fn tracks_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Track>, LibraryError> {
    page(txn, TRACKS_TABLE, after, limit)
}

pub fn track_count(txn: &impl CatalogRead) -> Result<u64, LibraryError> {
    txn.count(TRACKS_TABLE)
}

pub fn allocate_track_id(txn: &WriteTransaction) -> Result<String, LibraryError> {
    next_id(txn, "track")
}

pub fn save_track(txn: &WriteTransaction, track: &Track) -> Result<(), LibraryError> {
    if let Some(previous) = get_track(txn, &track.id)? {
        unindex_track(txn, &previous)?;
    }
    store(txn, TRACKS_TABLE, &track.id, track)?;
    put_raw(txn, TRACKS_BY_PATH_TABLE, &track.absolute_path, track.id.as_bytes())?;
    put_raw(txn, TRACKS_BY_SIZE_TABLE, &join_key(&[&size_key(track.file_size), &track.id]), &[])?;
    put_raw(txn, TRACKS_BY_DIRECTORY_TABLE, &track_directory_key(track), &[])?;
    if let Some(mbid) = &track.mbid {
        put_raw(txn, TRACKS_BY_MBID_TABLE, &join_key(&[&mbid_key(mbid), &track.id]), &[])?;
    }
    if let Some(release_id) = &track.release_id {
        put_raw(
            txn,
            TRACKS_BY_RELEASE_TABLE,
            &join_key(&[release_id, &track.directory, &track.id]),
            &[],
        )?;
    }
    Ok(())
}

pub fn remove_track(txn: &WriteTransaction, id: &str) -> Result<Option<Track>, LibraryError> {
    let track = match get_track(txn, id)? {
        Some(track) => track,
        None => return Ok(None),
    };
    unindex_track(txn, &track)?;
    remove_raw(txn, TRACKS_TABLE, id)?;
    Ok(Some(track))
}

fn unindex_track(txn: &WriteTransaction, track: &Track) -> Result<(), LibraryError> {
    remove_raw(txn, TRACKS_BY_PATH_TABLE, &track.absolute_path)?;
    remove_raw(txn, TRACKS_BY_SIZE_TABLE, &join_key(&[&size_key(track.file_size), &track.id]))?;
    remove_raw(txn, TRACKS_BY_DIRECTORY_TABLE, &track_directory_key(track))?;
    if let Some(mbid) = &track.mbid {
        remove_raw(txn, TRACKS_BY_MBID_TABLE, &join_key(&[&mbid_key(mbid), &track.id]))?;
    }
    if let Some(release_id) = &track.release_id {
        remove_raw(
            txn,
            TRACKS_BY_RELEASE_TABLE,
            &join_key(&[release_id, &track.directory, &track.id]),
        )?;
    }
    Ok(())
}

fn track_directory_key(track: &Track) -> String {
    let stem = file_stem(Path::new(&track.absolute_path));
    join_key(&[&track.directory, &stem, &track.id])
}

/// Tracks in `directory` whose file name without extension is `stem`.
pub fn find_tracks_by_stem(
    txn: &impl CatalogRead,
    directory: &str,
    stem: &str,
) -> Result<Vec<Track>, LibraryError> {
    load_prefixed(txn, TRACKS_BY_DIRECTORY_TABLE, &join_key(&[directory, stem]), TRACKS_TABLE)
}

/// Track ids grouped by MBID, for every MBID carried by more than one track.
pub fn duplicate_mbid_groups(
    txn: &impl CatalogRead,
) -> Result<Vec<(String, Vec<String>)>, LibraryError> {
    let end = KEY_END.to_string();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for (key, _) in txn.range_raw(TRACKS_BY_MBID_TABLE, "", &end, usize::MAX)? {
        let (mbid, id) = split_key_last(&key)?;
        match groups.last_mut() {
            Some((current, ids)) if current == mbid => ids.push(id.to_string()),
            _ => groups.push((mbid.to_string(), vec![id.to_string()])),
        }
    }
    groups.retain(|(_, ids)| ids.len() > 1);
    Ok(groups)
}

/// Entity ids still referenced by at least one track or, for artists, by an
/// artist info file.
#[derive(Debug, Default)]
pub struct References {
    pub artists: HashSet<String>,
    pub releases: HashSet<String>,
    pub mediums: HashSet<String>,
    pub clusters: HashSet<String>,
}

pub fn collect_references(txn: &impl CatalogRead) -> Result<References, LibraryError> {
    const PAGE_SIZE: usize = 500;

    let mut refs = References::default();
    let mut after: Option<String> = None;
    loop {
        let tracks = tracks_page(txn, after.as_deref(), PAGE_SIZE)?;
        for track in &tracks {
            for link in &track.artist_links {
                refs.artists.insert(link.artist_id.clone());
            }
            if let Some(release_id) = &track.release_id {
                refs.releases.insert(release_id.clone());
            }
            if let Some(medium_id) = &track.medium_id {
                refs.mediums.insert(medium_id.clone());
            }
            refs.clusters.extend(track.cluster_ids.iter().cloned());
        }
        match tracks.last() {
            Some(last) if tracks.len() == PAGE_SIZE => after = Some(last.id.clone()),
            _ => break,
        }
    }
    let end = KEY_END.to_string();
    for (key, _) in txn.range_raw(ARTIST_INFOS_BY_ARTIST_TABLE, "", &end, usize::MAX)? {
        let (artist_id, _) = split_key_last(&key)?;
        refs.artists.insert(artist_id.to_string());
    }
    Ok(refs)
}

// Images and lyrics files, keyed by the hash of their path.

pub fn find_image_by_path(txn: &impl CatalogRead, path: &str) -> Result<Option<ImageFile>, LibraryError> {
    load(txn, IMAGES_TABLE, &stable_id(path))
}

pub fn get_image(txn: &impl CatalogRead, id: &str) -> Result<Option<ImageFile>, LibraryError> {
    load(txn, IMAGES_TABLE, id)
}

pub fn save_image(txn: &WriteTransaction, image: &ImageFile) -> Result<(), LibraryError> {
    if let Some(previous) = get_image(txn, &image.id)? {
        unindex_image(txn, &previous)?;
    }
    store(txn, IMAGES_TABLE, &image.id, image)?;
    put_raw(txn, IMAGES_BY_DIRECTORY_TABLE, &join_key(&[&image.directory, &image.id]), &[])?;
    put_raw(txn, IMAGES_BY_STEM_TABLE, &image_stem_key(image), &[])
}

pub fn remove_image(txn: &WriteTransaction, id: &str) -> Result<(), LibraryError> {
    if let Some(image) = get_image(txn, id)? {
        unindex_image(txn, &image)?;
    }
    remove_raw(txn, IMAGES_TABLE, id)
}

fn unindex_image(txn: &WriteTransaction, image: &ImageFile) -> Result<(), LibraryError> {
    remove_raw(txn, IMAGES_BY_DIRECTORY_TABLE, &join_key(&[&image.directory, &image.id]))?;
    remove_raw(txn, IMAGES_BY_STEM_TABLE, &image_stem_key(image))
}

fn image_stem_key(image: &ImageFile) -> String {
    join_key(&[&image.stem.to_lowercase(), &image.id])
}

/// Images stored directly in `directory`, sorted by stem.
pub fn images_in_directory(
    txn: &impl CatalogRead,
    directory: &str,
) -> Result<Vec<ImageFile>, LibraryError> {
    let mut images: Vec<ImageFile> =
        load_prefixed(txn, IMAGES_BY_DIRECTORY_TABLE, directory, IMAGES_TABLE)?;
    images.sort_by(|a, b| a.stem.cmp(&b.stem).then_with(|| a.id.cmp(&b.id)));
    Ok(images)
}

/// Images anywhere in the library whose stem equals `stem`, ignoring case.
pub fn find_images_by_stem(
    txn: &impl CatalogRead,
    stem: &str,
) -> Result<Vec<ImageFile>, LibraryError> {
    load_prefixed(txn, IMAGES_BY_STEM_TABLE, &stem.to_lowercase(), IMAGES_TABLE)
}

pub fn images_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<ImageFile>, LibraryError> {
    page(txn, IMAGES_TABLE, after, limit)
}

pub fn image_count(txn: &impl CatalogRead) -> Result<u64, LibraryError> {
    txn.count(IMAGES_TABLE)
}

pub fn find_lyrics_file_by_path(
    txn: &impl CatalogRead,
    path: &str,
) -> Result<Option<LyricsFile>, LibraryError> {
    load(txn, LYRICS_FILES_TABLE, &stable_id(path))
}

pub fn save_lyrics_file(txn: &WriteTransaction, lyrics: &LyricsFile) -> Result<(), LibraryError> {
    if let Some(previous) = load::<LyricsFile>(txn, LYRICS_FILES_TABLE, &lyrics.id)? {
        unindex_lyrics_file(txn, &previous)?;
    }
    store(txn, LYRICS_FILES_TABLE, &lyrics.id, lyrics)?;
    if let Some(track_id) = &lyrics.track_id {
        put_raw(txn, LYRICS_FILES_BY_TRACK_TABLE, &join_key(&[track_id, &lyrics.id]), &[])?;
    }
    Ok(())
}

pub fn remove_lyrics_file(txn: &WriteTransaction, id: &str) -> Result<(), LibraryError> {
    if let Some(lyrics) = load::<LyricsFile>(txn, LYRICS_FILES_TABLE, id)? {
        unindex_lyrics_file(txn, &lyrics)?;
    }
    remove_raw(txn, LYRICS_FILES_TABLE, id)
}

fn unindex_lyrics_file(txn: &WriteTransaction, lyrics: &LyricsFile) -> Result<(), LibraryError> {
    if let Some(track_id) = &lyrics.track_id {
        remove_raw(txn, LYRICS_FILES_BY_TRACK_TABLE, &join_key(&[track_id, &lyrics.id]))?;
    }
    Ok(())
}

pub fn lyrics_files_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<LyricsFile>, LibraryError> {
    page(txn, LYRICS_FILES_TABLE, after, limit)
}

pub fn lyrics_file_count(txn: &impl CatalogRead) -> Result<u64, LibraryError> {
    txn.count(LYRICS_FILES_TABLE)
}

/// External lyrics files associated with the track.
pub fn lyrics_files_for_track(
    txn: &impl CatalogRead,
    track_id: &str,
) -> Result<Vec<LyricsFile>, LibraryError> {
    load_prefixed(txn, LYRICS_FILES_BY_TRACK_TABLE, track_id, LYRICS_FILES_TABLE)
}

// Playlists

pub fn find_playlist_by_path(
    txn: &impl CatalogRead,
    path: &str,
) -> Result<Option<PlayListFile>, LibraryError> {
    load(txn, PLAYLISTS_TABLE, &stable_id(path))
}

pub fn save_playlist(txn: &WriteTransaction, playlist: &PlayListFile) -> Result<(), LibraryError> {
    store(txn, PLAYLISTS_TABLE, &playlist.id, playlist)
}

pub fn remove_playlist(txn: &WriteTransaction, id: &str) -> Result<(), LibraryError> {
    remove_raw(txn, PLAYLISTS_TABLE, id)
}

pub fn playlists_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<PlayListFile>, LibraryError> {
    page(txn, PLAYLISTS_TABLE, after, limit)
}

pub fn playlist_count(txn: &impl CatalogRead) -> Result<u64, LibraryError> {
    txn.count(PLAYLISTS_TABLE)
}

// Artist info files

pub fn find_artist_info_by_path(
    txn: &impl CatalogRead,
    path: &str,
) -> Result<Option<ArtistInfo>, LibraryError> {
    load(txn, ARTIST_INFOS_TABLE, &stable_id(path))
}

pub fn save_artist_info(txn: &WriteTransaction, info: &ArtistInfo) -> Result<(), LibraryError> {
    if let Some(previous) = load::<ArtistInfo>(txn, ARTIST_INFOS_TABLE, &info.id)? {
        unindex_artist_info(txn, &previous)?;
    }
    store(txn, ARTIST_INFOS_TABLE, &info.id, info)?;
    if let Some(artist_id) = &info.artist_id {
        put_raw(txn, ARTIST_INFOS_BY_ARTIST_TABLE, &join_key(&[artist_id, &info.id]), &[])?;
    }
    Ok(())
}

pub fn remove_artist_info(txn: &WriteTransaction, id: &str) -> Result<(), LibraryError> {
    if let Some(info) = load::<ArtistInfo>(txn, ARTIST_INFOS_TABLE, id)? {
        unindex_artist_info(txn, &info)?;
    }
    remove_raw(txn, ARTIST_INFOS_TABLE, id)
}

fn unindex_artist_info(txn: &WriteTransaction, info: &ArtistInfo) -> Result<(), LibraryError> {
    if let Some(artist_id) = &info.artist_id {
        remove_raw(txn, ARTIST_INFOS_BY_ARTIST_TABLE, &join_key(&[artist_id, &info.id]))?;
    }
    Ok(())
}

pub fn artist_infos_page(
    txn: &impl CatalogRead,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<ArtistInfo>, LibraryError> {
    page(txn, ARTIST_INFOS_TABLE, after, limit)
}

pub fn artist_info_count(txn: &impl CatalogRead) -> Result<u64, LibraryError> {
    txn.count(ARTIST_INFOS_TABLE)
}

pub fn artist_infos_for_artist(
    txn: &impl CatalogRead,
    artist_id: &str,
) -> Result<Vec<ArtistInfo>, LibraryError> {
    load_prefixed(txn, ARTIST_INFOS_BY_ARTIST_TABLE, artist_id, ARTIST_INFOS_TABLE)
}

/// Settings the association steps ran with last time.
pub fn load_association_settings(txn: &impl CatalogRead) -> Result<Vec<String>, LibraryError> {
    Ok(load(txn, META_TABLE, META_ASSOCIATION_KEY)?.unwrap_or_default())
}

pub fn store_association_settings(
    txn: &WriteTransaction,
    settings: &[String],
) -> Result<(), LibraryError> {
    store(txn, META_TABLE, META_ASSOCIATION_KEY, &settings)
}
