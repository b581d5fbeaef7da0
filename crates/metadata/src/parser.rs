use std::collections::BTreeMap;

use common::{Advisory, Lyrics, PartialDate};
use uuid::Uuid;

use crate::lyrics::parse_lyrics_str;
use crate::split::split_tag_value;
use crate::{AudioProperties, TagKind, TagReader};

pub const GENRE_CLUSTER: &str = "GENRE";
pub const MOOD_CLUSTER: &str = "MOOD";
pub const GROUPING_CLUSTER: &str = "GROUPING";
pub const LANGUAGE_CLUSTER: &str = "LANGUAGE";

#[derive(Clone, Debug, Default)]
pub struct ParserSettings {
    pub artist_delimiters: Vec<String>,
    pub default_delimiters: Vec<String>,
    pub artist_whitelist: Vec<String>,
    pub user_extra_tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedArtist {
    pub name: String,
    pub sort_name: Option<String>,
    pub mbid: Option<Uuid>,
}

impl ParsedArtist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sort_name: None,
            mbid: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedRelease {
    pub name: String,
    pub sort_name: String,
    pub mbid: Option<Uuid>,
    pub group_mbid: Option<Uuid>,
    pub artists: Vec<ParsedArtist>,
    pub artist_display_name: String,
    pub medium_count: Option<u32>,
    pub is_compilation: bool,
    pub barcode: String,
    pub comment: String,
    pub labels: Vec<String>,
    pub countries: Vec<String>,
    pub release_types: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedMedium {
    pub media: String,
    pub name: String,
    pub position: Option<u32>,
    pub track_count: Option<u32>,
    pub replay_gain: Option<f32>,
    pub release: Option<ParsedRelease>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedTrack {
    pub title: String,
    pub mbid: Option<Uuid>,
    pub recording_mbid: Option<Uuid>,
    pub position: Option<u32>,
    pub medium: Option<ParsedMedium>,
    pub artists: Vec<ParsedArtist>,
    pub artist_display_name: String,
    pub conductor_artists: Vec<ParsedArtist>,
    pub composer_artists: Vec<ParsedArtist>,
    pub lyricist_artists: Vec<ParsedArtist>,
    pub mixer_artists: Vec<ParsedArtist>,
    pub producer_artists: Vec<ParsedArtist>,
    pub remixer_artists: Vec<ParsedArtist>,
    pub performer_artists: BTreeMap<String, Vec<ParsedArtist>>,
    pub genres: Vec<String>,
    pub moods: Vec<String>,
    pub groupings: Vec<String>,
    pub languages: Vec<String>,
    pub user_extra_tags: BTreeMap<String, Vec<String>>,
    pub date: Option<PartialDate>,
    pub original_date: Option<PartialDate>,
    pub original_year: Option<i32>,
    pub copyright: String,
    pub copyright_url: String,
    pub advisory: Option<Advisory>,
    pub comments: Vec<String>,
    pub replay_gain: Option<f32>,
    pub lyrics: Vec<Lyrics>,
    pub has_embedded_image: bool,
    pub audio: AudioProperties,
}

impl ParsedTrack {
    pub fn release(&self) -> Option<&ParsedRelease> {
        self.medium.as_ref().and_then(|medium| medium.release.as_ref())
    }

    /// Tag-type name paired with its values, built-in types first.
    pub fn clusters(&self) -> Vec<(&str, &[String])> {
        let mut out: Vec<(&str, &[String])> = vec![
            (GENRE_CLUSTER, self.genres.as_slice()),
            (MOOD_CLUSTER, self.moods.as_slice()),
            (GROUPING_CLUSTER, self.groupings.as_slice()),
            (LANGUAGE_CLUSTER, self.languages.as_slice()),
        ];
        for (name, values) in &self.user_extra_tags {
            out.push((name.as_str(), values.as_slice()));
        }
        out.retain(|(_, values)| !values.is_empty());
        out
    }
}

pub struct TrackMetadataParser {
    settings: ParserSettings,
}

impl TrackMetadataParser {
    pub fn new(settings: ParserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn parse(&self, reader: &dyn TagReader) -> ParsedTrack {
        let mut track = ParsedTrack {
            audio: reader.audio_properties(),
            has_embedded_image: reader.has_embedded_image(),
            ..ParsedTrack::default()
        };

        track.title = first_value(reader, &[TagKind::Title]).unwrap_or_default();
        track.mbid = first_mbid(reader, TagKind::MusicBrainzTrackId);
        track.recording_mbid = first_mbid(reader, TagKind::MusicBrainzRecordingId);
        track.position = first_value(reader, &[TagKind::TrackNumber])
            .and_then(|value| number_pair(&value).0);
        track.medium = self.parse_medium(reader);

        track.artists = self.parse_artists(
            reader,
            &[TagKind::Artists, TagKind::Artist],
            &[TagKind::ArtistsSortOrder, TagKind::ArtistSortOrder],
            &[TagKind::MusicBrainzArtistId],
        );
        track.artist_display_name = self.display_name(reader, &track.artists, TagKind::Artist);
        track.conductor_artists = self.parse_artists(reader, &[TagKind::Conductor], &[], &[]);
        track.composer_artists = self.parse_artists(
            reader,
            &[TagKind::Composer],
            &[TagKind::ComposerSortOrder],
            &[],
        );
        track.lyricist_artists = self.parse_artists(reader, &[TagKind::Lyricist], &[], &[]);
        track.mixer_artists = self.parse_artists(reader, &[TagKind::Mixer], &[], &[]);
        track.producer_artists = self.parse_artists(reader, &[TagKind::Producer], &[], &[]);
        track.remixer_artists = self.parse_artists(reader, &[TagKind::Remixer], &[], &[]);
        track.performer_artists = self.parse_performers(reader);

        track.genres = self.default_values(reader, &[TagKind::Genre]);
        track.moods = self.default_values(reader, &[TagKind::Mood]);
        track.groupings = self.default_values(reader, &[TagKind::Grouping]);
        track.languages = self.default_values(reader, &[TagKind::Language]);
        for name in &self.settings.user_extra_tags {
            let mut values = Vec::new();
            for value in reader.values_for_raw(name) {
                values.extend(split_tag_value(&value, &self.settings.default_delimiters, &[]));
            }
            if !values.is_empty() {
                track.user_extra_tags.insert(name.clone(), values);
            }
        }

        track.date = first_value(reader, &[TagKind::Date])
            .and_then(|value| PartialDate::parse(&value))
            .or_else(|| {
                first_value(reader, &[TagKind::Year]).and_then(|value| PartialDate::parse(&value))
            });
        track.original_date = first_value(reader, &[TagKind::OriginalReleaseDate])
            .and_then(|value| PartialDate::parse(&value));
        track.original_year = first_value(reader, &[TagKind::OriginalReleaseYear])
            .and_then(|value| PartialDate::parse(&value))
            .or(track.original_date)
            .map(|date| date.year());

        track.copyright = first_value(reader, &[TagKind::Copyright]).unwrap_or_default();
        track.copyright_url = first_value(reader, &[TagKind::CopyrightUrl]).unwrap_or_default();
        track.advisory = first_value(reader, &[TagKind::Advisory]).and_then(|value| parse_advisory(&value));
        track.comments = reader.values_for(TagKind::Comment);
        track.replay_gain =
            first_value(reader, &[TagKind::ReplayGainTrackGain]).and_then(|value| parse_gain(&value));

        reader.visit_lyrics(&mut |language, text| {
            let mut lyrics = parse_lyrics_str(text);
            if lyrics.language.is_empty() {
                lyrics.language = language.to_string();
            }
            if !lyrics.is_empty() {
                track.lyrics.push(lyrics);
            }
        });

        track
    }

    fn parse_medium(&self, reader: &dyn TagReader) -> Option<ParsedMedium> {
        let track_number = first_value(reader, &[TagKind::TrackNumber]).map(|value| number_pair(&value));
        let disc_number = first_value(reader, &[TagKind::DiscNumber]).map(|value| number_pair(&value));

        let medium = ParsedMedium {
            media: first_value(reader, &[TagKind::Media]).unwrap_or_default(),
            name: first_value(reader, &[TagKind::DiscSubtitle]).unwrap_or_default(),
            position: disc_number.and_then(|(position, _)| position),
            track_count: first_value(reader, &[TagKind::TotalTracks])
                .and_then(|value| parse_u32(&value))
                .or_else(|| track_number.and_then(|(_, total)| total)),
            replay_gain: first_value(reader, &[TagKind::ReplayGainAlbumGain])
                .and_then(|value| parse_gain(&value)),
            release: self.parse_release(reader, disc_number.and_then(|(_, total)| total)),
        };

        if medium == ParsedMedium::default() {
            None
        } else {
            Some(medium)
        }
    }

    fn parse_release(&self, reader: &dyn TagReader, disc_total: Option<u32>) -> Option<ParsedRelease> {
        let name = first_value(reader, &[TagKind::Album])?;
        let artists = self.parse_artists(
            reader,
            &[TagKind::AlbumArtists, TagKind::AlbumArtist],
            &[TagKind::AlbumArtistsSortOrder, TagKind::AlbumArtistSortOrder],
            &[TagKind::MusicBrainzReleaseArtistId],
        );
        let artist_display_name = self.display_name(reader, &artists, TagKind::AlbumArtist);

        Some(ParsedRelease {
            sort_name: first_value(reader, &[TagKind::AlbumSortOrder]).unwrap_or_else(|| name.clone()),
            name,
            mbid: first_mbid(reader, TagKind::MusicBrainzReleaseId),
            group_mbid: first_mbid(reader, TagKind::MusicBrainzReleaseGroupId),
            artists,
            artist_display_name,
            medium_count: first_value(reader, &[TagKind::TotalDiscs])
                .and_then(|value| parse_u32(&value))
                .or(disc_total),
            is_compilation: first_value(reader, &[TagKind::Compilation])
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            barcode: first_value(reader, &[TagKind::Barcode]).unwrap_or_default(),
            comment: first_value(reader, &[TagKind::ReleaseComment]).unwrap_or_default(),
            labels: self.default_values(reader, &[TagKind::RecordLabel]),
            countries: self.default_values(reader, &[TagKind::ReleaseCountry]),
            release_types: self.default_values(reader, &[TagKind::ReleaseType]),
        })
    }

    fn parse_artists(
        &self,
        reader: &dyn TagReader,
        name_kinds: &[TagKind],
        sort_kinds: &[TagKind],
        mbid_kinds: &[TagKind],
    ) -> Vec<ParsedArtist> {
        let names = self.artist_values(reader, name_kinds);
        if names.is_empty() {
            return Vec::new();
        }
        // Sort names and MBIDs only pair up positionally when the counts agree.
        let mut sort_names = self.artist_values(reader, sort_kinds);
        if sort_names.len() != names.len() {
            sort_names.clear();
        }
        let mut mbids: Vec<Option<Uuid>> = self
            .default_values(reader, mbid_kinds)
            .iter()
            .map(|value| parse_mbid(value))
            .collect();
        if mbids.len() != names.len() {
            mbids.clear();
        }

        names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| ParsedArtist {
                name,
                sort_name: sort_names.get(idx).cloned(),
                mbid: mbids.get(idx).copied().flatten(),
            })
            .collect()
    }

    fn parse_performers(&self, reader: &dyn TagReader) -> BTreeMap<String, Vec<ParsedArtist>> {
        let mut performers: BTreeMap<String, Vec<ParsedArtist>> = BTreeMap::new();
        let settings = &self.settings;
        reader.visit_performers(&mut |role, name| {
            let (role, name) = if role.trim().is_empty() {
                split_performer(name)
            } else {
                (role.trim().to_string(), name.trim().to_string())
            };
            let names = split_tag_value(&name, &settings.artist_delimiters, &settings.artist_whitelist);
            if names.is_empty() {
                return;
            }
            let entry = performers.entry(capitalize(&role)).or_default();
            for name in names {
                entry.push(ParsedArtist::new(name));
            }
        });
        performers
    }

    fn display_name(&self, reader: &dyn TagReader, artists: &[ParsedArtist], singular: TagKind) -> String {
        let values = reader.values_for(singular);
        compute_artist_display_name(
            artists,
            values.first().map(String::as_str),
            &self.settings.artist_delimiters,
        )
    }

    fn artist_values(&self, reader: &dyn TagReader, kinds: &[TagKind]) -> Vec<String> {
        tag_values(
            reader,
            kinds,
            &self.settings.artist_delimiters,
            &self.settings.artist_whitelist,
        )
    }

    fn default_values(&self, reader: &dyn TagReader, kinds: &[TagKind]) -> Vec<String> {
        tag_values(reader, kinds, &self.settings.default_delimiters, &[])
    }
}

/// One artist keeps its own name. Several artists keep the singular tag text
/// when it holds every name in order and no delimiter, otherwise the names
/// are joined with `", "`.
pub fn compute_artist_display_name(
    artists: &[ParsedArtist],
    singular_tag: Option<&str>,
    delimiters: &[String],
) -> String {
    match artists {
        [] => String::new(),
        [artist] => artist.name.clone(),
        _ => {
            if let Some(tag) = singular_tag.map(str::trim).filter(|tag| !tag.is_empty()) {
                if contains_names_in_order(tag, artists, delimiters) {
                    return tag.to_string();
                }
            }
            artists
                .iter()
                .map(|artist| artist.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

fn contains_names_in_order(tag: &str, artists: &[ParsedArtist], delimiters: &[String]) -> bool {
    if delimiters
        .iter()
        .any(|delimiter| !delimiter.is_empty() && tag.contains(delimiter.as_str()))
    {
        return false;
    }
    let mut offset = 0;
    for artist in artists {
        match tag[offset..].find(artist.name.as_str()) {
            Some(pos) => offset += pos + artist.name.len(),
            None => return false,
        }
    }
    true
}

fn tag_values(
    reader: &dyn TagReader,
    kinds: &[TagKind],
    delimiters: &[String],
    whitelist: &[String],
) -> Vec<String> {
    for kind in kinds {
        let mut out = Vec::new();
        for value in reader.values_for(*kind) {
            out.extend(split_tag_value(&value, delimiters, whitelist));
        }
        if !out.is_empty() {
            return out;
        }
    }
    Vec::new()
}

fn first_value(reader: &dyn TagReader, kinds: &[TagKind]) -> Option<String> {
    for kind in kinds {
        let value = reader
            .values_for(*kind)
            .into_iter()
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        if value.is_some() {
            return value;
        }
    }
    None
}

fn first_mbid(reader: &dyn TagReader, kind: TagKind) -> Option<Uuid> {
    first_value(reader, &[kind]).and_then(|value| parse_mbid(&value))
}

fn parse_mbid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

fn parse_u32(text: &str) -> Option<u32> {
    text.trim().parse().ok()
}

/// Splits `"N/total"`; a bare number has no total.
fn number_pair(text: &str) -> (Option<u32>, Option<u32>) {
    match text.split_once('/') {
        Some((position, total)) => (parse_u32(position), parse_u32(total)),
        None => (parse_u32(text), None),
    }
}

fn parse_gain(text: &str) -> Option<f32> {
    let number = text.split_whitespace().next()?;
    let number = number.trim_end_matches("dB").trim_end_matches("db");
    number.parse().ok()
}

fn parse_advisory(text: &str) -> Option<Advisory> {
    match text.trim() {
        "1" | "4" => Some(Advisory::Explicit),
        "2" => Some(Advisory::Clean),
        "0" => Some(Advisory::Unknown),
        _ => None,
    }
}

/// `"Name (role)"` into `(role, name)`.
fn split_performer(value: &str) -> (String, String) {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            let name = stripped[..open].trim();
            let role = stripped[open + 1..].trim();
            if !name.is_empty() {
                return (role.to_string(), name.to_string());
            }
        }
    }
    (String::new(), value.to_string())
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
