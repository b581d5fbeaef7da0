use std::path::Path;

use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;

use crate::{AudioProperties, MetadataError, TagKind, TagReader};

enum Source {
    Key(ItemKey),
    Raw(&'static str),
}

/// Tag reader over whatever container lofty detects from the file content.
pub struct LoftyTagReader {
    properties: AudioProperties,
    tag: Option<Tag>,
    has_image: bool,
}

pub fn open_tag_reader(path: &Path) -> Result<Box<dyn TagReader>, MetadataError> {
    Ok(Box::new(LoftyTagReader::open(path)?))
}

impl LoftyTagReader {
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
        let properties = tagged_file.properties();

        let duration_ms = properties.duration().as_millis().min(u128::from(u64::MAX)) as u64;
        let audio = AudioProperties {
            bitrate: properties
                .audio_bitrate()
                .or(properties.overall_bitrate())
                .unwrap_or(0),
            bits_per_sample: properties.bit_depth().map(u32::from).unwrap_or(0),
            channel_count: properties.channels().map(u32::from).unwrap_or(0),
            duration_ms,
            sample_rate: properties.sample_rate().unwrap_or(0),
        };

        let has_image = tagged_file
            .tags()
            .iter()
            .any(|tag| !tag.pictures().is_empty());
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .cloned();

        Ok(Self {
            properties: audio,
            tag,
            has_image,
        })
    }

    fn collect(&self, source: &Source) -> Vec<String> {
        let tag = match &self.tag {
            Some(tag) => tag,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for item in tag.items() {
            let matches = match (source, item.key()) {
                (Source::Raw(name), ItemKey::Unknown(key)) => key.eq_ignore_ascii_case(name),
                (Source::Raw(_), _) => false,
                (Source::Key(wanted), key) => key == wanted,
            };
            if !matches {
                continue;
            }
            if let Some(text) = item.value().text() {
                push_values(&mut out, text);
            }
        }
        out
    }
}

impl TagReader for LoftyTagReader {
    fn audio_properties(&self) -> AudioProperties {
        self.properties
    }

    fn values_for(&self, kind: TagKind) -> Vec<String> {
        for source in sources(kind) {
            let values = self.collect(&source);
            if !values.is_empty() {
                return values;
            }
        }
        Vec::new()
    }

    fn values_for_raw(&self, name: &str) -> Vec<String> {
        let tag = match &self.tag {
            Some(tag) => tag,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for item in tag.items() {
            if let ItemKey::Unknown(key) = item.key() {
                if key.eq_ignore_ascii_case(name) {
                    if let Some(text) = item.value().text() {
                        push_values(&mut out, text);
                    }
                }
            }
        }
        out
    }

    fn visit_performers(&self, visitor: &mut dyn FnMut(&str, &str)) {
        for name in self.collect(&Source::Key(ItemKey::Performer)) {
            visitor("", &name);
        }
    }

    fn visit_lyrics(&self, visitor: &mut dyn FnMut(&str, &str)) {
        let tag = match &self.tag {
            Some(tag) => tag,
            None => return,
        };
        for item in tag.items() {
            if item.key() != &ItemKey::Lyrics {
                continue;
            }
            if let Some(text) = item.value().text() {
                let lang = String::from_utf8_lossy(&item.lang()[..]).to_string();
                let lang = if lang.eq_ignore_ascii_case("xxx") {
                    String::new()
                } else {
                    lang.trim_matches(char::from(0)).to_string()
                };
                visitor(&lang, text);
            }
        }
    }

    fn has_embedded_image(&self) -> bool {
        self.has_image
    }
}

// ID3v2 multi-value frames arrive NUL separated.
fn push_values(out: &mut Vec<String>, text: &str) {
    for part in text.split('\0') {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
}

fn sources(kind: TagKind) -> Vec<Source> {
    use Source::{Key, Raw};

    match kind {
        TagKind::Title => vec![Key(ItemKey::TrackTitle)],
        TagKind::Artist => vec![Key(ItemKey::TrackArtist)],
        TagKind::Artists => vec![Raw("ARTISTS")],
        TagKind::ArtistSortOrder => vec![Key(ItemKey::TrackArtistSortOrder)],
        TagKind::ArtistsSortOrder => vec![Raw("ARTISTSSORT"), Raw("ARTISTS_SORT")],
        TagKind::MusicBrainzArtistId => vec![Key(ItemKey::MusicBrainzArtistId)],
        TagKind::Album => vec![Key(ItemKey::AlbumTitle)],
        TagKind::AlbumSortOrder => vec![Key(ItemKey::AlbumTitleSortOrder)],
        TagKind::AlbumArtist => vec![Key(ItemKey::AlbumArtist)],
        TagKind::AlbumArtists => vec![Raw("ALBUMARTISTS")],
        TagKind::AlbumArtistSortOrder => vec![Key(ItemKey::AlbumArtistSortOrder)],
        TagKind::AlbumArtistsSortOrder => vec![Raw("ALBUMARTISTSSORT"), Raw("ALBUMARTISTS_SORT")],
        TagKind::MusicBrainzReleaseArtistId => vec![Key(ItemKey::MusicBrainzReleaseArtistId)],
        TagKind::MusicBrainzReleaseId => vec![Key(ItemKey::MusicBrainzReleaseId)],
        TagKind::MusicBrainzReleaseGroupId => vec![Key(ItemKey::MusicBrainzReleaseGroupId)],
        TagKind::MusicBrainzTrackId => vec![Key(ItemKey::MusicBrainzTrackId)],
        TagKind::MusicBrainzRecordingId => vec![Key(ItemKey::MusicBrainzRecordingId)],
        TagKind::TrackNumber => vec![Key(ItemKey::TrackNumber)],
        TagKind::TotalTracks => vec![Key(ItemKey::TrackTotal), Raw("TOTALTRACKS")],
        TagKind::DiscNumber => vec![Key(ItemKey::DiscNumber)],
        TagKind::TotalDiscs => vec![Key(ItemKey::DiscTotal), Raw("TOTALDISCS")],
        TagKind::DiscSubtitle => vec![Key(ItemKey::SetSubtitle)],
        TagKind::Media => vec![Key(ItemKey::OriginalMediaType), Raw("MEDIA")],
        TagKind::Date => vec![Key(ItemKey::RecordingDate), Raw("DATE")],
        TagKind::Year => vec![Key(ItemKey::Year)],
        TagKind::OriginalReleaseDate => vec![Key(ItemKey::OriginalReleaseDate), Raw("ORIGINALDATE")],
        TagKind::OriginalReleaseYear => vec![Raw("ORIGINALYEAR")],
        TagKind::Genre => vec![Key(ItemKey::Genre)],
        TagKind::Mood => vec![Key(ItemKey::Mood)],
        TagKind::Language => vec![Key(ItemKey::Language)],
        TagKind::Grouping => vec![Key(ItemKey::ContentGroup), Raw("GROUPING")],
        TagKind::Composer => vec![Key(ItemKey::Composer)],
        TagKind::ComposerSortOrder => vec![Key(ItemKey::ComposerSortOrder)],
        TagKind::Conductor => vec![Key(ItemKey::Conductor)],
        TagKind::Lyricist => vec![Key(ItemKey::Lyricist)],
        TagKind::Mixer => vec![Key(ItemKey::MixEngineer), Raw("MIXER")],
        TagKind::Producer => vec![Key(ItemKey::Producer)],
        TagKind::Remixer => vec![Key(ItemKey::Remixer)],
        TagKind::Comment => vec![Key(ItemKey::Comment)],
        TagKind::Copyright => vec![Key(ItemKey::CopyrightMessage), Raw("COPYRIGHT")],
        TagKind::CopyrightUrl => vec![Key(ItemKey::CopyrightUrl)],
        TagKind::Compilation => vec![Key(ItemKey::FlagCompilation), Raw("COMPILATION")],
        TagKind::Barcode => vec![Key(ItemKey::Barcode)],
        TagKind::RecordLabel => vec![Key(ItemKey::Label)],
        TagKind::ReleaseCountry => vec![
            Raw("RELEASECOUNTRY"),
            Raw("MusicBrainz Album Release Country"),
        ],
        TagKind::ReleaseType => vec![Raw("RELEASETYPE"), Raw("MusicBrainz Album Type")],
        TagKind::ReleaseComment => vec![Raw("RELEASECOMMENT"), Raw("MusicBrainz Album Comment")],
        TagKind::Advisory => vec![Key(ItemKey::ParentalAdvisory), Raw("ITUNESADVISORY")],
        TagKind::ReplayGainTrackGain => vec![Key(ItemKey::ReplayGainTrackGain)],
        TagKind::ReplayGainAlbumGain => vec![Key(ItemKey::ReplayGainAlbumGain)],
    }
}
