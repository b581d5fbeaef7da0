use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use uuid::Uuid;

use crate::MetadataError;

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([A-Za-z][\w.-]*)(\s[^>]*)?>").expect("valid open tag regex")
});
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[A-Za-z]+);").expect("valid entity regex")
});

const CDATA_START: &str = "<![CDATA[";
const CDATA_END: &str = "]]>";

/// Artist description read from an `artist.nfo` file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedArtistInfo {
    pub name: String,
    pub sort_name: String,
    pub mbid: Option<Uuid>,
    pub artist_type: String,
    pub gender: String,
    pub disambiguation: String,
    pub biography: String,
}

/// Reads the direct children of the `<artist>` element. Nested elements such
/// as `<album>` are skipped whole; element names compare without case.
pub fn parse_artist_info(text: &str) -> Result<ParsedArtistInfo, MetadataError> {
    let body = artist_body(text)
        .ok_or_else(|| MetadataError::Malformed("no <artist> element".to_string()))?;

    let mut info = ParsedArtistInfo::default();
    let mut pos = 0;
    while let Some(caps) = OPEN_TAG.captures_at(body, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let self_closing = caps
            .get(2)
            .map(|attrs| attrs.as_str().trim_end().ends_with('/'))
            .unwrap_or(false);
        if self_closing {
            pos = whole.end();
            continue;
        }
        let close = format!("</{}>", name.as_str());
        let Some(len) = body[whole.end()..].find(&close) else {
            pos = whole.end();
            continue;
        };
        let content = &body[whole.end()..whole.end() + len];
        pos = whole.end() + len + close.len();

        let value = || decode_text(content);
        match name.as_str().to_ascii_lowercase().as_str() {
            "name" => info.name = value(),
            "sortname" => info.sort_name = value(),
            "musicbrainzartistid" => info.mbid = Uuid::parse_str(&value()).ok(),
            "type" => info.artist_type = value(),
            "gender" => info.gender = value(),
            "disambiguation" => info.disambiguation = value(),
            "biography" => info.biography = value(),
            _ => {}
        }
    }

    if info.name.is_empty() {
        return Err(MetadataError::Malformed("artist has no name".to_string()));
    }
    Ok(info)
}

fn artist_body(text: &str) -> Option<&str> {
    let mut pos = 0;
    while let Some(caps) = OPEN_TAG.captures_at(text, pos) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?;
        if name.as_str().eq_ignore_ascii_case("artist") {
            let rest = &text[whole.end()..];
            let end = rest.to_ascii_lowercase().rfind("</artist>")?;
            return Some(&rest[..end]);
        }
        pos = whole.end();
    }
    None
}

fn decode_text(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(inner) = raw
        .strip_prefix(CDATA_START)
        .and_then(|rest| rest.strip_suffix(CDATA_END))
    {
        return inner.trim().to_string();
    }
    ENTITY
        .replace_all(raw, |caps: &Captures| decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string()))
        .trim()
        .to_string()
}

fn decode_entity(entity: &str) -> Option<String> {
    let ch = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => entity.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some(ch.to_string())
}
