use std::io::BufRead;

const UTF8_BOM: &str = "\u{feff}";
const NAME_DIRECTIVE: &str = "#PLAYLIST:";

/// Contents of an M3U playlist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedPlayList {
    /// Empty unless the file carries a `#PLAYLIST:` line.
    pub name: String,
    /// Entries in file order, as written. Backslashes become slashes.
    pub files: Vec<String>,
}

pub fn parse_playlist<R: BufRead>(reader: R) -> std::io::Result<ParsedPlayList> {
    let mut playlist = ParsedPlayList::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let mut line = line.as_str();
        if idx == 0 {
            line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
        }
        read_line(&mut playlist, line);
    }
    Ok(playlist)
}

pub fn parse_playlist_str(text: &str) -> ParsedPlayList {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut playlist = ParsedPlayList::default();
    for line in text.lines() {
        read_line(&mut playlist, line);
    }
    playlist
}

fn read_line(playlist: &mut ParsedPlayList, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if let Some(name) = line.strip_prefix(NAME_DIRECTIVE) {
        playlist.name = name.trim().to_string();
        return;
    }
    if line.starts_with('#') {
        return;
    }
    playlist.files.push(line.replace('\\', "/"));
}
