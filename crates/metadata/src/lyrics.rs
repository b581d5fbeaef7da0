use std::io::BufRead;

use common::Lyrics;
use once_cell::sync::Lazy;
use regex::Regex;

static ID_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([a-zA-Z_]+):(.+?)\]").expect("valid id tag regex"));
static TIME_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:(\d{1,2}):)?(\d{1,2}):(\d{1,2})(?:\.(\d{1,3}))?\]").expect("valid time tag regex")
});

const UTF8_BOM: &str = "\u{feff}";

#[derive(PartialEq)]
enum State {
    None,
    Synchronized,
    Unsynchronized,
}

pub fn parse_lyrics_str(text: &str) -> Lyrics {
    parse_lines(text.lines().map(|line| line.to_string()))
}

pub fn parse_lyrics<R: BufRead>(reader: R) -> std::io::Result<Lyrics> {
    let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
    Ok(parse_lines(lines.into_iter()))
}

fn parse_lines(lines: impl Iterator<Item = String>) -> Lyrics {
    let mut lyrics = Lyrics::default();
    let mut state = State::None;
    let mut last_timestamps: Vec<u64> = Vec::new();
    let mut accumulated = String::new();

    for line in lines {
        let mut line = line.trim_end();
        if let Some(stripped) = line.strip_prefix(UTF8_BOM) {
            line = stripped;
        }
        if line.starts_with('#') {
            continue;
        }
        if state == State::None && line.trim().is_empty() {
            continue;
        }
        if parse_id_tag(line, &mut lyrics) {
            continue;
        }

        let timestamps = extract_timestamps(line);
        if !timestamps.is_empty() {
            if state == State::Unsynchronized {
                lyrics.unsynchronized_lines.clear();
            }
            state = State::Synchronized;

            flush_accumulated(&mut lyrics, &last_timestamps, &mut accumulated, false);
            let text = match line.rfind(']') {
                Some(idx) => &line[idx + 1..],
                None => line,
            };
            for timestamp in &timestamps {
                lyrics
                    .synchronized_lines
                    .entry(*timestamp)
                    .or_insert_with(|| text.to_string());
            }
            last_timestamps = timestamps;
        } else if !last_timestamps.is_empty() {
            accumulated.push('\n');
            accumulated.push_str(line);
        } else {
            state = State::Unsynchronized;
            lyrics.unsynchronized_lines.push(line.to_string());
        }
    }

    match state {
        State::Synchronized => {
            flush_accumulated(&mut lyrics, &last_timestamps, &mut accumulated, true)
        }
        State::Unsynchronized => {
            while lyrics
                .unsynchronized_lines
                .last()
                .map(|line| line.trim().is_empty())
                .unwrap_or(false)
            {
                lyrics.unsynchronized_lines.pop();
            }
        }
        State::None => {}
    }

    lyrics
}

fn flush_accumulated(
    lyrics: &mut Lyrics,
    timestamps: &[u64],
    accumulated: &mut String,
    trim_trailing: bool,
) {
    if timestamps.is_empty() {
        return;
    }
    if trim_trailing {
        let len = accumulated.trim_end_matches(|c: char| c.is_whitespace()).len();
        accumulated.truncate(len);
    }
    if accumulated.is_empty() {
        return;
    }
    for timestamp in timestamps {
        if let Some(line) = lyrics.synchronized_lines.get_mut(timestamp) {
            line.push_str(accumulated);
        }
    }
    accumulated.clear();
}

fn parse_id_tag(line: &str, lyrics: &mut Lyrics) -> bool {
    let captures = match ID_TAG.captures(line) {
        Some(captures) => captures,
        None => return false,
    };
    let value = captures[2].trim().to_string();
    match &captures[1] {
        "ar" => lyrics.display_artist = value,
        "al" => lyrics.display_album = value,
        "ti" => lyrics.display_title = value,
        "la" => lyrics.language = value,
        "offset" => {
            if let Ok(offset) = value.parse::<i64>() {
                lyrics.offset_ms = offset;
            }
        }
        _ => {}
    }
    true
}

fn extract_timestamps(line: &str) -> Vec<u64> {
    let mut out = Vec::new();
    for captures in TIME_TAG.captures_iter(line) {
        let number = |idx: usize| -> u64 {
            captures
                .get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        let mut timestamp = (number(1) * 3600 + number(2) * 60 + number(3)) * 1000;
        match captures.get(4) {
            Some(fraction) if fraction.as_str().len() == 2 => timestamp += number(4) * 10,
            Some(fraction) if fraction.as_str().len() == 1 => timestamp += number(4) * 100,
            Some(_) => timestamp += number(4),
            None => {}
        }
        out.push(timestamp);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::parse_lyrics_str;

    #[test]
    fn reads_header_tags_and_synchronized_lines() {
        let lyrics = parse_lyrics_str(
            "[id: dqsxdkbu]\n[ar: Lady Gaga]\n[al: Mayhem]\n[ti: Die With A Smile]\n[la: eng]\n[offset: -34]\n[00:03.30]Ooh, ooh\n[00:06.75]\n[00:09.16]I, I just woke up from a dream",
        );
        assert_eq!(lyrics.display_artist, "Lady Gaga");
        assert_eq!(lyrics.display_album, "Mayhem");
        assert_eq!(lyrics.display_title, "Die With A Smile");
        assert_eq!(lyrics.language, "eng");
        assert_eq!(lyrics.offset_ms, -34);
        assert!(lyrics.unsynchronized_lines.is_empty());
        assert_eq!(lyrics.synchronized_lines.len(), 3);
        assert_eq!(lyrics.synchronized_lines[&3300], "Ooh, ooh");
        assert_eq!(lyrics.synchronized_lines[&6750], "");
        assert_eq!(lyrics.synchronized_lines[&9160], "I, I just woke up from a dream");
    }

    #[test]
    fn timestamp_formats() {
        let lyrics = parse_lyrics_str(
            "[00:03.30]a\n[00:01.301]b\n[0:02.301]c\n[61:01.30]d\n[02:01:01.30]e\n[00:04]f",
        );
        let keys: Vec<u64> = lyrics.synchronized_lines.keys().copied().collect();
        assert_eq!(
            keys,
            vec![1301, 2301, 3300, 4000, 3_661_300, 7_261_300]
        );
    }

    #[test]
    fn untimed_lines_extend_previous_line_and_trailing_blanks_drop() {
        let lyrics = parse_lyrics_str(
            "[00:03.30][00:09.16]Ooh, ooh\nSecond line\n Third line\n\n[00:06.75]Foo\n \n",
        );
        assert_eq!(lyrics.synchronized_lines[&3300], "Ooh, ooh\nSecond line\n Third line\n");
        assert_eq!(lyrics.synchronized_lines[&9160], "Ooh, ooh\nSecond line\n Third line\n");
        assert_eq!(lyrics.synchronized_lines[&6750], "Foo");
    }

    #[test]
    fn leading_unsynchronized_lines_are_discarded() {
        let lyrics = parse_lyrics_str("\nSome plain words\n# comment\n[00:03.30]Ooh, ooh");
        assert!(lyrics.unsynchronized_lines.is_empty());
        assert_eq!(lyrics.synchronized_lines.len(), 1);
    }

    #[test]
    fn plain_text_stays_unsynchronized() {
        let lyrics = parse_lyrics_str("\u{feff}\n\nFirst line\n\nSecond line\n\n");
        assert!(!lyrics.is_synchronized());
        assert_eq!(lyrics.unsynchronized_lines, vec!["First line", "", "Second line"]);
    }
}
