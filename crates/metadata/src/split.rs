/// Splits a raw tag value into its individual entries.
///
/// When none of `delimiters` occurs in `value` the trimmed value is returned
/// as a single entry. Otherwise each `whitelist` entry found verbatim is
/// swapped for a placeholder (first occurrence only, in the given order), the
/// value is cut at every delimiter occurrence, and the placeholders are put
/// back. Entries are trimmed and empty ones dropped.
pub fn split_tag_value(value: &str, delimiters: &[String], whitelist: &[String]) -> Vec<String> {
    let delimiters: Vec<&str> = delimiters
        .iter()
        .map(|d| d.as_str())
        .filter(|d| !d.is_empty())
        .collect();

    if !delimiters.iter().any(|d| value.contains(d)) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }

    let mut work = value.to_string();
    let mut protected: Vec<(String, &str)> = Vec::new();
    for entry in whitelist {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(pos) = work.find(entry) {
            let token = placeholder(protected.len());
            work.replace_range(pos..pos + entry.len(), &token);
            protected.push((token, entry));
        }
    }

    let mut out = Vec::new();
    for part in cut_at_delimiters(&work, &delimiters) {
        let mut restored = part.to_string();
        for (token, entry) in &protected {
            if restored.contains(token.as_str()) {
                restored = restored.replace(token.as_str(), entry);
            }
        }
        let trimmed = restored.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

// Private-use code points never show up in real tags or delimiters.
fn placeholder(index: usize) -> String {
    format!("\u{E000}{}\u{E001}", index)
}

fn cut_at_delimiters<'a>(value: &'a str, delimiters: &[&str]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut idx = 0;
    while idx < value.len() {
        let rest = &value[idx..];
        match delimiters.iter().find(|d| rest.starts_with(**d)) {
            Some(delimiter) => {
                parts.push(&value[start..idx]);
                idx += delimiter.len();
                start = idx;
            }
            None => {
                idx += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
    }
    parts.push(&value[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::split_tag_value;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn whitelist_protects_delimiter_inside_name() {
        let out = split_tag_value(
            "AC/DC; MyArtist",
            &strings(&[";", "/"]),
            &strings(&["AC/DC"]),
        );
        assert_eq!(out, strings(&["AC/DC", "MyArtist"]));
    }

    #[test]
    fn no_delimiter_keeps_single_trimmed_value() {
        let out = split_tag_value("  Artist1 & (CV. Artist2) ", &strings(&[";"]), &[]);
        assert_eq!(out, strings(&["Artist1 & (CV. Artist2)"]));
    }

    #[test]
    fn all_delimiters_apply_and_empties_are_dropped() {
        let out = split_tag_value(
            "Genre1 ; Genre2/Genre3;; ",
            &strings(&[" ; ", "/", ";"]),
            &[],
        );
        assert_eq!(out, strings(&["Genre1", "Genre2", "Genre3"]));
    }

    #[test]
    fn partial_whitelist_overlap_is_not_substituted() {
        let out = split_tag_value("AC/D; Other", &strings(&[";", "/"]), &strings(&["AC/DC"]));
        assert_eq!(out, strings(&["AC", "D", "Other"]));
    }

    #[test]
    fn whitelist_order_decides_overlapping_entries() {
        let out = split_tag_value(
            "Simon & Garfunkel & Friends",
            &strings(&[" & "]),
            &strings(&["Simon & Garfunkel", "Garfunkel & Friends"]),
        );
        assert_eq!(out, strings(&["Simon & Garfunkel", "Friends"]));
    }

    #[test]
    fn empty_value_yields_nothing() {
        assert!(split_tag_value("   ", &strings(&[";"]), &[]).is_empty());
        assert!(split_tag_value(" ; ", &strings(&[";"]), &[]).is_empty());
    }
}
