/// Track number and title recovered from a file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFilename {
    pub track_no: Option<u16>,
    pub title: String,
}

const DISC_WORDS: [&str; 3] = ["disc", "disk", "cd"];

/// Understands `01 - Title`, `track 01 - Title`, `01 Title` and `01. Title`.
/// Anything else becomes the whole stem as the title.
pub fn parse_track_filename(stem: &str) -> TrackFilename {
    let trimmed = stem.trim();
    let without_prefix = strip_prefix_ignore_case(trimmed, "track")
        .map(|rest| rest.trim_start_matches(is_separator))
        .filter(|rest| rest.starts_with(|ch: char| ch.is_ascii_digit()));

    for candidate in without_prefix.into_iter().chain(std::iter::once(trimmed)) {
        if let Some(parsed) = split_numbered(candidate) {
            return parsed;
        }
    }

    TrackFilename {
        track_no: None,
        title: normalize_title(trimmed),
    }
}

fn split_numbered(text: &str) -> Option<TrackFilename> {
    let digits = text.chars().take_while(|ch| ch.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = &text[digits..];
    if !rest.starts_with(is_separator) {
        return None;
    }
    let title = normalize_title(rest.trim_start_matches(is_separator));
    if title.is_empty() {
        return None;
    }
    let track_no = text[..digits].parse::<u16>().ok().filter(|value| *value > 0);
    Some(TrackFilename { track_no, title })
}

fn is_separator(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '-' | '.' | '_')
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

pub fn normalize_title(text: &str) -> String {
    text.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Artist and album guessed from the directories above a file: the parent is
/// the album and its parent the artist. Disc folders are passed over.
pub fn directory_artist_album(relpath: &str) -> (Option<String>, Option<String>) {
    let mut parts: Vec<&str> = relpath.split('/').filter(|part| !part.is_empty()).collect();
    parts.pop();
    let dirs: Vec<&str> = parts
        .into_iter()
        .filter(|dir| !is_disc_folder(dir))
        .collect();

    let mut rev = dirs.iter().rev();
    let album = rev.next().map(|dir| normalize_title(dir)).filter(|v| !v.is_empty());
    let artist = rev.next().map(|dir| normalize_title(dir)).filter(|v| !v.is_empty());
    (artist, album)
}

fn is_disc_folder(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    for word in DISC_WORDS {
        if let Some(rest) = lower.strip_prefix(word) {
            let rest = rest.trim_start_matches(is_separator);
            return !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit());
        }
    }
    false
}

/// Finds a `disc 2`, `Disk-3` or `CD1` marker in one segment of the path.
/// The number has to sit in the same segment as the marker word.
pub fn disc_number_from_relpath(relpath: &str) -> Option<u16> {
    relpath
        .split('/')
        .find_map(|segment| disc_number_in_segment(&segment.to_ascii_lowercase()))
}

fn disc_number_in_segment(segment: &str) -> Option<u16> {
    let mut tokens: Vec<(usize, &str)> = Vec::new();
    let mut start = None;
    for (index, ch) in segment.char_indices() {
        match (ch.is_ascii_alphanumeric(), start) {
            (true, None) => start = Some(index),
            (false, Some(from)) => {
                tokens.push((from, &segment[from..index]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        tokens.push((from, &segment[from..]));
    }

    for (index, (from, token)) in tokens.iter().enumerate() {
        for word in DISC_WORDS {
            let Some(rest) = token.strip_prefix(word) else {
                continue;
            };
            let digits = if rest.is_empty() {
                let Some((next_from, next)) = tokens.get(index + 1) else {
                    continue;
                };
                let gap = &segment[from + token.len()..*next_from];
                if !gap.chars().all(is_separator) {
                    continue;
                }
                *next
            } else {
                rest
            };
            if digits.len() <= 3 && digits.chars().all(|ch| ch.is_ascii_digit()) {
                if let Some(value) = digits.parse::<u16>().ok().filter(|value| *value > 0) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// First standalone four digit run between 1900 and 2099.
pub fn year_from_text(text: &str) -> Option<i32> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<i32>().ok())
        .find(|year| (1900..=2099).contains(year))
}
