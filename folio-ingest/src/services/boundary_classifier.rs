//! Section header recognition
//!
//! Two phases:
//! 1. [`is_header_candidate`] cheaply rejects dialogue, narration and
//!    over-long lines using only punctuation and the number of blank lines
//!    before the line.
//! 2. [`validate_header`] checks the line against a closed set of marker
//!    vocabularies (numbered headings, "Chapter"/"Part"/... + number,
//!    standalone titles such as "Prologue", CJK and Korean ordinal forms).
//!
//! A "strong" marker (ordinal marker word + number, at most 40 characters)
//! relaxes the punctuation and blank-line rules but never the quote rule.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest line, in characters, that can be a header
pub const MAX_TITLE_CHARS: usize = 100;

/// Longest line, in characters, that counts as a strong marker
pub const MAX_STRONG_MARKER_CHARS: usize = 40;

/// Subtitles must be strictly shorter than this, in characters
pub const MAX_SUBTITLE_CHARS: usize = 50;

/// Blank lines required before an ordinary header candidate
pub const REQUIRED_BLANK_LINES: usize = 2;

/// Blank lines required before a strong marker
pub const REQUIRED_BLANK_LINES_STRONG: usize = 1;

const QUOTE_CHARS: &[char] = &['"', '“', '”', '„', '«', '»', '「', '」', '『', '』'];

const NUMBER_WORDS: &str = "one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|\
thirteen|fourteen|fifteen|sixteen|seventeen|eighteen|nineteen|twenty|thirty|forty|fifty|\
sixty|seventy|eighty|ninety|hundred|first|second|third|fourth|fifth|sixth|seventh|eighth|\
ninth|tenth|last|final";

// Roman numerals are uppercase only, so "Book did" stays prose
static MARKER_WITH_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?i:chapter|part|book|volume|section)\s+(?:\d+|[IVXLCDM]+|(?i:(?:{words})(?:-(?:{words}))?))(?:$|[\s.:\-–—)])",
        words = NUMBER_WORDS
    ))
    .expect("marker pattern is valid")
});

static CJK_ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^第\s*[0-9０-９一二三四五六七八九十百千零〇两兩]+\s*[章部卷篇节節回话話集]")
        .expect("CJK ordinal pattern is valid")
});

static KOREAN_ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^제\s*[0-9]+\s*[장부권편화]").expect("Korean ordinal pattern is valid")
});

static NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9]+|[IVXLCDM]+)(?:\.|\s|[장章화부편권節节回])")
        .expect("numbered heading pattern is valid")
});

static STANDALONE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:prologue|epilogue|foreword|프롤로그|에필로그|序章|終章|终章)(?:$|[\s.:\-–—])")
        .expect("standalone title pattern is valid")
});

/// Line contains a quotation mark of any script
pub fn contains_quote(line: &str) -> bool {
    line.contains(QUOTE_CHARS)
}

fn contains_ellipsis(line: &str) -> bool {
    line.contains("...") || line.contains('…')
}

fn contains_exclamation_or_question(line: &str) -> bool {
    line.contains(['?', '!', '？', '！'])
}

/// Ordinal marker confident enough to relax surrounding heuristics
///
/// "Chapter 3", "Part IV", "第十二章", "제3장"; at most 40 characters.
pub fn is_strong_marker(line: &str) -> bool {
    let line = line.trim();
    if line.chars().count() > MAX_STRONG_MARKER_CHARS {
        return false;
    }
    MARKER_WITH_NUMBER.is_match(line) || CJK_ORDINAL.is_match(line) || KOREAN_ORDINAL.is_match(line)
}

/// Phase 1: can this line be a header at all, given its context?
///
/// `preceding_blank_lines` counts consecutive blank lines directly above the
/// line. The first content line of a document needs none.
pub fn is_header_candidate(
    line: &str,
    preceding_blank_lines: usize,
    is_first_content_line: bool,
) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_TITLE_CHARS {
        return false;
    }

    // Quotes mark dialogue even after a strong marker
    if contains_quote(line) {
        return false;
    }

    let strong = is_strong_marker(line);

    if !strong {
        if contains_ellipsis(line) || contains_exclamation_or_question(line) {
            return false;
        }

        let ends_with_period = line.ends_with('.') || line.ends_with('。');
        let starts_with_digit = line.starts_with(|c: char| c.is_ascii_digit());
        if ends_with_period && !starts_with_digit {
            return false;
        }
    }

    if is_first_content_line {
        return true;
    }

    let required = if strong {
        REQUIRED_BLANK_LINES_STRONG
    } else {
        REQUIRED_BLANK_LINES
    };
    preceding_blank_lines >= required
}

/// Phase 2: does the line match a known header grammar?
pub fn validate_header(line: &str) -> bool {
    let line = line.trim();
    NUMBERED_HEADING.is_match(line)
        || MARKER_WITH_NUMBER.is_match(line)
        || STANDALONE_TITLE.is_match(line)
        || CJK_ORDINAL.is_match(line)
        || KOREAN_ORDINAL.is_match(line)
}

/// Both phases
pub fn is_header(line: &str, preceding_blank_lines: usize, is_first_content_line: bool) -> bool {
    is_header_candidate(line, preceding_blank_lines, is_first_content_line) && validate_header(line)
}

/// Line made only of 3+ repetitions of one of `*`, `-`, `=`
///
/// Whitespace between the characters is ignored, so `* * *` is a divider.
pub fn is_section_divider(line: &str) -> bool {
    let mut chars = line.chars().filter(|c| !c.is_whitespace());
    let first = match chars.next() {
        Some(c @ ('*' | '-' | '=')) => c,
        _ => return false,
    };

    let mut count = 1;
    for c in chars {
        if c != first {
            return false;
        }
        count += 1;
    }
    count >= 3
}

/// Return the trimmed next line if a header may absorb it as a subtitle
pub fn subtitle_candidate(next_line: &str) -> Option<&str> {
    let next = next_line.trim();
    if next.is_empty()
        || next.chars().count() >= MAX_SUBTITLE_CHARS
        || contains_quote(next)
        || next.ends_with('.')
        || is_section_divider(next)
    {
        return None;
    }
    Some(next)
}

/// "Chapter 1" + "The Storm" → "Chapter 1: The Storm"
///
/// Headers already ending in a separator ("Chapter 1:", "Part II -") are
/// joined with a single space.
pub fn merge_subtitle(header: &str, subtitle: &str) -> String {
    let header = header.trim_end();
    if header.ends_with([':', '-', '–', '—', '.']) {
        format!("{} {}", header, subtitle)
    } else {
        format!("{}: {}", header, subtitle)
    }
}
