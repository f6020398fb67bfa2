//! Splits extracted document text into ordered fact and activity chunks.
//!
//! Markdown headings open sections. Each section is classified once and then
//! packed into chunks no longer than `max_chars` characters, splitting at
//! paragraph boundaries first, then sentences, then words, and mid-word only
//! when a single word is longer than the limit. Pieces of a split section
//! after the first repeat the trailing words of the piece before them, up to
//! `overlap_chars`, and still fit the limit.

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ChunkDraft, ChunkKind};

const DEFAULT_HEADING: &str = "General";

const ACTIVITY_HINTS: &[&str] = &[
    "activity",
    "activities",
    "experiment",
    "experiments",
    "materials",
    "apparatus",
    "procedure",
    "step",
    "steps",
    "observation",
    "observations",
    "observe",
    "safety",
    "lab",
    "aim",
];

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    /// Clamped to half of `max_chars`.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1100, overlap_chars: 160 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

struct Section {
    heading: String,
    body: String,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn max_chars(&self) -> usize {
        self.config.max_chars
    }

    /// Chunk `text` in source order; ordinals start at 0.
    ///
    /// Fails with [`Error::EmptyDocument`] when nothing but whitespace or bare
    /// headings remains.
    pub fn chunk(&self, text: &str) -> Result<Vec<ChunkDraft>> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(Error::EmptyDocument);
        }

        let mut drafts = Vec::new();
        for section in split_sections(&normalized) {
            let kind = classify(&section.heading, &section.body);
            for piece in split_with_overlap(&section.body, self.config.max_chars, self.config.overlap_chars) {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                drafts.push(ChunkDraft {
                    kind,
                    heading: section.heading.clone(),
                    text: piece.to_string(),
                    ordinal: drafts.len(),
                });
            }
        }
        if drafts.is_empty() {
            return Err(Error::EmptyDocument);
        }
        debug!(chunks = drafts.len(), chars = normalized.chars().count(), "chunked document");
        Ok(drafts)
    }
}

/// Drop carriage returns and collapse runs of blank lines to one.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace('\r', "").lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading = DEFAULT_HEADING.to_string();
    let mut body: Vec<&str> = Vec::new();

    let push = |heading: &str, body: &[&str], sections: &mut Vec<Section>| {
        let joined = body.join("\n");
        let joined = joined.trim();
        if !joined.is_empty() {
            sections.push(Section { heading: heading.to_string(), body: joined.to_string() });
        }
    };

    for line in text.lines() {
        if let Some(h) = heading_text(line) {
            push(&heading, &body, &mut sections);
            heading = if h.is_empty() { DEFAULT_HEADING.to_string() } else { h.to_string() };
            body.clear();
            continue;
        }
        body.push(line);
    }
    push(&heading, &body, &mut sections);
    sections
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn is_step_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("step ")) {
        return true;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && matches!(trimmed[digits..].chars().next(), Some('.' | ')'))
}

/// Deterministic fact/activity decision for one section.
pub fn classify(heading: &str, body: &str) -> ChunkKind {
    if tokens(heading).any(|t| ACTIVITY_HINTS.contains(&t.as_str())) {
        return ChunkKind::Activity;
    }
    let hint_hits = tokens(body).filter(|t| ACTIVITY_HINTS.contains(&t.as_str())).count();
    let step_lines = body.lines().filter(|l| is_step_line(l)).count();
    if hint_hits >= 2 || step_lines >= 2 {
        ChunkKind::Activity
    } else {
        ChunkKind::Fact
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedily join `units` with `sep` while staying within `max`; units that
/// are too long on their own are handed to `split_unit`.
fn pack(units: Vec<String>, sep: &str, max: usize, split_unit: &dyn Fn(&str) -> Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for unit in units {
        let unit_len = char_len(&unit);
        if unit_len > max {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.extend(split_unit(&unit));
            continue;
        }
        let needed = if current.is_empty() { unit_len } else { char_len(&current) + char_len(sep) + unit_len };
        if needed > max {
            out.push(std::mem::replace(&mut current, unit));
        } else {
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(&unit);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_to_limit(body: &str, max: usize) -> Vec<String> {
    if char_len(body) <= max {
        return vec![body.to_string()];
    }
    let paragraphs = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    pack(paragraphs, "\n\n", max, &|p| split_paragraph(p, max))
}

fn split_with_overlap(body: &str, max: usize, overlap: usize) -> Vec<String> {
    let overlap = overlap.min(max / 2);
    if overlap == 0 || char_len(body) <= max {
        return split_to_limit(body, max);
    }
    let pieces = split_to_limit(body, max - overlap);
    let mut out = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let tail = match i.checked_sub(1) {
            Some(prev) => tail_words(&pieces[prev], overlap - 1),
            None => String::new(),
        };
        if tail.is_empty() {
            out.push(piece.clone());
        } else {
            out.push(format!("{tail} {piece}"));
        }
    }
    out
}

/// Longest run of whole trailing words of `text` within `budget` characters.
fn tail_words(text: &str, budget: usize) -> String {
    let mut words: Vec<&str> = Vec::new();
    let mut len = 0usize;
    for w in text.split_whitespace().rev() {
        let add = char_len(w) + usize::from(!words.is_empty());
        if len + add > budget {
            break;
        }
        len += add;
        words.push(w);
    }
    words.reverse();
    words.join(" ")
}

fn split_paragraph(paragraph: &str, max: usize) -> Vec<String> {
    pack(split_sentences(paragraph), " ", max, &|s| split_words(s, max))
}

fn split_words(sentence: &str, max: usize) -> Vec<String> {
    let words = sentence.split_whitespace().map(str::to_string).collect();
    pack(words, " ", max, &|w| split_chars(w, max))
}

fn split_chars(word: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}

/// Split text into trimmed sentences. A sentence ends at `.`, `!` or `?`
/// followed by whitespace and a character that is not lowercase.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && matches!(chars[j], '"' | '\'' | ')') {
                j += 1;
            }
            let next_non_space = chars[j..].iter().position(|c| !c.is_whitespace()).map(|p| j + p);
            let boundary = match next_non_space {
                None => true,
                Some(k) => k > j && !chars[k].is_lowercase(),
            };
            if boundary {
                let sentence: String = chars[start..j].iter().collect();
                let sentence = sentence.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        let tail = tail.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }
    sentences
}
