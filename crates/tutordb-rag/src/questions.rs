//! Practice questions derived from fact chunks, and the read-side accessor.
//!
//! Generation is deterministic: definitional sentences ("X is Y", "X means
//! Y") become short-answer questions, and once four or more definitions are
//! known each one also gets a multiple-choice question whose distractors are
//! the other definitions. Sentences that state a cause ("X, so Y", "Y
//! because X") become reasoning questions. Headings without a usable
//! definition fall back to a summary prompt.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use tutordb_core::chunker::split_sentences;
use tutordb_core::traits::IndexStore;
use tutordb_core::types::{
    Chunk, ChunkKind, Coordinate, GeneratedQuestion, QuestionAnswer, QuestionKind, QuestionOption,
};
use tutordb_core::Result;

const LABELS: [&str; 4] = ["A", "B", "C", "D"];
const MIN_DEFINITIONS_FOR_MCQ: usize = 4;
const MAX_TERM_WORDS: usize = 6;
const MIN_DEFINITION_WORDS: usize = 3;
const CLAUSE_OPENERS: &[&str] = &[
    "when", "if", "because", "so", "as", "while", "after", "before", "since", "although", "then", "there", "it", "this",
    "that", "here",
];

/// Connector and whether the cause comes before it.
const CAUSAL_LINKS: [(&str, bool); 4] =
    [(", so ", true), (", therefore ", true), (" because ", false), (" since ", false)];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reason {
    cause: String,
    effect: String,
    sentence: String,
    heading: String,
    chunk_id: String,
}

/// Split a causal sentence into `(cause, effect)`; both sides need at least
/// three words.
fn find_reason(sentence: &str) -> Option<(String, String)> {
    let lower = sentence.to_lowercase();
    let (pos, pat, cause_first) = CAUSAL_LINKS
        .iter()
        .filter_map(|(pat, cause_first)| lower.find(pat).map(|p| (p, *pat, *cause_first)))
        .min_by_key(|(p, _, _)| *p)?;
    if !sentence.is_char_boundary(pos) || !sentence.is_char_boundary(pos + pat.len()) {
        return None;
    }
    let before = trim_meaning(&sentence[..pos]);
    let after = trim_meaning(&sentence[pos + pat.len()..]);
    let (cause, effect) = if cause_first { (before, after) } else { (after, before) };
    let words = |s: &str| s.split_whitespace().count();
    if words(&cause) < MIN_DEFINITION_WORDS || words(&effect) < MIN_DEFINITION_WORDS {
        return None;
    }
    Some((cause, effect))
}

fn reasons(chunks: &[Chunk]) -> Vec<Reason> {
    let mut out = Vec::new();
    for chunk in chunks.iter().filter(|c| c.kind == ChunkKind::Fact) {
        for sentence in split_sentences(&chunk.text) {
            if let Some((cause, effect)) = find_reason(&sentence) {
                out.push(Reason {
                    cause,
                    effect,
                    sentence,
                    heading: chunk.heading.clone(),
                    chunk_id: chunk.id.clone(),
                });
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Definition {
    term: String,
    copula: &'static str,
    meaning: String,
    sentence: String,
    heading: String,
    chunk_id: String,
}

fn trim_meaning(s: &str) -> String {
    s.trim().trim_end_matches(['.', '!', '?', ';', ':']).trim().to_string()
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn find_definition(sentence: &str) -> Option<(String, &'static str, String)> {
    const COPULAS: [(&str, &str); 4] = [(" is ", "is"), (" are ", "are"), (" means ", "means"), (" refers to ", "refers to")];
    let lower = sentence.to_lowercase();
    let (pos, pat, copula) = COPULAS
        .iter()
        .filter_map(|(pat, copula)| lower.find(pat).map(|p| (p, *pat, *copula)))
        .min_by_key(|(p, _, _)| *p)?;
    // Lowercasing can change byte lengths outside ASCII.
    if !sentence.is_char_boundary(pos) || !sentence.is_char_boundary(pos + pat.len()) {
        return None;
    }
    let term = sentence[..pos].trim();
    let meaning = trim_meaning(&sentence[pos + pat.len()..]);
    let term_words = term.split_whitespace().count();
    if term_words == 0 || term_words > MAX_TERM_WORDS || term.contains(',') {
        return None;
    }
    let first = term.split_whitespace().next().unwrap_or_default().to_lowercase();
    if CLAUSE_OPENERS.contains(&first.as_str()) {
        return None;
    }
    if meaning.split_whitespace().count() < MIN_DEFINITION_WORDS {
        return None;
    }
    Some((term.to_string(), copula, meaning))
}

fn definitions(chunks: &[Chunk]) -> Vec<Definition> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for chunk in chunks.iter().filter(|c| c.kind == ChunkKind::Fact) {
        for sentence in split_sentences(&chunk.text) {
            let Some((term, copula, meaning)) = find_definition(&sentence) else { continue };
            if !seen.insert(term.to_lowercase()) {
                continue;
            }
            out.push(Definition {
                term,
                copula,
                meaning,
                sentence: sentence.clone(),
                heading: chunk.heading.clone(),
                chunk_id: chunk.id.clone(),
            });
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct QuestionGenerator {
    per_ingestion: usize,
}

impl QuestionGenerator {
    pub fn new(per_ingestion: usize) -> Self {
        Self { per_ingestion }
    }

    pub fn generate(&self, doc_id: &str, coordinate: &Coordinate, chunks: &[Chunk]) -> Vec<GeneratedQuestion> {
        let defs = definitions(chunks);
        let with_mcq = defs.len() >= MIN_DEFINITIONS_FOR_MCQ;
        let mut out: Vec<GeneratedQuestion> = Vec::new();
        let push = |out: &mut Vec<GeneratedQuestion>, kind, prompt, options, answer, hint, sources| {
            out.push(GeneratedQuestion {
                id: format!("{doc_id}:q{}", out.len()),
                doc_id: doc_id.to_string(),
                coordinate: coordinate.clone(),
                kind,
                prompt,
                options,
                answer,
                hint,
                source_chunk_ids: sources,
            });
        };

        for (i, d) in defs.iter().enumerate() {
            if out.len() >= self.per_ingestion {
                break;
            }
            let term = lower_first(&d.term);
            let prompt = match d.copula {
                "is" | "are" => format!("What {} {}?", d.copula, term),
                _ => format!("What does \"{}\" mean?", d.term),
            };
            push(
                &mut out,
                QuestionKind::Short,
                prompt,
                Vec::new(),
                QuestionAnswer { correct: upper_first(&d.meaning), explanation: d.sentence.clone() },
                Some(format!("Re-read the section \"{}\".", d.heading)),
                vec![d.chunk_id.clone()],
            );

            if with_mcq && out.len() < self.per_ingestion {
                let correct_at = i % LABELS.len();
                let mut distractors = (1..defs.len()).map(|k| &defs[(i + k) % defs.len()]).take(LABELS.len() - 1);
                let options: Vec<QuestionOption> = LABELS
                    .iter()
                    .enumerate()
                    .filter_map(|(pos, label)| {
                        let text = if pos == correct_at { d.meaning.clone() } else { distractors.next()?.meaning.clone() };
                        Some(QuestionOption { label: (*label).to_string(), text: upper_first(&text) })
                    })
                    .collect();
                push(
                    &mut out,
                    QuestionKind::Mcq,
                    format!("Which statement best describes {}?", term),
                    options,
                    QuestionAnswer { correct: LABELS[correct_at].to_string(), explanation: d.sentence.clone() },
                    Some(format!("Think about what {} {} in \"{}\".", term, d.copula, d.heading)),
                    vec![d.chunk_id.clone()],
                );
            }
        }

        for r in reasons(chunks) {
            if out.len() >= self.per_ingestion {
                break;
            }
            push(
                &mut out,
                QuestionKind::Reasoning,
                format!("Explain why {}.", lower_first(&r.effect)),
                Vec::new(),
                QuestionAnswer { correct: upper_first(&r.cause), explanation: r.sentence.clone() },
                Some(format!("Look for the cause in \"{}\".", r.heading)),
                vec![r.chunk_id.clone()],
            );
        }

        let defined_headings: HashSet<&str> = defs.iter().map(|d| d.heading.as_str()).collect();
        let mut summarised = HashSet::new();
        for chunk in chunks.iter().filter(|c| c.kind == ChunkKind::Fact) {
            if out.len() >= self.per_ingestion {
                break;
            }
            if defined_headings.contains(chunk.heading.as_str()) || !summarised.insert(chunk.heading.clone()) {
                continue;
            }
            let lead = split_sentences(&chunk.text).into_iter().next().unwrap_or_else(|| chunk.text.clone());
            push(
                &mut out,
                QuestionKind::Short,
                format!("Summarise the key idea of '{}'.", chunk.heading),
                Vec::new(),
                QuestionAnswer { correct: lead, explanation: format!("Based on the section '{}'.", chunk.heading) },
                None,
                vec![chunk.id.clone()],
            );
        }
        debug!(doc_id, definitions = defs.len(), questions = out.len(), "generated questions");
        out
    }
}

/// Read-only accessor over the live question set of a coordinate.
pub struct QuestionBank {
    store: Arc<dyn IndexStore>,
    default_limit: usize,
    max_limit: usize,
}

impl QuestionBank {
    pub fn new(store: Arc<dyn IndexStore>, default_limit: usize, max_limit: usize) -> Self {
        Self { store, default_limit, max_limit: max_limit.max(1) }
    }

    /// `None` means the configured default; anything else is clamped to
    /// `[1, max_limit]`.
    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.default_limit).clamp(1, self.max_limit)
    }

    pub async fn get_questions(&self, coordinate: &Coordinate, limit: Option<usize>) -> Result<Vec<GeneratedQuestion>> {
        self.store.get_questions(coordinate, self.effective_limit(limit)).await
    }
}
