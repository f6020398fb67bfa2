//! Extractive answer synthesis.
//!
//! Answers are assembled only from whole sentences of the supplied chunks,
//! each followed by a `[n]` marker naming the citation it came from.

use std::collections::HashSet;

use tutordb_core::chunker::split_sentences;
use tutordb_core::types::{Answer, Citation, RankedChunk};

pub const NO_CONTEXT_ANSWER: &str = "I do not have enough context for this subtopic yet. \
Please ask your teacher to ingest the textbook section first.";

/// Returned when chunks were retrieved but none of their sentences share a
/// term with the question. The top chunk is still cited.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough context from this subtopic to answer confidently.";

pub const EXCERPT_CHARS: usize = 200;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "explain", "for", "from", "how",
    "i", "in", "is", "it", "me", "of", "on", "or", "please", "tell", "that", "the", "this", "to", "was", "we",
    "what", "when", "where", "which", "who", "why", "will", "with", "you",
];

fn stem(token: &str) -> String {
    let t = token.to_lowercase();
    if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
        t[..t.len() - 1].to_string()
    } else {
        t
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(stem)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

struct Candidate {
    overlap: usize,
    rank: usize,
    position: usize,
    sentence: String,
}

#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    max_sentences: usize,
}

impl Default for AnswerSynthesizer {
    fn default() -> Self {
        Self { max_sentences: 4 }
    }
}

impl AnswerSynthesizer {
    pub fn new(max_sentences: usize) -> Self {
        Self { max_sentences: max_sentences.max(1) }
    }

    pub fn synthesize(&self, question: &str, chunks: &[RankedChunk]) -> Answer {
        let Some(top) = chunks.first() else {
            return Answer { text: NO_CONTEXT_ANSWER.to_string(), citations: Vec::new(), grounded: false };
        };

        let wanted = terms(question);
        let mut candidates: Vec<Candidate> = Vec::new();
        for (rank, rc) in chunks.iter().enumerate() {
            for (position, sentence) in split_sentences(&rc.chunk.text).into_iter().enumerate() {
                let overlap = terms(&sentence).intersection(&wanted).count();
                if overlap > 0 {
                    candidates.push(Candidate { overlap, rank, position, sentence });
                }
            }
        }
        if candidates.is_empty() {
            let lead = split_sentences(&top.chunk.text).into_iter().next().unwrap_or_else(|| top.chunk.text.clone());
            let citation = Citation {
                chunk_id: top.chunk.id.clone(),
                kind: top.chunk.kind,
                heading: top.chunk.heading.clone(),
                score: top.score,
                excerpt: excerpt(&lead),
            };
            return Answer { text: INSUFFICIENT_CONTEXT_ANSWER.to_string(), citations: vec![citation], grounded: false };
        }

        candidates.sort_by(|a, b| b.overlap.cmp(&a.overlap).then(a.rank.cmp(&b.rank)).then(a.position.cmp(&b.position)));
        candidates.truncate(self.max_sentences);
        candidates.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.position.cmp(&b.position)));

        // Citation number per contributing chunk, in order of first use.
        let mut cited: Vec<(usize, Vec<&str>)> = Vec::new();
        let mut parts = Vec::with_capacity(candidates.len());
        for c in &candidates {
            let n = match cited.iter().position(|(rank, _)| *rank == c.rank) {
                Some(i) => {
                    cited[i].1.push(c.sentence.as_str());
                    i + 1
                }
                None => {
                    cited.push((c.rank, vec![c.sentence.as_str()]));
                    cited.len()
                }
            };
            parts.push(format!("{} [{}]", c.sentence, n));
        }

        let citations = cited
            .into_iter()
            .map(|(rank, sentences)| {
                let rc = &chunks[rank];
                Citation {
                    chunk_id: rc.chunk.id.clone(),
                    kind: rc.chunk.kind,
                    heading: rc.chunk.heading.clone(),
                    score: rc.score,
                    excerpt: excerpt(&sentences.join(" ")),
                }
            })
            .collect();
        Answer { text: parts.join(" "), citations, grounded: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutordb_core::types::{Chunk, ChunkKind, Coordinate};

    fn ranked(ordinal: usize, text: &str, score: f32) -> RankedChunk {
        RankedChunk {
            chunk: Chunk {
                id: format!("doc_t:{ordinal}"),
                doc_id: "doc_t".into(),
                coordinate: Coordinate::new("Science", "c", "t", "s").unwrap(),
                kind: ChunkKind::Fact,
                heading: "Circuits".into(),
                text: text.into(),
                ordinal,
            },
            score,
        }
    }

    #[test]
    fn empty_context_is_explicitly_ungrounded() {
        let a = AnswerSynthesizer::default().synthesize("What is an open circuit?", &[]);
        assert!(!a.grounded);
        assert!(a.citations.is_empty());
        assert_eq!(a.text, NO_CONTEXT_ANSWER);
    }

    #[test]
    fn selects_overlapping_sentences_with_markers() {
        let chunks = vec![
            ranked(1, "An open circuit has a gap. Bulbs stay dark.", 0.9),
            ranked(0, "Copper is a conductor. A closed circuit is complete.", 0.5),
        ];
        let a = AnswerSynthesizer::default().synthesize("What is an open circuit?", &chunks);
        assert!(a.grounded);
        assert_eq!(a.text, "An open circuit has a gap. [1] A closed circuit is complete. [2]");
        assert_eq!(a.citations.len(), 2);
        assert_eq!(a.citations[0].chunk_id, "doc_t:1");
        assert_eq!(a.citations[1].excerpt, "A closed circuit is complete.");
    }

    #[test]
    fn unrelated_context_admits_it_cannot_answer() {
        let chunks = vec![ranked(0, "Batteries store chemical energy. They power torches.", 0.2)];
        let a = AnswerSynthesizer::default().synthesize("Why do magnets attract?", &chunks);
        assert_eq!(a.text, INSUFFICIENT_CONTEXT_ANSWER);
        assert!(!a.grounded);
        assert_eq!(a.citations.len(), 1);
        assert_eq!(a.citations[0].chunk_id, "doc_t:0");
        assert_eq!(a.citations[0].excerpt, "Batteries store chemical energy.");
    }

    #[test]
    fn excerpts_are_bounded() {
        let long = "word ".repeat(100);
        assert!(excerpt(&long).chars().count() <= EXCERPT_CHARS);
    }
}
