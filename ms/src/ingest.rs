//! Turn ingestion: chunking, importance, and dedup dispatch

use tracing::{debug, warn};

use crate::embeddings::EmbeddingProvider;
use crate::scoring::{DedupVerdict, dedup_verdict, importance_from_signals};
use crate::store::MemoryStore;
use crate::types::{MemoryEntry, MemoryLink, StoreError};

/// Chunks longer than this are split on a character window
const MAX_CHUNK_CHARS: usize = 1200;

/// How many recent embedded rows a new chunk is compared against
const DEDUP_WINDOW: usize = 50;

/// One user/assistant exchange, the unit of memory ingestion.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub user_message: String,
    pub agent_response: String,
    pub agent: String,
    pub tags: Vec<String>,
    pub signals: Vec<String>,
}

impl Turn {
    pub fn new(user_message: impl Into<String>, agent_response: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            agent_response: agent_response.into(),
            agent: agent.into(),
            tags: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_signals(mut self, signals: Vec<String>) -> Self {
        self.signals = signals;
        self
    }

    /// The textual content of the turn.
    pub fn text(&self) -> String {
        if self.user_message.is_empty() {
            self.agent_response.clone()
        } else if self.agent_response.is_empty() {
            self.user_message.clone()
        } else {
            format!("{}\n\n{}", self.user_message, self.agent_response)
        }
    }
}

/// Split a turn's text into storable units: paragraphs, with oversized
/// paragraphs windowed on whitespace. Concatenating the chunks reproduces
/// the text modulo whitespace.
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.len() <= MAX_CHUNK_CHARS {
            chunks.push(paragraph.to_string());
            continue;
        }

        // Window long paragraphs, breaking on whitespace where possible
        let mut rest = paragraph;
        while !rest.is_empty() {
            if rest.len() <= MAX_CHUNK_CHARS {
                chunks.push(rest.to_string());
                break;
            }
            // Back off to a char boundary before slicing
            let mut window_end = MAX_CHUNK_CHARS;
            while !rest.is_char_boundary(window_end) {
                window_end -= 1;
            }
            let window = &rest[..window_end];
            let cut = window.rfind(char::is_whitespace).filter(|&i| i > 0).unwrap_or(window_end);
            chunks.push(rest[..cut].trim_end().to_string());
            rest = rest[cut..].trim_start();
        }
    }
    chunks
}

/// Ingest a turn: chunk, embed, score, dedup, store. Returns the ids of the
/// rows actually inserted (exact duplicates insert nothing).
pub fn ingest_turn(
    store: &MemoryStore,
    embedder: Option<&dyn EmbeddingProvider>,
    turn: &Turn,
) -> Result<Vec<String>, StoreError> {
    let chunks = chunk_text(&turn.text());
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let importance = importance_from_signals(&turn.signals);
    let mut stored = Vec::new();

    for chunk in chunks {
        // Embedding failure is non-fatal: store with a null vector
        let embedding = match embedder {
            Some(e) => match e.embed(&chunk) {
                Ok(v) => Some(v),
                Err(err) => {
                    warn!(error = %err, "Embedding failed, storing without vector");
                    None
                }
            },
            None => None,
        };

        let verdict = match &embedding {
            Some(v) => dedup_verdict(v, &store.recent_embedded(DEDUP_WINDOW)?),
            None => DedupVerdict::Unique,
        };

        match verdict {
            DedupVerdict::ExactDup { id } => {
                debug!(existing = %id, "Exact duplicate, boosting existing row");
                store.boost_importance(&id, 0.1)?;
            }
            DedupVerdict::NearDup { id } => {
                let entry = MemoryEntry::new(chunk, turn.agent.clone())
                    .with_embedding(embedding)
                    .with_importance(importance)
                    .with_tags(turn.tags.clone());
                store.insert_memory(&entry)?;
                store.add_link(&MemoryLink::new(entry.id.clone(), id, "related_to", 1.0))?;
                stored.push(entry.id);
            }
            DedupVerdict::Unique => {
                let entry = MemoryEntry::new(chunk, turn.agent.clone())
                    .with_embedding(embedding)
                    .with_importance(importance)
                    .with_tags(turn.tags.clone());
                store.insert_memory(&entry)?;
                stored.push(entry.id);
            }
        }
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::l2_normalize;
    use tempfile::TempDir;

    /// Deterministic test embedder: hashes words into a small vector.
    pub(crate) struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
            let mut v = vec![0.0f32; 16];
            for word in text.to_lowercase().split_whitespace() {
                let h = word.bytes().fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                v[h % 16] += 1.0;
            }
            l2_normalize(&mut v);
            Ok(v)
        }

        fn dimension(&self) -> usize {
            16
        }
    }

    #[test]
    fn test_chunk_round_trip_modulo_whitespace() {
        let text = "first paragraph here\n\nsecond paragraph\n\n\nthird";
        let chunks = chunk_text(text);
        assert_eq!(chunks.len(), 3);

        let rejoined: String = chunks.join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rejoined), normalize(text));
    }

    #[test]
    fn test_chunk_windows_long_paragraphs() {
        let long = "word ".repeat(600);
        let chunks = chunk_text(&long);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= MAX_CHUNK_CHARS));

        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&chunks.join(" ")), normalize(&long));
    }

    #[test]
    fn test_chunk_handles_multibyte_text() {
        // No whitespace, multi-byte chars: windowing must not split a char
        let long = "é".repeat(2000);
        let chunks = chunk_text(&long);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(|c| c.chars().count()).sum::<usize>(), 2000);
    }

    #[test]
    fn test_ingest_stores_chunks() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::open(temp.path().join("memory.db")).unwrap();

        let turn = Turn::new("I prefer Python for scripting", "Noted, Python it is", "brain")
            .with_signals(vec!["preference".to_string()]);
        let ids = ingest_turn(&store, Some(&StubEmbedder), &turn).unwrap();

        assert!(!ids.is_empty());
        let first = store.get_memory(&ids[0]).unwrap().unwrap();
        assert!(first.importance >= 0.7);
        assert!(first.embedding.is_some());
    }

    #[test]
    fn test_exact_duplicate_boosts_instead_of_storing() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::open(temp.path().join("memory.db")).unwrap();

        let turn = Turn::new("I prefer Python", "", "brain");
        let first_ids = ingest_turn(&store, Some(&StubEmbedder), &turn).unwrap();
        assert_eq!(first_ids.len(), 1);
        let before = store.get_memory(&first_ids[0]).unwrap().unwrap();

        // Same words, identical stub embedding
        let dup = Turn::new("I prefer Python", "", "brain");
        let dup_ids = ingest_turn(&store, Some(&StubEmbedder), &dup).unwrap();

        assert!(dup_ids.is_empty());
        assert_eq!(store.count_memories().unwrap(), 1);
        let after = store.get_memory(&first_ids[0]).unwrap().unwrap();
        assert!(after.importance > before.importance);
    }

    #[test]
    fn test_ingest_without_embedder_still_stores() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::open(temp.path().join("memory.db")).unwrap();

        let ids = ingest_turn(&store, None, &Turn::new("hello", "hi there", "brain")).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(store.get_memory(&ids[0]).unwrap().unwrap().embedding.is_none());
    }
}
