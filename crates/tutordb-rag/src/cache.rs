//! Cache-aside decorators for the read paths.
//!
//! Entries live for a fixed TTL and are dropped for a coordinate whenever it
//! is re-ingested. A zero TTL turns caching off entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use tutordb_core::types::{Coordinate, GeneratedQuestion, Lane, RankedChunk};
use tutordb_core::Result;

use crate::questions::QuestionBank;
use crate::retrieve::Retriever;

/// TTL map keyed by `<coordinate key>|...`.
///
/// Each coordinate also has a generation that `invalidate` bumps. A reader
/// takes the generation before going to the store and hands it back to
/// `insert`; if an ingestion invalidated the coordinate in between, the
/// result is dropped instead of cached.
pub struct ReadCache<V> {
    ttl: Duration,
    state: Mutex<CacheState<V>>,
}

struct CacheState<V> {
    entries: HashMap<String, (Instant, V)>,
    generations: HashMap<String, u64>,
}

impl<V: Clone> ReadCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, state: Mutex::new(CacheState { entries: HashMap::new(), generations: HashMap::new() }) }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn generation(&self, coordinate: &Coordinate) -> u64 {
        let state = self.state.lock().await;
        state.generations.get(&coordinate.key()).copied().unwrap_or_default()
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        if !self.enabled() {
            return None;
        }
        let mut state = self.state.lock().await;
        match state.entries.get(key) {
            Some((stored, v)) if stored.elapsed() < self.ttl => Some(v.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` if `coordinate` is still at `generation`; returns
    /// whether it was stored.
    pub async fn insert(&self, coordinate: &Coordinate, generation: u64, key: String, value: V) -> bool {
        if !self.enabled() {
            return false;
        }
        let mut state = self.state.lock().await;
        let current = state.generations.get(&coordinate.key()).copied().unwrap_or_default();
        if current != generation {
            return false;
        }
        let ttl = self.ttl;
        state.entries.retain(|_, (stored, _)| stored.elapsed() < ttl);
        state.entries.insert(key, (Instant::now(), value));
        true
    }

    /// Drop every entry for `coordinate` and start a new generation; returns
    /// how many entries were removed.
    pub async fn invalidate(&self, coordinate: &Coordinate) -> usize {
        let coordinate_key = coordinate.key();
        let prefix = format!("{coordinate_key}|");
        let mut state = self.state.lock().await;
        *state.generations.entry(coordinate_key).or_default() += 1;
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.starts_with(&prefix));
        before - state.entries.len()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct CachedRetriever {
    inner: Retriever,
    cache: ReadCache<Vec<RankedChunk>>,
}

impl CachedRetriever {
    pub fn new(inner: Retriever, ttl: Duration) -> Self {
        Self { inner, cache: ReadCache::new(ttl) }
    }

    pub fn inner(&self) -> &Retriever {
        &self.inner
    }

    pub async fn retrieve(
        &self,
        coordinate: &Coordinate,
        lane: Lane,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RankedChunk>> {
        let question = self.inner.check_question(question)?;
        let k = self.inner.effective_top_k(top_k)?;
        let key = format!(
            "{}|{}|{}|{}",
            coordinate.key(),
            lane.as_str(),
            k,
            blake3::hash(question.to_lowercase().as_bytes()).to_hex()
        );
        if let Some(hit) = self.cache.get(&key).await {
            debug!(coordinate = %coordinate, "retrieval cache hit");
            return Ok(hit);
        }
        let generation = self.cache.generation(coordinate).await;
        let hits = self.inner.retrieve(coordinate, lane, question, Some(k)).await?;
        if !self.cache.insert(coordinate, generation, key, hits.clone()).await && self.cache.enabled() {
            debug!(coordinate = %coordinate, "re-ingested during retrieval; result not cached");
        }
        Ok(hits)
    }

    pub async fn invalidate(&self, coordinate: &Coordinate) -> usize {
        self.cache.invalidate(coordinate).await
    }
}

pub struct CachedQuestionBank {
    inner: QuestionBank,
    cache: ReadCache<Vec<GeneratedQuestion>>,
}

impl CachedQuestionBank {
    pub fn new(inner: QuestionBank, ttl: Duration) -> Self {
        Self { inner, cache: ReadCache::new(ttl) }
    }

    pub async fn get_questions(&self, coordinate: &Coordinate, limit: Option<usize>) -> Result<Vec<GeneratedQuestion>> {
        let limit = self.inner.effective_limit(limit);
        let key = format!("{}|{}", coordinate.key(), limit);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        let generation = self.cache.generation(coordinate).await;
        let questions = self.inner.get_questions(coordinate, Some(limit)).await?;
        self.cache.insert(coordinate, generation, key, questions.clone()).await;
        Ok(questions)
    }

    pub async fn invalidate(&self, coordinate: &Coordinate) -> usize {
        self.cache.invalidate(coordinate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(subtopic: &str) -> Coordinate {
        Coordinate::new("Science", "c", "t", subtopic).unwrap()
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let a = coord("a");
        let cache: ReadCache<u32> = ReadCache::new(Duration::ZERO);
        assert!(!cache.insert(&a, 0, format!("{}|1", a.key()), 1).await);
        assert_eq!(cache.get(&format!("{}|1", a.key())).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let a = coord("a");
        let key = format!("{}|1", a.key());
        let cache: ReadCache<u32> = ReadCache::new(Duration::from_millis(20));
        cache.insert(&a, 0, key.clone(), 1).await;
        assert_eq!(cache.get(&key).await, Some(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn invalidate_only_touches_one_coordinate() {
        let a = coord("a");
        let b = coord("b");
        let cache: ReadCache<u32> = ReadCache::new(Duration::from_secs(60));
        cache.insert(&a, 0, format!("{}|fact", a.key()), 1).await;
        cache.insert(&a, 0, format!("{}|both", a.key()), 2).await;
        cache.insert(&b, 0, format!("{}|fact", b.key()), 3).await;
        assert_eq!(cache.invalidate(&a).await, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.generation(&a).await, 1);
        assert_eq!(cache.generation(&b).await, 0);
    }

    #[tokio::test]
    async fn reads_that_straddle_an_invalidation_are_not_cached() {
        let a = coord("a");
        let b = coord("b");
        let cache: ReadCache<u32> = ReadCache::new(Duration::from_secs(60));
        let seen_a = cache.generation(&a).await;
        let seen_b = cache.generation(&b).await;

        cache.invalidate(&a).await;
        assert!(!cache.insert(&a, seen_a, format!("{}|fact", a.key()), 1).await);
        assert!(cache.insert(&b, seen_b, format!("{}|fact", b.key()), 2).await);
        assert_eq!(cache.get(&format!("{}|fact", a.key())).await, None);

        let fresh = cache.generation(&a).await;
        assert!(cache.insert(&a, fresh, format!("{}|fact", a.key()), 3).await);
        assert_eq!(cache.get(&format!("{}|fact", a.key())).await, Some(3));
    }
}
