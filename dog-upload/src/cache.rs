use std::collections::HashMap;
use std::sync::RwLock;

use crate::Fingerprint;

/// Process-wide memo of successful uploads, keyed by payload identity.
///
/// Append-only: an entry is never replaced or evicted, so a fingerprint maps
/// to at most one URL for the lifetime of the cache. Lookup and insert are
/// separate steps; two callers racing on the same payload may both upload,
/// and the first URL stored wins.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: RwLock<HashMap<Fingerprint, String>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the URL of an earlier upload of the same payload
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(fingerprint).cloned()
    }

    /// Remember a URL; returns the URL now stored for the fingerprint
    pub fn put(&self, fingerprint: Fingerprint, url: String) -> String {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(fingerprint).or_insert(url).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit() {
        let cache = ContentCache::new();
        let fp = Fingerprint::new(b"payload".to_vec());

        assert_eq!(cache.get(&fp), None);
        cache.put(fp.clone(), "https://cdn/a".to_string());
        assert_eq!(cache.get(&fp), Some("https://cdn/a".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_are_never_replaced() {
        let cache = ContentCache::new();
        let fp = Fingerprint::new(b"payload".to_vec());

        cache.put(fp.clone(), "https://cdn/first".to_string());
        let stored = cache.put(fp.clone(), "https://cdn/second".to_string());

        assert_eq!(stored, "https://cdn/first");
        assert_eq!(cache.get(&fp), Some("https://cdn/first".to_string()));
    }

    #[test]
    fn test_identity_is_exact_content() {
        let cache = ContentCache::new();
        cache.put(Fingerprint::new(b"abc".to_vec()), "u".to_string());

        assert!(cache.get(&Fingerprint::new(b"abc".to_vec())).is_some());
        assert!(cache.get(&Fingerprint::new(b"abd".to_vec())).is_none());
    }
}
