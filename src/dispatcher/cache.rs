//! # Caché de resoluciones
//! src/dispatcher/cache.rs
//!
//! Guarda, por (host, path), la lista de mapeos que coinciden. Al llenarse
//! se vacía entera. Agregar una entrada al dispatcher también la vacía.

use super::MappedTarget;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Default de `MaxUrlMapCache`
pub const DEFAULT_MAX_URL_MAP_CACHE: usize = 8192;

/// Caché acotada de resoluciones; capacidad 0 = deshabilitada
pub struct UrlMapCache {
    max: usize,
    entries: Mutex<HashMap<(String, String), Arc<[MappedTarget]>>>,
}

impl UrlMapCache {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Capacidad configurada
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolución guardada o calculada con `resolve`
    pub fn get_or_insert_with(
        &self,
        host: &str,
        path: &str,
        resolve: impl FnOnce() -> Vec<MappedTarget>,
    ) -> Arc<[MappedTarget]> {
        if self.max == 0 {
            return resolve().into();
        }

        let key = (host.to_string(), path.to_string());
        if let Some(found) = self.entries.lock().get(&key) {
            return Arc::clone(found);
        }

        let resolved: Arc<[MappedTarget]> = resolve().into();

        let mut entries = self.entries.lock();
        if entries.len() >= self.max {
            tracing::info!(entries = entries.len(), "url-map-cache lleno, se vacía");
            entries.clear();
        }
        entries.insert(key, Arc::clone(&resolved));
        resolved
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for UrlMapCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_URL_MAP_CACHE)
    }
}

/// Clonar da una caché vacía con la misma capacidad
impl Clone for UrlMapCache {
    fn clone(&self) -> Self {
        Self::new(self.max)
    }
}

impl std::fmt::Debug for UrlMapCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlMapCache")
            .field("max", &self.max)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn target(index: usize) -> MappedTarget {
        MappedTarget {
            index,
            component: "echo".to_string(),
            path_info: "/".to_string(),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = UrlMapCache::new(4);
        let calls = Cell::new(0);
        let resolve = || {
            calls.set(calls.get() + 1);
            vec![target(0)]
        };

        cache.get_or_insert_with("h", "/a", resolve);
        let hit = cache.get_or_insert_with("h", "/a", resolve);
        assert_eq!(calls.get(), 1);
        assert_eq!(hit[0].index, 0);

        // otro host, otra clave
        cache.get_or_insert_with("other", "/a", resolve);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_cleared_when_full() {
        let cache = UrlMapCache::new(2);
        cache.get_or_insert_with("h", "/a", Vec::new);
        cache.get_or_insert_with("h", "/b", Vec::new);
        assert_eq!(cache.len(), 2);

        cache.get_or_insert_with("h", "/c", Vec::new);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_disables() {
        let cache = UrlMapCache::new(0);
        let result = cache.get_or_insert_with("h", "/a", || vec![target(3)]);
        assert_eq!(result[0].index, 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clone_is_empty() {
        let cache = UrlMapCache::new(5);
        cache.get_or_insert_with("h", "/a", Vec::new);
        let copy = cache.clone();
        assert_eq!(copy.max(), 5);
        assert!(copy.is_empty());
    }
}
