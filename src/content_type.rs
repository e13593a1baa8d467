//! Content-type registry and loader table.
//!
//! Mirrors the teacher's single-purpose, constant-time lookup tables (e.g.
//! `TileCache`/`SlidePool`): a flat map keyed by a small integer, guarded by
//! a lock only at the registration boundary since lookups happen on the
//! single-threaded main executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FormatError, TileStreamResult};
use crate::format::FormatLoader;

/// Wrapped integer content-type tag. Equality is by integer. Values 0–9 are
/// reserved for built-in formats; the remainder are issued monotonically by
/// [`ContentTypeGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentType(u32);

impl ContentType {
    pub const fn reserved(id: u32) -> Self {
        assert!(id < 10, "reserved content types are 0..10");
        ContentType(id)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// Generates fresh content-type tags starting at 10.
pub struct ContentTypeGenerator {
    next: AtomicU32,
}

impl ContentTypeGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(10),
        }
    }

    /// Issue a fresh, never-before-returned content type.
    pub fn next(&self) -> ContentType {
        ContentType(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContentTypeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps content-type tags to the loader responsible for them.
///
/// Loaders must be registered before any content of that tag appears;
/// looking up an unregistered tag is fatal (`FormatError::UnregisteredContentType`),
/// matching spec §4.B's "missing registration is fatal".
pub struct LoaderTable {
    generator: ContentTypeGenerator,
    loaders: RwLock<HashMap<ContentType, Arc<dyn FormatLoader>>>,
}

impl LoaderTable {
    pub fn new() -> Self {
        Self {
            generator: ContentTypeGenerator::new(),
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// Reserve a fresh content type and register a loader for it in one step.
    pub fn register_new(&self, loader: Arc<dyn FormatLoader>) -> ContentType {
        let tag = self.generator.next();
        self.loaders.write().insert(tag, loader);
        tag
    }

    /// Register a loader under an explicit (typically reserved) tag.
    pub fn register(&self, tag: ContentType, loader: Arc<dyn FormatLoader>) {
        self.loaders.write().insert(tag, loader);
    }

    pub fn get(&self, tag: ContentType) -> TileStreamResult<Arc<dyn FormatLoader>> {
        self.loaders
            .read()
            .get(&tag)
            .cloned()
            .ok_or_else(|| FormatError::UnregisteredContentType(tag).into())
    }

    pub fn is_registered(&self, tag: ContentType) -> bool {
        self.loaders.read().contains_key(&tag)
    }
}

impl Default for LoaderTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubLoader;

    #[test]
    fn generator_starts_at_ten() {
        let gen = ContentTypeGenerator::new();
        assert_eq!(gen.next().value(), 10);
        assert_eq!(gen.next().value(), 11);
    }

    #[test]
    fn reserved_below_ten() {
        let t = ContentType::reserved(3);
        assert_eq!(t.value(), 3);
    }

    #[test]
    fn unregistered_lookup_is_fatal() {
        let table = LoaderTable::new();
        let tag = ContentType::reserved(0);
        assert!(table.get(tag).is_err());
    }

    #[test]
    fn register_new_then_lookup_succeeds() {
        let table = LoaderTable::new();
        let tag = table.register_new(Arc::new(StubLoader::default()));
        assert!(table.is_registered(tag));
        assert!(table.get(tag).is_ok());
    }
}
