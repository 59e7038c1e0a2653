use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

/// Interned identifier for a tag key or tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Debug, Default)]
struct Table {
    ids: AHashMap<Arc<str>, KeyId>,
    names: Vec<Arc<str>>,
}

/// Two-way string table shared by every series of a registry.
///
/// Tag strings repeat on every sample, so series keys store small ids instead.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    table: RwLock<Table>,
}

impl Interner {
    pub(crate) fn intern(&self, s: &str) -> KeyId {
        if let Some(id) = self.table.read().ids.get(s) {
            return *id;
        }

        let mut table = self.table.write();
        if let Some(id) = table.ids.get(s) {
            return *id;
        }

        let id = KeyId(table.names.len() as u32);
        let s: Arc<str> = Arc::from(s);
        table.names.push(s.clone());
        table.ids.insert(s, id);
        id
    }

    pub(crate) fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.table.read().names.get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable_and_resolvable() {
        let interner = Interner::default();
        let a = interner.intern("name");
        let b = interner.intern("status");
        assert_ne!(a, b);
        assert_eq!(interner.intern("name"), a);
        assert_eq!(interner.resolve(b).as_deref(), Some("status"));
        assert_eq!(interner.resolve(a).as_deref(), Some("name"));
    }
}
