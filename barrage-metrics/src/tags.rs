use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most samples carry zero to two tags.
    tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set, sorting by key. Later duplicates of a key win.
    pub fn from_pairs(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::new();
        for (k, v) in iter {
            match tags.iter_mut().find(|(ek, _)| *ek == k) {
                Some(slot) => slot.1 = v,
                None => tags.push((k, v)),
            }
        }
        tags.sort_unstable();
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let idx = self.tags.partition_point(|(k, _)| *k < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// True when every `(key, value)` in `selector` is present in this set.
    pub fn contains_all(&self, selector: &TagSet) -> bool {
        selector.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}
