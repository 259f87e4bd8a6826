use crate::key::KeyId;
use smallvec::SmallVec;

/// Series tags, kept sorted by key with one value per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Requests carry at most an endpoint tag or two.
    pairs: SmallVec<[(KeyId, KeyId); 2]>,
}

impl TagSet {
    /// Builds a set from pairs in any order. A repeated key keeps its last value.
    pub fn new(pairs: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut out = Self::default();
        for (key, value) in pairs {
            out.insert(key, value);
        }
        out
    }

    pub fn insert(&mut self, key: KeyId, value: KeyId) {
        match self.pairs.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(idx) => {
                if let Some(slot) = self.pairs.get_mut(idx) {
                    slot.1 = value;
                }
            }
            Err(idx) => self.pairs.insert(idx, (key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        self.pairs
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .and_then(|idx| self.pairs.get(idx))
            .map(|(_, v)| *v)
    }

    /// True when every `(key, value)` filter is present.
    pub fn matches(&self, filters: &[(KeyId, KeyId)]) -> bool {
        filters.iter().all(|(k, v)| self.get(*k) == Some(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagset_get_by_key() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::new([(c, a), (a, b)]);
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(a));
        assert_eq!(set.get(b), None);
        assert!(!set.is_empty());
        assert!(TagSet::default().is_empty());
    }

    #[test]
    fn order_does_not_matter_and_last_value_wins() {
        let (a, b, c) = (KeyId::from(1), KeyId::from(2), KeyId::from(3));
        assert_eq!(TagSet::new([(a, b), (c, c)]), TagSet::new([(c, c), (a, b)]));

        let set = TagSet::new([(a, b), (a, c)]);
        assert_eq!(set.get(a), Some(c));
        assert_eq!(set.iter().count(), 1);
        assert!(set.matches(&[(a, c)]));
        assert!(!set.matches(&[(a, b)]));
        assert!(set.matches(&[]));
    }
}
