use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// String interner for metric names and tag keys/values.
#[derive(Default, Debug)]
pub struct Interner {
    map: RwLock<AHashMap<Arc<str>, u32>>,
    vec: RwLock<Vec<Arc<str>>>,
}

impl Interner {
    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(&id) = self.map.read().get(s) {
            return KeyId(id);
        }

        let mut map = self.map.write();
        let mut vec = self.vec.write();

        // Another writer may have won the race between the two locks.
        if let Some(&id) = map.get(s) {
            return KeyId(id);
        }

        let id = vec.len() as u32;
        let s: Arc<str> = Arc::from(s);
        vec.push(s.clone());
        map.insert(s, id);

        KeyId(id)
    }

    pub fn lookup(&self, s: &str) -> Option<KeyId> {
        self.map.read().get(s).copied().map(KeyId)
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.vec.read().get(id.0 as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let i = Interner::default();
        let a = i.get_or_intern("http_reqs");
        let b = i.get_or_intern("http_req_duration");
        assert_ne!(a, b);
        assert_eq!(i.get_or_intern("http_reqs"), a);
        assert_eq!(i.lookup("http_req_duration"), Some(b));
        assert_eq!(i.lookup("missing"), None);
        assert_eq!(i.resolve(b).as_deref(), Some("http_req_duration"));
    }
}
