use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;

/// Cross-scenario variables seeded by setup and read by virtual users.
#[derive(Debug, Default)]
pub struct SharedVars {
    values: DashMap<String, Value>,
}

impl SharedVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Appends to the list under `key`, turning a scalar into a list if needed.
    pub fn push(&self, key: &str, value: Value) {
        let mut entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry.value_mut() {
            Value::Array(items) => items.push(value),
            other => {
                let prev = std::mem::take(other);
                *other = Value::Array(vec![prev, value]);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// The value under `key`; lists yield a uniformly chosen element.
    pub fn pick<R: Rng + ?Sized>(&self, key: &str, rng: &mut R) -> Option<Value> {
        let v = self.values.get(key)?;
        match v.value() {
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) => items.get(rng.gen_range(0..items.len())).cloned(),
            other => Some(other.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    #[test]
    fn push_builds_lists_and_pick_draws_from_them() {
        let vars = SharedVars::new();
        vars.push("orderIds", json!(1));
        vars.push("orderIds", json!(2));
        assert_eq!(vars.get("orderIds"), Some(json!([1, 2])));

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            match vars.pick("orderIds", &mut rng) {
                Some(v) => assert!(v == json!(1) || v == json!(2)),
                None => panic!("expected a pick"),
            }
        }
        assert_eq!(vars.pick("missing", &mut rng), None);
    }

    #[test]
    fn push_onto_scalar_promotes_to_list() {
        let vars = SharedVars::new();
        vars.set("id", json!("a"));
        vars.push("id", json!("b"));
        assert_eq!(vars.get("id"), Some(json!(["a", "b"])));
        assert_eq!(vars.len(), 1);
    }
}
