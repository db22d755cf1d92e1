use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{KeyValue, ModelError};

/// Ordered substitution table used to parameterize command scripts.
///
/// Keys keep their first insertion position; updating an existing key replaces the value in place.
/// Serialized as a transparent array of key–value pairs so the order survives the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expansions(Vec<KeyValue>);

impl Expansions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|kv| kv.key() == key).map(|kv| kv.value())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set `key`, keeping its position when it is already present.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|kv| kv.key() == key) {
            Some(kv) => kv.set_value(value),
            None => self.0.push(KeyValue::new(key, value)),
        }
    }

    /// Apply every pair of `other` in its order.
    pub fn update<'a, I>(&mut self, other: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in other {
            self.put(k, v);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|kv| kv.key() == key)?;
        Some(self.0.remove(pos).value().to_string())
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|kv| (kv.key().to_string(), kv.value().to_string()))
            .collect()
    }

    /// Substitute `${name}` references in `input`.
    ///
    /// - `${name}` expands to the value, or to nothing when unset;
    /// - `${name|fallback}` uses `fallback` when `name` is unset;
    /// - `${name|*other}` uses the value of `other` when `name` is unset.
    pub fn expand(&self, input: &str) -> Result<String, ModelError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| ModelError::Expansion {
                input: input.to_string(),
                reason: "unterminated '${'".to_string(),
            })?;
            let body = &after[..end];
            if body.is_empty() {
                return Err(ModelError::Expansion {
                    input: input.to_string(),
                    reason: "empty expansion name".to_string(),
                });
            }

            let (name, fallback) = match body.split_once('|') {
                Some((name, fallback)) => (name.trim(), Some(fallback.trim())),
                None => (body.trim(), None),
            };

            match (self.get(name), fallback) {
                (Some(value), _) => out.push_str(value),
                (None, Some(f)) => match f.strip_prefix('*') {
                    Some(other) => out.push_str(self.get(other).unwrap_or_default()),
                    None => out.push_str(f),
                },
                (None, None) => {}
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl<K, V> FromIterator<(K, V)> for Expansions
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut out = Expansions::new();
        for (k, v) in iter {
            out.put(k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Expansions;

    #[test]
    fn put_keeps_position_on_update() {
        let mut exp = Expansions::new();
        exp.put("a", "1");
        exp.put("b", "2");
        exp.put("a", "3");

        let keys: Vec<_> = exp.iter().map(|kv| kv.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(exp.get("a"), Some("3"));
        assert_eq!(exp.len(), 2);
    }

    #[test]
    fn remove_drops_entry() {
        let mut exp: Expansions = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(exp.remove("a").as_deref(), Some("1"));
        assert!(!exp.exists("a"));
        assert!(exp.remove("missing").is_none());
    }

    #[test]
    fn expand_substitutes_known_and_fallbacks() {
        let exp: Expansions = [("workdir", "/data"), ("branch", "main")]
            .into_iter()
            .collect();

        assert_eq!(exp.expand("cd ${workdir}").unwrap(), "cd /data");
        assert_eq!(exp.expand("${missing}x").unwrap(), "x");
        assert_eq!(exp.expand("${missing|dev}").unwrap(), "dev");
        assert_eq!(exp.expand("${missing|*branch}").unwrap(), "main");
        assert_eq!(exp.expand("${branch|dev}").unwrap(), "main");
        assert_eq!(exp.expand("no refs").unwrap(), "no refs");
    }

    #[test]
    fn expand_rejects_unterminated_reference() {
        let exp = Expansions::new();
        assert!(exp.expand("echo ${oops").is_err());
        assert!(exp.expand("echo ${}").is_err());
    }

    #[test]
    fn serde_keeps_order() {
        let exp: Expansions = [("z", "1"), ("a", "2")].into_iter().collect();
        let json = serde_json::to_string(&exp).unwrap();
        assert!(json.starts_with('['));
        assert!(json.find("\"z\"").unwrap() < json.find("\"a\"").unwrap());

        let back: Expansions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exp);
    }
}
