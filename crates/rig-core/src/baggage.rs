//! Minimal W3C-style baggage: an ordered set of validated key/value members propagated with a task.

use crate::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaggageMember {
    key: String,
    value: String,
}

impl BaggageMember {
    /// Keys must be non-empty tokens; values must not contain whitespace, quotes, `,`, `;` or `\`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        let value = value.into();

        if key.is_empty() || !key.chars().all(is_token_char) {
            return Err(CoreError::InvalidArgument(format!(
                "invalid baggage key '{key}'"
            )));
        }
        if let Some(c) = value.chars().find(|c| !is_value_char(*c)) {
            return Err(CoreError::InvalidArgument(format!(
                "invalid character {c:?} in baggage value '{value}' for key '{key}'"
            )));
        }
        Ok(Self { key, value })
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    members: Vec<BaggageMember>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `member`, replacing any member with the same key.
    pub fn set_member(&mut self, member: BaggageMember) {
        match self.members.iter_mut().find(|m| m.key == member.key) {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BaggageMember> {
        self.members.iter()
    }

    /// `key=value` pairs joined by `,`, as carried in a `baggage` header.
    pub fn header_value(&self) -> String {
        self.members
            .iter()
            .map(|m| format!("{}={}", m.key, m.value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '"' | ',' | ';' | '\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_validation() {
        assert!(BaggageMember::new("rig.task.id", "task_1").is_ok());
        assert!(BaggageMember::new("", "x").is_err());
        assert!(BaggageMember::new("bad key", "x").is_err());
        assert!(BaggageMember::new("k", "has space").is_err());
        assert!(BaggageMember::new("k", "a,b").is_err());
        assert!(BaggageMember::new("k", "").is_ok());
    }

    #[test]
    fn set_member_replaces_by_key() {
        let mut bag = Baggage::new();
        bag.set_member(BaggageMember::new("a", "1").unwrap());
        bag.set_member(BaggageMember::new("b", "2").unwrap());
        bag.set_member(BaggageMember::new("a", "3").unwrap());

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get("a"), Some("3"));
        assert_eq!(bag.header_value(), "a=3,b=2");
    }
}
