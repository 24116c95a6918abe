//! Tag and Group Indices
//!
//! Tags are maintained by the store alongside each entry's own tag set and
//! disappear with their last member. Groups are administrative key lists
//! managed by callers; the engine only reads them when a group is deleted.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Tags ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheTag {
    pub name: String,
    pub keys: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TagIndex {
    tags: HashMap<String, CacheTag>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tag: &str, key: &str) {
        self.tags
            .entry(tag.to_string())
            .or_insert_with(|| CacheTag {
                name: tag.to_string(),
                keys: BTreeSet::new(),
                created_at: Utc::now(),
            })
            .keys
            .insert(key.to_string());
    }

    /// Removes `key` from `tag`, dropping the tag once it is empty.
    pub fn remove(&mut self, tag: &str, key: &str) {
        if let Some(entry) = self.tags.get_mut(tag) {
            entry.keys.remove(key);
            if entry.keys.is_empty() {
                self.tags.remove(tag);
            }
        }
    }

    pub fn members(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|t| t.keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, tag: &str) -> Option<&CacheTag> {
        self.tags.get(tag)
    }

    pub fn remove_tag(&mut self, tag: &str) -> Option<CacheTag> {
        self.tags.remove(tag)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }
}

// == Groups ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheGroup {
    pub name: String,
    pub keys: BTreeSet<String>,
    /// Advisory configuration payload, not applied to members
    pub config: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, CacheGroup>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        name: &str,
        keys: impl IntoIterator<Item = String>,
        config: Option<Value>,
    ) -> Result<CacheGroup> {
        if self.groups.contains_key(name) {
            return Err(CacheError::GroupExists(name.to_string()));
        }
        let group = CacheGroup {
            name: name.to_string(),
            keys: keys.into_iter().collect(),
            config,
            created_at: Utc::now(),
        };
        self.groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn add_keys(&mut self, name: &str, keys: impl IntoIterator<Item = String>) -> Result<()> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| CacheError::GroupNotFound(name.to_string()))?;
        group.keys.extend(keys);
        Ok(())
    }

    pub fn remove_keys<'a>(
        &mut self,
        name: &str,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| CacheError::GroupNotFound(name.to_string()))?;
        for key in keys {
            group.keys.remove(key);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CacheGroup> {
        self.groups.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<CacheGroup> {
        self.groups.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_dropped_with_last_member() {
        let mut index = TagIndex::new();
        index.add("users", "user:1");
        index.add("users", "user:2");
        assert_eq!(index.members("users"), vec!["user:1", "user:2"]);

        index.remove("users", "user:1");
        assert_eq!(index.tag_count(), 1);
        index.remove("users", "user:2");
        assert!(index.get("users").is_none());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_remove_from_unknown_tag_is_noop() {
        let mut index = TagIndex::new();
        index.remove("missing", "key");
        assert!(index.members("missing").is_empty());
    }

    #[test]
    fn test_group_lifecycle() {
        let mut groups = GroupRegistry::new();
        let group = groups
            .create("hot", vec!["a".to_string()], Some(json!({"ttl": 10})))
            .unwrap();
        assert_eq!(group.keys.len(), 1);

        assert!(matches!(
            groups.create("hot", Vec::new(), None),
            Err(CacheError::GroupExists(_))
        ));

        groups.add_keys("hot", vec!["b".to_string()]).unwrap();
        groups.remove_keys("hot", ["a"]).unwrap();
        let keys: Vec<_> = groups.get("hot").unwrap().keys.iter().cloned().collect();
        assert_eq!(keys, vec!["b"]);

        assert!(groups.remove("hot").is_some());
        assert!(matches!(
            groups.add_keys("hot", Vec::new()),
            Err(CacheError::GroupNotFound(_))
        ));
    }
}
