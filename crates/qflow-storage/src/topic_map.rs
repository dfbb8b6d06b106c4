//! Topic Registry
//!
//! Filenames carry a topic string instead of the numeric `topic_id`. A
//! [`TopicMap`] provides that string. It must be stable: the same id has to
//! map to the same string for the lifetime of an archive, or queries by topic
//! will miss files.

use std::collections::HashMap;

/// Maps a numeric topic id to the string used in archive filenames
pub trait TopicMap: Send + Sync {
    fn topic_string(&self, topic_id: u64) -> String;
}

/// Hex rendering of a topic id, as used in filenames and topic patterns
pub fn hex_topic_string(topic_id: u64) -> String {
    format!("{:#018x}", topic_id)
}

/// Renders every topic id as `0x` plus 16 hex digits
#[derive(Debug, Clone, Copy, Default)]
pub struct HexTopicMap;

impl TopicMap for HexTopicMap {
    fn topic_string(&self, topic_id: u64) -> String {
        hex_topic_string(topic_id)
    }
}

/// Fixed names for known topics, hex for everything else
#[derive(Debug, Clone, Default)]
pub struct StaticTopicMap {
    names: HashMap<u64, String>,
}

impl StaticTopicMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic_id: u64, name: impl Into<String>) -> Self {
        self.insert(topic_id, name);
        self
    }

    pub fn insert(&mut self, topic_id: u64, name: impl Into<String>) {
        self.names.insert(topic_id, name.into());
    }
}

impl FromIterator<(u64, String)> for StaticTopicMap {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl TopicMap for StaticTopicMap {
    fn topic_string(&self, topic_id: u64) -> String {
        self.names
            .get(&topic_id)
            .cloned()
            .unwrap_or_else(|| hex_topic_string(topic_id))
    }
}
