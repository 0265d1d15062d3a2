//! Well-known container metadata tags.
//!
//! The field set follows libavformat's documented tag names. Every field is
//! listed once in [`metadata_fields!`], which generates the struct and the
//! static key schema used by [`Metadata::to_map`] and [`Metadata::merge`].

use serde::{Deserialize, Serialize};

use crate::kvargs::Options;

macro_rules! metadata_fields {
    ($($(#[$doc:meta])* $field:ident),* $(,)?) => {
        /// Container or stream tags. Empty strings mean "unset".
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct Metadata {
            $($(#[$doc])* #[serde(skip_serializing_if = "String::is_empty")] pub $field: String,)*
        }

        impl Metadata {
            /// Tag keys in declaration order.
            pub const KEYS: &'static [&'static str] = &[$(stringify!($field)),*];

            fn entries(&self) -> Vec<(&'static str, &String)> {
                vec![$((stringify!($field), &self.$field)),*]
            }

            fn entries_mut(&mut self) -> Vec<(&'static str, &mut String)> {
                vec![$((stringify!($field), &mut self.$field)),*]
            }
        }
    };
}

metadata_fields! {
    /// Name of the set this work belongs to.
    album,
    /// Main creator of the set, if different from artist.
    album_artist,
    /// Main creator of the work.
    artist,
    comment,
    /// Who composed the work, if different from artist.
    composer,
    copyright,
    /// When the file was created, preferably ISO 8601.
    creation_time,
    /// When the work was created, preferably ISO 8601.
    date,
    /// Number of a subset, e.g. disc in a multi-disc collection.
    disc,
    /// Software or hardware that produced the file.
    encoder,
    /// Person or group who created the file.
    encoded_by,
    /// Original name of the file.
    filename,
    genre,
    /// Main language, preferably ISO 639-2. Several may be comma separated.
    language,
    /// Artist who performed the work, if different from artist.
    performer,
    publisher,
    /// Broadcast channel name.
    service_name,
    /// Broadcast service provider name.
    service_provider,
    title,
    /// Number in the set, possibly `current/total`.
    track,
    /// Total bitrate of the variant the stream is part of.
    variant_bitrate,
}

impl Metadata {
    /// Non-empty tags keyed by tag name.
    pub fn to_map(&self) -> Options {
        self.entries()
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Fill every empty tag of `self` from `other`.
    pub fn merge(mut self, other: &Metadata) -> Metadata {
        for ((_, mine), (_, theirs)) in self.entries_mut().into_iter().zip(other.entries()) {
            if mine.is_empty() {
                mine.clone_from(theirs);
            }
        }
        self
    }

    /// Look up a tag by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a tag by key. Returns `false` for unknown keys.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.entries_mut().into_iter().find(|(k, _)| *k == key) {
            Some((_, slot)) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, v)| v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_map_skips_empty() {
        let m = Metadata {
            title: "title".into(),
            comment: "note".into(),
            ..Default::default()
        };
        let map = m.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["title"], "title");
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["comment", "title"]);
    }

    #[test]
    fn merge_fills_only_empty_fields() {
        let a = Metadata {
            title: "mine".into(),
            ..Default::default()
        };
        let b = Metadata {
            title: "theirs".into(),
            artist: "someone".into(),
            ..Default::default()
        };
        let merged = a.merge(&b);
        assert_eq!(merged.title, "mine");
        assert_eq!(merged.artist, "someone");
    }

    #[test]
    fn keys_match_serde_names() {
        assert_eq!(Metadata::KEYS.len(), 21);
        let mut m = Metadata::default();
        for key in Metadata::KEYS {
            assert!(m.set(key, "x"), "{key}");
        }
        let json = serde_json::to_value(&m).unwrap();
        for key in Metadata::KEYS {
            assert_eq!(json[*key], "x");
        }
        assert!(!m.set("nope", "x"));
    }

    #[test]
    fn deserialize_ignores_unknown_tags() {
        let m: Metadata =
            serde_json::from_str(r#"{"language": "eng", "handler_name": "SoundHandler"}"#).unwrap();
        assert_eq!(m.get("language"), Some("eng"));
        assert!(!m.is_empty());
    }
}
