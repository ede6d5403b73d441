//! Static catalog entity types.
//!
//! Artists, albums, and tracks are server-authoritative and immutable on the
//! client: they are fetched by opaque ID, cached, and never mutated locally.
//! All IDs are opaque printable strings; equality is byte-exact.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminant for the three static entity kinds.
///
/// Used as the type tag on fetch-state records and as the dispatch key for
/// per-kind transport calls.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Artist,
    Album,
    Track,
}

impl ItemKind {
    /// Stable lowercase name, used in persisted keys and URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Artist => "artist",
            ItemKind::Album => "album",
            ItemKind::Track => "track",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an artist is a single performer or a group with members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistKind {
    Individual,
    Band,
}

/// Playback availability of a track as declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
    /// Present in the catalog but not yet ingested; may become available later.
    Pending,
}

/// An artist: either an individual or a band with member references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub kind: ArtistKind,
    /// Member artist IDs. Only meaningful for `ArtistKind::Band`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_ids: Option<Vec<String>>,
}

/// One disc of an album: a named, ordered list of track IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disc {
    pub name: String,
    pub track_ids: Vec<String>,
}

/// An album with its disc/track layout and contributing artists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub release_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub artist_ids: Vec<String>,
    pub discs: Vec<Disc>,
}

/// A single track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub album_id: String,
    pub artist_ids: Vec<String>,
    pub duration_seconds: u32,
    pub availability: Availability,
}

/// Sum of the three static entity kinds.
///
/// The polymorphic read path dispatches on [`Entity::kind`] instead of
/// trait objects: the set of kinds is closed and server-defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Artist(Artist),
    Album(Album),
    Track(Track),
}

impl Entity {
    /// The entity's opaque ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Entity::Artist(a) => &a.id,
            Entity::Album(a) => &a.id,
            Entity::Track(t) => &t.id,
        }
    }

    /// The entity's kind tag.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Entity::Artist(_) => ItemKind::Artist,
            Entity::Album(_) => ItemKind::Album,
            Entity::Track(_) => ItemKind::Track,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_album() -> Album {
        Album {
            id: "alb-1".to_string(),
            name: "First Light".to_string(),
            release_date: "2019-04-12".to_string(),
            image_id: Some("img-9".to_string()),
            artist_ids: vec!["art-1".to_string(), "art-2".to_string()],
            discs: vec![Disc {
                name: "Disc 1".to_string(),
                track_ids: vec!["trk-1".to_string(), "trk-2".to_string()],
            }],
        }
    }

    #[test]
    fn artist_json_round_trip() {
        let artist = Artist {
            id: "art-1".to_string(),
            display_name: "The Sundials".to_string(),
            image_id: None,
            kind: ArtistKind::Band,
            members_ids: Some(vec!["art-7".to_string()]),
        };
        let json = serde_json::to_string(&artist).unwrap();
        let back: Artist = serde_json::from_str(&json).unwrap();
        assert_eq!(artist, back);
        // Absent image_id is omitted, not serialized as null.
        assert!(!json.contains("image_id"));
    }

    #[test]
    fn artist_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ArtistKind::Individual).unwrap(),
            "\"individual\""
        );
        assert_eq!(serde_json::to_string(&ArtistKind::Band).unwrap(), "\"band\"");
    }

    #[test]
    fn entity_tagged_round_trip() {
        let entity = Entity::Album(sample_album());
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"type\":\"album\""));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, back);
    }

    #[test]
    fn entity_accessors() {
        let entity = Entity::Album(sample_album());
        assert_eq!(entity.id(), "alb-1");
        assert_eq!(entity.kind(), ItemKind::Album);
        assert_eq!(entity.kind().as_str(), "album");
    }

    #[test]
    fn track_availability_wire_names() {
        let track = Track {
            id: "trk-1".to_string(),
            name: "Overture".to_string(),
            album_id: "alb-1".to_string(),
            artist_ids: vec!["art-1".to_string()],
            duration_seconds: 214,
            availability: Availability::Pending,
        };
        let json = serde_json::to_string(&track).unwrap();
        assert!(json.contains("\"availability\":\"pending\""));
    }
}
