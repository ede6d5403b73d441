//! Chorus Core -- catalog entity types, wire schemas, clock, and checksums.
//!
//! This crate provides the runtime-free foundation layer for the Chorus
//! music-library client:
//!
//! - **Clock** ([`clock`]): injectable wall-clock source for deterministic tests
//! - **Types** ([`types`]): `Artist`, `Album`, `Track`, the `Entity` sum type,
//!   and the `ItemKind`/`ArtistKind`/`Availability` tags
//! - **Messages** ([`messages`]): JSON wire schemas for the skeleton delta
//!   protocol, the user-data event log, and the push envelope
//! - **Checksum** ([`checksum`]): canonical order-insensitive skeleton digest

pub mod checksum;
pub mod clock;
pub mod messages;
pub mod types;

// Clock
pub use clock::{ClockSource, SystemClock};

// Checksum
pub use checksum::SkeletonDigest;

// Types
pub use types::{Album, Artist, ArtistKind, Availability, Disc, Entity, ItemKind, Track};
