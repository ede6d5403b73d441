//! Canonical skeleton checksum.
//!
//! The server publishes a checksum alongside every skeleton version; the
//! client recomputes the same digest over its local graph after applying a
//! snapshot or delta and forces a full resync on mismatch.
//!
//! # Canonical form
//!
//! One line per relation row, sorted lexicographically before hashing, so the
//! digest is independent of map iteration order:
//!
//! ```text
//! album:<id>:<artist_id>,<artist_id>,...   (artist ids sorted)
//! artist:<id>
//! track:<id>:<album_id>
//! ```
//!
//! Lines are joined with `\n` and hashed with SHA-256; the digest is
//! lowercase hex.

use sha2::{Digest, Sha256};

/// Incremental builder for the canonical skeleton digest.
///
/// Feed every relation row in any order, then call [`SkeletonDigest::finish`].
#[derive(Debug, Default)]
pub struct SkeletonDigest {
    lines: Vec<String>,
}

impl SkeletonDigest {
    /// Creates an empty digest builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artist row.
    pub fn artist(&mut self, id: &str) {
        self.lines.push(format!("artist:{id}"));
    }

    /// Adds an album row with its contributing artist IDs.
    pub fn album(&mut self, id: &str, artist_ids: &[String]) {
        let mut artists: Vec<&str> = artist_ids.iter().map(String::as_str).collect();
        artists.sort_unstable();
        self.lines.push(format!("album:{id}:{}", artists.join(",")));
    }

    /// Adds a track row with its parent album ID.
    pub fn track(&mut self, id: &str, album_id: &str) {
        self.lines.push(format!("track:{id}:{album_id}"));
    }

    /// Sorts all rows, hashes them, and returns the lowercase hex digest.
    #[must_use]
    pub fn finish(mut self) -> String {
        self.lines.sort_unstable();
        let mut hasher = Sha256::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\n");
            }
            hasher.update(line.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn digest_of(rows: &[(&str, &str, &str)]) -> String {
        // (kind, id, extra) triples in the given order.
        let mut digest = SkeletonDigest::new();
        for (kind, id, extra) in rows {
            match *kind {
                "artist" => digest.artist(id),
                "album" => {
                    let artists: Vec<String> =
                        extra.split(',').map(str::to_string).collect();
                    digest.album(id, &artists);
                }
                "track" => digest.track(id, extra),
                other => panic!("unexpected row kind {other}"),
            }
        }
        digest.finish()
    }

    #[test]
    fn empty_digest_is_stable() {
        assert_eq!(SkeletonDigest::new().finish(), digest_of(&[]));
    }

    #[test]
    fn row_order_does_not_matter() {
        let forward = digest_of(&[
            ("artist", "a1", ""),
            ("album", "b1", "a1"),
            ("track", "t1", "b1"),
        ]);
        let reversed = digest_of(&[
            ("track", "t1", "b1"),
            ("album", "b1", "a1"),
            ("artist", "a1", ""),
        ]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn album_artist_order_does_not_matter() {
        let mut first = SkeletonDigest::new();
        first.album("b1", &["a2".to_string(), "a1".to_string()]);
        let mut second = SkeletonDigest::new();
        second.album("b1", &["a1".to_string(), "a2".to_string()]);
        assert_eq!(first.finish(), second.finish());
    }

    #[test]
    fn different_graphs_differ() {
        let one = digest_of(&[("artist", "a1", "")]);
        let other = digest_of(&[("artist", "a2", "")]);
        assert_ne!(one, other);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let digest = digest_of(&[("artist", "a1", "")]);
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn permutation_invariance(
            artists in proptest::collection::vec("[a-z0-9]{1,8}", 0..16),
            seed in any::<u64>(),
        ) {
            let mut shuffled = artists.clone();
            // Cheap deterministic shuffle driven by the seed.
            let len = shuffled.len();
            if len > 1 {
                for i in 0..len {
                    #[allow(clippy::cast_possible_truncation)]
                    let j = ((seed.rotate_left(i as u32) as usize) % len).min(len - 1);
                    shuffled.swap(i, j);
                }
            }

            let mut forward = SkeletonDigest::new();
            for id in &artists {
                forward.artist(id);
            }
            let mut permuted = SkeletonDigest::new();
            for id in &shuffled {
                permuted.artist(id);
            }
            prop_assert_eq!(forward.finish(), permuted.finish());
        }
    }
}
