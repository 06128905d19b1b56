//! String interning
//!
//! A string interner represents strings as small integer keys.
//! Only one copy of each distinct string is stored, the key type is small
//! and cache friendly, and key comparisons are cheap.
//! The cost (at least as implemented here) is that an interned string is
//! never deallocated.
//!
//! Strings are interned with [get_or_intern](Interner::get_or_intern),
//! which returns a _key_; interning the same string twice returns the same
//! key. The original string is recovered with [resolve](Interner::resolve).
//!
//! ```
//! # use vellum_stdext::collections::interner::Interner;
//! let mut interner: Interner = Default::default();
//! let hello_1 = interner.get_or_intern("hello");
//! let world_1 = interner.get_or_intern("world");
//! let hello_2 = interner.get_or_intern("hello");
//! assert_eq!(hello_1, hello_2);
//! assert_ne!(hello_1, world_1);
//!
//! assert_eq!(interner.resolve(hello_1), Some("hello"));
//! assert_eq!(interner.resolve(world_1), Some("world"));
//!
//! assert_eq!(interner.get("hello"), Some(hello_1));
//! assert_eq!(interner.get("other"), None);
//! ```
//!
//! ## The implementation
//!
//! The interner maintains a single [String] buffer; each newly interned
//! string is appended to the buffer and the buffer length after the append
//! (the string's end index) is pushed onto a vector of indices. The key of
//! a string is the position of its end index in that vector. To resolve a
//! key, the start index is read from the previous vector entry and the
//! string is the corresponding buffer slice.
//!
//! Deduplication is done with a map keyed on the [u64] hash of each
//! string, computed outside the map. Two strings can collide on the hash,
//! so the map value is a small vector of all keys with that hash; lookups
//! walk the vector and compare resolved strings. Collisions are rare, so
//! the walk is almost always a single step.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::num;

/// Trait satisfied by types that can be used as interner keys.
pub trait Key: Copy {
    /// Build a key from a `usize`, or return `None` if the value is out of
    /// range for the key type.
    fn try_from_usize(index: usize) -> Option<Self>
    where
        Self: Sized;

    /// Convert the key back to a `usize`.
    fn into_usize(self) -> usize;
}

impl Key for num::NonZeroU32 {
    fn try_from_usize(index: usize) -> Option<Self> {
        let u: u32 = match (index.wrapping_add(1)).try_into() {
            Ok(u) => u,
            Err(_) => return None,
        };
        num::NonZeroU32::new(u)
    }

    fn into_usize(self) -> usize {
        (self.get() - 1) as usize
    }
}

/// String interner.
///
/// See the module documentation for information about this data structure.
pub struct Interner<K = num::NonZeroU32, S = RandomState> {
    buffer: String,
    ends: Vec<usize>,
    // The dedup map is not serialized: the hash builder of a deserialized
    // interner is in general different, so the map is rebuilt instead.
    dedup: HashMap<u64, Vec<K>>,
    hash_builder: S,
}

impl<K, S: Default> Default for Interner<K, S> {
    fn default() -> Self {
        Self {
            buffer: Default::default(),
            ends: Default::default(),
            dedup: Default::default(),
            hash_builder: Default::default(),
        }
    }
}

impl<K: Key, S: BuildHasher> Interner<K, S> {
    /// Intern the provided string and return its key.
    pub fn get_or_intern(&mut self, s: &str) -> K {
        let hash = hash_str(&self.hash_builder, s);
        if let Some(keys) = self.dedup.get(&hash) {
            for key in keys {
                if self.resolve_impl(*key) == Some(s) {
                    return *key;
                }
            }
        }
        self.buffer.push_str(s);
        self.ends.push(self.buffer.len());
        let key = K::try_from_usize(self.ends.len() - 1)
            .expect("interner key space exhausted");
        self.dedup.entry(hash).or_default().push(key);
        key
    }

    /// Return the key for the provided string if it has been interned.
    pub fn get(&self, s: &str) -> Option<K> {
        let hash = hash_str(&self.hash_builder, s);
        for key in self.dedup.get(&hash)? {
            if self.resolve_impl(*key) == Some(s) {
                return Some(*key);
            }
        }
        None
    }

    /// Resolve a key to the string it was created from.
    pub fn resolve(&self, key: K) -> Option<&str> {
        self.resolve_impl(key)
    }

    fn resolve_impl(&self, key: K) -> Option<&str> {
        let index = key.into_usize();
        let &end = self.ends.get(index)?;
        let start = match index {
            0 => 0,
            _ => self.ends[index - 1],
        };
        Some(&self.buffer[start..end])
    }

    /// Return the number of interned strings.
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    /// Return whether no strings have been interned.
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }
}

fn hash_str<S: BuildHasher>(hash_builder: &S, s: &str) -> u64 {
    let mut hasher = hash_builder.build_hasher();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(feature = "serde")]
impl<K, S> serde::Serialize for Interner<K, S> {
    fn serialize<Ser: serde::Serializer>(
        &self,
        serializer: Ser,
    ) -> Result<Ser::Ok, Ser::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Interner", 2)?;
        s.serialize_field("buffer", &self.buffer)?;
        s.serialize_field("ends", &self.ends)?;
        s.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, K: Key, S: Default + BuildHasher> serde::Deserialize<'de> for Interner<K, S> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct DeserializedInterner {
            buffer: String,
            ends: Vec<usize>,
        }
        let DeserializedInterner { buffer, ends } =
            DeserializedInterner::deserialize(deserializer)?;
        let hash_builder = S::default();
        let mut dedup = HashMap::<u64, Vec<K>>::default();
        let mut start: usize = 0;
        for (i, end) in ends.iter().enumerate() {
            let s = &buffer[start..*end];
            let hash = hash_str(&hash_builder, s);
            let key = K::try_from_usize(i).unwrap();
            dedup.entry(hash).or_default().push(key);
            start = *end;
        }
        Ok(Self {
            buffer,
            ends,
            dedup,
            hash_builder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A build hasher whose hashers always return the same value.
    /// This is used to test hash collisions.
    #[derive(Default)]
    struct FixedBuildHasher;

    struct FixedHasher;

    impl Hasher for FixedHasher {
        fn finish(&self) -> u64 {
            12
        }
        fn write(&mut self, _: &[u8]) {}
    }

    impl BuildHasher for FixedBuildHasher {
        type Hasher = FixedHasher;
        fn build_hasher(&self) -> FixedHasher {
            FixedHasher
        }
    }

    #[test]
    fn hash_collision() {
        let mut interner: Interner<num::NonZeroU32, FixedBuildHasher> = Default::default();
        let hello_1 = interner.get_or_intern("hello");
        let world_1 = interner.get_or_intern("world");
        let hello_2 = interner.get_or_intern("hello");
        assert_eq!(hello_1, hello_2);
        assert_ne!(hello_1, world_1);

        assert_eq!(interner.resolve(hello_1), Some("hello"));
        assert_eq!(interner.resolve(world_1), Some("world"));
        assert_eq!(interner.get("hello"), Some(hello_1));
        assert_eq!(interner.get("missing"), None);
    }

    #[test]
    fn empty_string() {
        let mut interner: Interner = Default::default();
        let empty = interner.get_or_intern("");
        let hello = interner.get_or_intern("hello");
        assert_eq!(interner.resolve(empty), Some(""));
        assert_eq!(interner.resolve(hello), Some("hello"));
        assert_eq!(interner.get_or_intern(""), empty);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_round_trip() {
        let mut interner: Interner = Default::default();
        let hello_1 = interner.get_or_intern("hello");
        let world_1 = interner.get_or_intern("world");

        let serialized = serde_json::to_string_pretty(&interner).unwrap();
        let mut interner_de: Interner = serde_json::from_str(&serialized).unwrap();
        let hello_2 = interner_de.get_or_intern("hello");
        let world_2 = interner_de.get_or_intern("world");

        assert_eq!(hello_1, hello_2);
        assert_eq!(world_1, world_2);
    }
}
