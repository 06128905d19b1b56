//! Associative containers with chained, read-through scopes.
//!
//! This module provides [ChainMap], a map in which bindings live in nested
//! _scopes_. A scope is opened with [begin_scope](ChainMap::begin_scope)
//! and closed with [end_scope](ChainMap::end_scope). Lookups read through
//! the chain of enclosing scopes: a binding made in an inner scope shadows
//! a binding for the same key in an outer scope, and closing the inner
//! scope discards its bindings, un-shadowing the outer ones.
//!
//! Scopes are stored in an arena of records, each holding its own table
//! and the index of its enclosing scope. Lookups never write through to an
//! enclosing record.
//!
//! # Examples
//!
//! The basic associative methods resemble the standard hash map.
//! ```
//! # use vellum_stdext::collections::chainmap::ChainMap;
//! let mut cat_colors = ChainMap::default();
//! cat_colors.insert("mint", "ginger");
//! assert_eq!(cat_colors.get(&"mint"), Some(&"ginger"));
//! ```
//! Bindings made inside a scope are discarded when the scope ends.
//! ```
//! # use vellum_stdext::collections::chainmap::ChainMap;
//! let mut cat_colors = ChainMap::default();
//! cat_colors.insert("paganini", "black");
//! cat_colors.begin_scope();
//! cat_colors.insert("paganini", "gray");
//! assert_eq!(cat_colors.get(&"paganini"), Some(&"gray"));
//! assert_eq!(cat_colors.end_scope(), Ok(()));
//! assert_eq!(cat_colors.get(&"paganini"), Some(&"black"));
//! ```
//! The `end_scope` method returns an error if only the root scope remains.
//! ```
//! # use vellum_stdext::collections::chainmap::{ChainMap, NoScopeToEndError};
//! let mut cat_colors = ChainMap::<String, String>::default();
//! assert_eq!(cat_colors.end_scope(), Err(NoScopeToEndError{}));
//! ```
//! There is also a global variant of the insert method. It binds the key in
//! the root scope and erases every shadowing binding, so the new value is
//! visible even after all open scopes end.
//! ```
//! # use vellum_stdext::collections::chainmap::ChainMap;
//! let mut cat_colors = ChainMap::default();
//! cat_colors.insert("paganini", "black");
//! cat_colors.begin_scope();
//! cat_colors.insert_global("paganini", "gray");
//! assert_eq!(cat_colors.end_scope(), Ok(()));
//! assert_eq!(cat_colors.get(&"paganini"), Some(&"gray"));
//! ```

use std::collections::HashMap;
use std::hash::Hash;

/// A map with chained, read-through scopes.
///
/// See the module docs for more information.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainMap<K, V> {
    #[cfg_attr(
        feature = "serde",
        serde(bound(
            deserialize = "K: Eq + Hash + serde::Deserialize<'de>, V: serde::Deserialize<'de>"
        ))
    )]
    records: Vec<Record<K, V>>,
}

#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Record<K, V> {
    #[cfg_attr(
        feature = "serde",
        serde(bound(
            deserialize = "K: Eq + Hash + serde::Deserialize<'de>, V: serde::Deserialize<'de>"
        ))
    )]
    table: HashMap<K, V>,
    enclosing: Option<usize>,
}

/// Error returned by [ChainMap::end_scope] when only the root scope remains.
#[derive(Debug, PartialEq, Eq)]
pub struct NoScopeToEndError;

impl<K, V> Default for ChainMap<K, V> {
    fn default() -> Self {
        Self {
            records: vec![Record {
                table: HashMap::new(),
                enclosing: None,
            }],
        }
    }
}

impl<K: Eq + Hash, V> ChainMap<K, V> {
    /// Bind the key in the innermost scope, shadowing (never overwriting)
    /// any binding in an enclosing scope.
    pub fn insert(&mut self, key: K, value: V) {
        self.records
            .last_mut()
            .expect("the root scope always exists")
            .table
            .insert(key, value);
    }

    /// Bind the key in the root scope and remove every shadowing binding.
    pub fn insert_global(&mut self, key: K, value: V) {
        for record in &mut self.records[1..] {
            record.table.remove(&key);
        }
        self.records[0].table.insert(key, value);
    }

    /// Look the key up through the scope chain, innermost scope first.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut index = self.records.len() - 1;
        loop {
            let record = &self.records[index];
            if let Some(value) = record.table.get(key) {
                return Some(value);
            }
            index = record.enclosing?;
        }
    }

    /// Look the key up in the innermost scope only.
    pub fn get_local(&self, key: &K) -> Option<&V> {
        self.records
            .last()
            .expect("the root scope always exists")
            .table
            .get(key)
    }

    /// Open a new scope enclosed by the current one.
    pub fn begin_scope(&mut self) {
        // A fresh HashMap does not allocate, so an empty scope is cheap.
        let enclosing = Some(self.records.len() - 1);
        self.records.push(Record {
            table: HashMap::new(),
            enclosing,
        });
    }

    /// Close the innermost scope, discarding its bindings.
    ///
    /// Returns an error if only the root scope remains.
    pub fn end_scope(&mut self) -> Result<(), NoScopeToEndError> {
        if self.records.len() == 1 {
            return Err(NoScopeToEndError {});
        }
        self.records.pop();
        Ok(())
    }

    /// The number of open scopes, including the root scope.
    pub fn depth(&self) -> usize {
        self.records.len()
    }

    /// Iterate over the (key, value) pairs of the innermost scope.
    pub fn iter_local(&self) -> impl Iterator<Item = (&K, &V)> {
        self.records
            .last()
            .expect("the root scope always exists")
            .table
            .iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_through_to_enclosing_scope() {
        let mut map = ChainMap::default();
        map.insert(1, "a");
        map.begin_scope();
        assert_eq!(map.get(&1), Some(&"a"));
        map.begin_scope();
        assert_eq!(map.get(&1), Some(&"a"));
    }

    #[test]
    fn shadowing_is_not_overwriting() {
        let mut map = ChainMap::default();
        map.insert(1, "a");
        map.begin_scope();
        map.insert(1, "b");
        assert_eq!(map.get(&1), Some(&"b"));
        assert_eq!(map.end_scope(), Ok(()));
        assert_eq!(map.get(&1), Some(&"a"));
    }

    #[test]
    fn binding_discarded_at_end_of_scope() {
        let mut map = ChainMap::default();
        map.begin_scope();
        map.insert(3, 5);
        assert_eq!(map.end_scope(), Ok(()));
        assert_eq!(map.get(&3), None);
        map.insert(3, 4);
        assert_eq!(map.get(&3), Some(&4));
    }

    #[test]
    fn global_insert_erases_shadows() {
        let mut map = ChainMap::default();
        map.insert(1, "a");
        map.begin_scope();
        map.insert(1, "b");
        map.begin_scope();
        map.insert_global(1, "c");
        assert_eq!(map.get(&1), Some(&"c"));
        assert_eq!(map.end_scope(), Ok(()));
        assert_eq!(map.get(&1), Some(&"c"));
        assert_eq!(map.end_scope(), Ok(()));
        assert_eq!(map.get(&1), Some(&"c"));
    }

    #[test]
    fn global_insert_with_no_prior_binding() {
        let mut map = ChainMap::default();
        map.begin_scope();
        map.insert_global(3, 5);
        assert_eq!(map.end_scope(), Ok(()));
        assert_eq!(map.get(&3), Some(&5));
    }

    #[test]
    fn local_lookup_ignores_enclosing_scopes() {
        let mut map = ChainMap::default();
        map.insert(1, "a");
        map.begin_scope();
        assert_eq!(map.get_local(&1), None);
        map.insert(1, "b");
        assert_eq!(map.get_local(&1), Some(&"b"));
    }

    #[test]
    fn depth_tracks_scopes() {
        let mut map = ChainMap::<u32, u32>::default();
        assert_eq!(map.depth(), 1);
        map.begin_scope();
        map.begin_scope();
        assert_eq!(map.depth(), 3);
        map.end_scope().unwrap();
        assert_eq!(map.depth(), 2);
    }
}
