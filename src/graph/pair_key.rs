use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the two ids of a pair key. Paper ids may not contain it.
pub const PAIR_KEY_SEPARATOR: char = '|';

/// Canonical key of an unordered paper pair.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)`: the ids are sorted
/// lexicographically before joining, so both evaluation orders of a pair land
/// on the same storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairKey(String);

impl PairKey {
    pub fn new(a_id: &str, b_id: &str) -> Self {
        let (low, high) = if a_id <= b_id { (a_id, b_id) } else { (b_id, a_id) };
        let mut key = String::with_capacity(low.len() + high.len() + 1);
        key.push_str(low);
        key.push(PAIR_KEY_SEPARATOR);
        key.push_str(high);
        PairKey(key)
    }

    /// Wrap a key read back from storage.
    pub(crate) fn from_stored(key: String) -> Self {
        PairKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two ids, lexicographically smaller first.
    pub fn ids(&self) -> (&str, &str) {
        self.0
            .split_once(PAIR_KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
