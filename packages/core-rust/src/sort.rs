//! Multi-column sort specification.
//!
//! A [`SortSpec`] is an insertion-ordered list of active columns; the first
//! entry is the primary key, the next the secondary, and so on. A column
//! that is "unset" is simply absent from the list.

use serde::{Deserialize, Serialize};

/// Sort direction for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Three-state cycle: unset -> ascending -> descending -> unset.
    #[must_use]
    pub fn cycle(current: Option<Self>) -> Option<Self> {
        match current {
            None => Some(Self::Asc),
            Some(Self::Asc) => Some(Self::Desc),
            Some(Self::Desc) => None,
        }
    }
}

/// One active sort column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

impl SortKey {
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Ordered mapping from column to direction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances `column` one step around the sort cycle.
    ///
    /// An existing column keeps its precedence when flipping to descending.
    /// A column removed and later re-added lands at the lowest precedence.
    /// Other columns are untouched.
    #[must_use]
    pub fn toggle(&self, column: &str) -> Self {
        let position = self.keys.iter().position(|k| k.column == column);
        let current = position.map(|i| self.keys[i].direction);

        let mut keys = self.keys.clone();
        match (position, SortDirection::cycle(current)) {
            (Some(i), Some(direction)) => keys[i].direction = direction,
            (Some(i), None) => {
                keys.remove(i);
            }
            (None, Some(direction)) => keys.push(SortKey {
                column: column.to_string(),
                direction,
            }),
            (None, None) => {}
        }
        Self { keys }
    }

    /// Current direction of `column`, `None` when unset.
    #[must_use]
    pub fn direction(&self, column: &str) -> Option<SortDirection> {
        self.keys
            .iter()
            .find(|k| k.column == column)
            .map(|k| k.direction)
    }

    /// Zero-based tie-break precedence of `column`, `None` when unset.
    #[must_use]
    pub fn precedence(&self, column: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.column == column)
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<SortKey> for SortSpec {
    /// Builds a spec from keys in precedence order. A repeated column keeps
    /// its first position and takes the last direction given.
    fn from_iter<I: IntoIterator<Item = SortKey>>(iter: I) -> Self {
        let mut keys: Vec<SortKey> = Vec::new();
        for key in iter {
            match keys.iter_mut().find(|k| k.column == key.column) {
                Some(existing) => existing.direction = key.direction,
                None => keys.push(key),
            }
        }
        Self { keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_toggles_cycle_back_to_unset() {
        let s0 = SortSpec::new();
        let s1 = s0.toggle("started");
        let s2 = s1.toggle("started");
        let s3 = s2.toggle("started");
        let seen: Vec<_> = [&s1, &s2, &s3]
            .iter()
            .map(|s| s.direction("started"))
            .collect();
        assert_eq!(
            seen,
            vec![Some(SortDirection::Asc), Some(SortDirection::Desc), None]
        );
        assert!(s3.is_empty());
    }

    #[test]
    fn toggling_one_column_leaves_others_untouched() {
        let spec = SortSpec::new().toggle("a").toggle("b").toggle("b");
        let spec = spec.toggle("a");
        assert_eq!(spec.keys(), &[SortKey::desc("a"), SortKey::desc("b")]);
    }

    #[test]
    fn readding_a_column_moves_it_to_lowest_precedence() {
        let spec = SortSpec::new().toggle("a").toggle("b");
        assert_eq!(spec.precedence("a"), Some(0));

        // a: asc -> desc -> unset, then re-added.
        let spec = spec.toggle("a").toggle("a").toggle("a");
        assert_eq!(spec.keys(), &[SortKey::asc("b"), SortKey::asc("a")]);
        assert_eq!(spec.precedence("a"), Some(1));
    }

    #[test]
    fn from_iter_dedupes_columns() {
        let spec: SortSpec = [SortKey::asc("a"), SortKey::asc("b"), SortKey::desc("a")]
            .into_iter()
            .collect();
        assert_eq!(spec.keys(), &[SortKey::desc("a"), SortKey::asc("b")]);
    }

    #[test]
    fn serializes_as_ordered_list() {
        let spec = SortSpec::new().toggle("b").toggle("a");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(
            json,
            r#"[{"column":"b","direction":"asc"},{"column":"a","direction":"asc"}]"#
        );
    }
}
