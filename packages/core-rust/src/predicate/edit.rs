//! Structural editing of predicate trees.
//!
//! Children are addressed by position ([`NodePath`]) rather than by value,
//! since siblings can be structurally identical. Every edit rebuilds the
//! path from the edited node up to the root and collapses each rebuilt
//! `And`/`Or` level: an interior node left with no children disappears
//! (propagating upward), one left with a single child is replaced by it.
//! A `Not` whose child is removed disappears as well.

use std::fmt;

use super::{Bindable, CompareOp, Comparison, Predicate};

/// Position of a node: child indices from the root. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns the path of this node's `index`-th child.
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, index: usize) {
        self.0.push(index);
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl From<Vec<usize>> for NodePath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

/// Errors from structural edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("no predicate node at {path}")]
    InvalidPath { path: NodePath },
    #[error("predicate node at {path} is not a comparison")]
    NotAComparison { path: NodePath },
    #[error("predicate node at {path} has unknown kind {kind:?} and cannot be descended into")]
    UnknownNode { path: NodePath, kind: String },
}

/// Looks up the node at `path`.
#[must_use]
pub fn get<'a>(root: &'a Predicate, path: &NodePath) -> Option<&'a Predicate> {
    path.indices()
        .iter()
        .try_fold(root, |node, &index| node.children().get(index))
}

/// Replaces (or, with `None`, removes) the node at `path` and returns the new root.
///
/// The replacement is normalized first, so a degenerate `And`/`Or` passed
/// in is collapsed like any rebuilt level. A `None` result means the whole
/// tree collapsed away.
///
/// # Errors
///
/// Returns [`EditError::InvalidPath`] if `path` does not address a node, and
/// [`EditError::UnknownNode`] if it runs through an unknown node.
pub fn replace_at(
    root: &Predicate,
    path: &NodePath,
    replacement: Option<Predicate>,
) -> Result<Option<Predicate>, EditError> {
    let replacement = replacement.and_then(|p| p.normalized());
    replace_in(root, path.indices(), path, replacement)
}

fn replace_in(
    node: &Predicate,
    rest: &[usize],
    full: &NodePath,
    replacement: Option<Predicate>,
) -> Result<Option<Predicate>, EditError> {
    let Some((&index, tail)) = rest.split_first() else {
        return Ok(replacement);
    };
    let invalid = || EditError::InvalidPath { path: full.clone() };

    match node {
        Predicate::And(children) | Predicate::Or(children) => {
            let child = children.get(index).ok_or_else(invalid)?;
            let replaced = replace_in(child, tail, full, replacement)?;

            let mut next = Vec::with_capacity(children.len());
            next.extend_from_slice(&children[..index]);
            next.extend(replaced);
            next.extend_from_slice(&children[index + 1..]);

            Ok(if matches!(node, Predicate::And(_)) {
                Predicate::and(next)
            } else {
                Predicate::or(next)
            })
        }
        Predicate::Not(child) => {
            if index != 0 {
                return Err(invalid());
            }
            Ok(replace_in(child, tail, full, replacement)?.map(Predicate::not))
        }
        Predicate::Compare(_) => Err(invalid()),
        Predicate::Unknown(unknown) => Err(EditError::UnknownNode {
            path: full.clone(),
            kind: unknown.kind.clone(),
        }),
    }
}

impl Predicate {
    /// Replaces this node's `index`-th child; see [`replace_at`].
    ///
    /// # Errors
    ///
    /// Returns [`EditError::InvalidPath`] if there is no such child.
    pub fn replace_child(
        &self,
        index: usize,
        replacement: Option<Predicate>,
    ) -> Result<Option<Predicate>, EditError> {
        replace_at(self, &NodePath::root().child(index), replacement)
    }
}

/// Changes the operation of the comparison at `path`.
///
/// # Errors
///
/// Returns [`EditError::NotAComparison`] if the node is not a `Compare`, or
/// the errors of [`replace_at`].
pub fn set_operation(
    root: &Predicate,
    path: &NodePath,
    operation: CompareOp,
) -> Result<Predicate, EditError> {
    edit_comparison(root, path, |cmp| cmp.with_operation(operation))
}

/// Changes the right-hand side of the comparison at `path`.
///
/// # Errors
///
/// Returns [`EditError::NotAComparison`] if the node is not a `Compare`, or
/// the errors of [`replace_at`].
pub fn set_bindable(
    root: &Predicate,
    path: &NodePath,
    value: Bindable,
) -> Result<Predicate, EditError> {
    edit_comparison(root, path, |cmp| cmp.with_value(value))
}

fn edit_comparison<F>(root: &Predicate, path: &NodePath, edit: F) -> Result<Predicate, EditError>
where
    F: FnOnce(&Comparison) -> Comparison,
{
    let node = get(root, path).ok_or_else(|| EditError::InvalidPath { path: path.clone() })?;
    let Predicate::Compare(cmp) = node else {
        return Err(EditError::NotAComparison { path: path.clone() });
    };
    let edited = Predicate::Compare(edit(cmp));
    // Replacing with a present node never empties a level.
    replace_at(root, path, Some(edited))?
        .ok_or_else(|| EditError::InvalidPath { path: path.clone() })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rmpv::Value as Raw;

    use super::super::UnknownPredicate;
    use super::*;

    fn eq(location: &str, value: i64) -> Predicate {
        Predicate::compare(location, CompareOp::Eq, Bindable::literal(value))
    }

    fn path(indices: &[usize]) -> NodePath {
        NodePath::from(indices.to_vec())
    }

    #[test]
    fn removing_one_of_two_children_flattens_parent() {
        let tree = Predicate::And(vec![eq("a", 1), eq("b", 2)]);
        assert_eq!(tree.replace_child(0, None).unwrap(), Some(eq("b", 2)));
    }

    #[test]
    fn removing_last_child_propagates_absence_upward() {
        let tree = Predicate::And(vec![
            Predicate::Or(vec![eq("a", 1), eq("b", 2)]),
            eq("c", 3),
        ]);
        // Drop both children of the inner Or: its parent And collapses to `c`.
        let step = replace_at(&tree, &path(&[0, 0]), None).unwrap().unwrap();
        assert_eq!(step, Predicate::And(vec![eq("b", 2), eq("c", 3)]));
        let step = replace_at(&step, &path(&[0]), None).unwrap();
        assert_eq!(step, Some(eq("c", 3)));
    }

    #[test]
    fn identical_siblings_are_addressed_by_position() {
        let tree = Predicate::Or(vec![eq("a", 1), eq("a", 1), eq("b", 2)]);
        let edited = tree.replace_child(1, None).unwrap().unwrap();
        assert_eq!(edited, Predicate::Or(vec![eq("a", 1), eq("b", 2)]));
    }

    #[test]
    fn removing_not_child_removes_not() {
        let tree = Predicate::And(vec![Predicate::not(eq("a", 1)), eq("b", 2)]);
        let edited = replace_at(&tree, &path(&[0, 0]), None).unwrap();
        assert_eq!(edited, Some(eq("b", 2)));
    }

    #[test]
    fn not_has_a_single_slot() {
        let tree = Predicate::not(eq("a", 1));
        assert_eq!(
            tree.replace_child(1, None),
            Err(EditError::InvalidPath { path: path(&[1]) })
        );
    }

    #[test]
    fn root_replacement_returns_replacement() {
        let tree = eq("a", 1);
        assert_eq!(replace_at(&tree, &NodePath::root(), None).unwrap(), None);
        assert_eq!(
            replace_at(&tree, &NodePath::root(), Some(eq("z", 9))).unwrap(),
            Some(eq("z", 9))
        );
    }

    #[test]
    fn out_of_range_and_leaf_paths_are_rejected() {
        let tree = Predicate::And(vec![eq("a", 1), eq("b", 2)]);
        assert!(matches!(
            replace_at(&tree, &path(&[5]), None),
            Err(EditError::InvalidPath { .. })
        ));
        assert!(matches!(
            replace_at(&tree, &path(&[0, 0]), None),
            Err(EditError::InvalidPath { .. })
        ));
    }

    #[test]
    fn unknown_nodes_are_navigable_around_but_not_into() {
        let unknown = Predicate::Unknown(UnknownPredicate {
            kind: "geo".to_string(),
            raw: Raw::Map(vec![(Raw::from("kind"), Raw::from("geo"))]),
        });
        let tree = Predicate::And(vec![unknown.clone(), eq("a", 1), eq("b", 2)]);

        let edited = tree.replace_child(2, None).unwrap().unwrap();
        assert_eq!(edited, Predicate::And(vec![unknown, eq("a", 1)]));
        assert!(matches!(
            replace_at(&tree, &path(&[0, 0]), None),
            Err(EditError::UnknownNode { kind, .. }) if kind == "geo"
        ));
    }

    #[test]
    fn comparison_operation_and_value_are_editable() {
        let tree = Predicate::And(vec![eq("a", 1), eq("b", 2)]);
        let edited = set_operation(&tree, &path(&[1]), CompareOp::Gte).unwrap();
        let edited = set_bindable(&edited, &path(&[1]), Bindable::bind("min")).unwrap();

        let Some(Predicate::Compare(cmp)) = get(&edited, &path(&[1])) else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.location(), "b");
        assert_eq!(cmp.operation(), CompareOp::Gte);
        assert_eq!(cmp.value(), &Bindable::bind("min"));
        assert_eq!(get(&edited, &path(&[0])), Some(&eq("a", 1)));
    }

    #[test]
    fn editing_a_connective_as_comparison_fails() {
        let tree = Predicate::And(vec![eq("a", 1), eq("b", 2)]);
        assert_eq!(
            set_operation(&tree, &NodePath::root(), CompareOp::Lt),
            Err(EditError::NotAComparison {
                path: NodePath::root()
            })
        );
    }

    #[test]
    fn degenerate_replacements_are_collapsed() {
        let tree = Predicate::And(vec![eq("f", 1), eq("f", 2)]);
        assert_eq!(
            replace_at(&tree, &path(&[1]), Some(Predicate::Or(vec![]))).unwrap(),
            Some(eq("f", 1))
        );
        assert_eq!(
            tree.replace_child(0, Some(Predicate::And(vec![eq("g", 7)]))).unwrap(),
            Some(Predicate::And(vec![eq("g", 7), eq("f", 2)]))
        );
        assert_eq!(
            replace_at(&tree, &NodePath::root(), Some(Predicate::And(vec![]))).unwrap(),
            None
        );
    }

    #[test]
    fn node_path_display() {
        assert_eq!(NodePath::root().to_string(), "/");
        assert_eq!(NodePath::root().child(2).child(0).to_string(), "/2/0");
    }

    // ---- Collapse invariant ----

    fn arb_tree() -> impl Strategy<Value = Predicate> {
        (0i64..4)
            .prop_map(|v| eq("f", v))
            .prop_recursive(4, 24, 3, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 2..4).prop_map(Predicate::And),
                    prop::collection::vec(inner.clone(), 2..4).prop_map(Predicate::Or),
                    inner.prop_map(Predicate::not),
                ]
            })
    }

    fn arb_replacement() -> impl Strategy<Value = Predicate> {
        let leaf = (0i64..4).prop_map(|v| eq("g", v));
        prop_oneof![
            leaf.clone(),
            Just(Predicate::And(vec![])),
            Just(Predicate::Or(vec![])),
            leaf.clone().prop_map(|p| Predicate::And(vec![p])),
            leaf.clone().prop_map(|p| Predicate::Or(vec![p])),
            leaf.prop_map(|p| Predicate::not(Predicate::Or(vec![Predicate::And(vec![p])]))),
            arb_tree(),
        ]
    }

    fn all_paths(tree: &Predicate) -> Vec<NodePath> {
        let mut paths = Vec::new();
        tree.walk(&mut |p, _| paths.push(p.clone()));
        paths
    }

    fn assert_no_degenerate_connectives(tree: &Predicate) -> Result<(), TestCaseError> {
        let mut ok = true;
        tree.walk(&mut |_, node| {
            if let Predicate::And(c) | Predicate::Or(c) = node {
                ok &= c.len() >= 2;
            }
        });
        prop_assert!(ok, "degenerate connective in {}", tree);
        Ok(())
    }

    proptest! {
        #[test]
        fn removal_never_leaves_degenerate_connectives(
            tree in arb_tree(),
            pick in any::<prop::sample::Index>(),
        ) {
            let paths = all_paths(&tree);
            let target = &paths[pick.index(paths.len())];
            if let Some(edited) = replace_at(&tree, target, None).unwrap() {
                assert_no_degenerate_connectives(&edited)?;
            }
        }

        #[test]
        fn replacement_never_leaves_degenerate_connectives(
            tree in arb_tree(),
            replacement in arb_replacement(),
            pick in any::<prop::sample::Index>(),
        ) {
            let paths = all_paths(&tree);
            let target = &paths[pick.index(paths.len())];
            if let Some(edited) = replace_at(&tree, target, Some(replacement)).unwrap() {
                assert_no_degenerate_connectives(&edited)?;
            }
        }
    }
}
