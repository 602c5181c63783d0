//! Recursive boolean predicate tree used as the `where` clause of queries.
//!
//! Trees are immutable values: every edit (see [`edit`]) and every merge
//! returns a new root. `And`/`Or` nodes with zero children never persist;
//! the smart constructors [`Predicate::and`] and [`Predicate::or`] collapse
//! an empty child list to "no predicate" and a singleton to the child itself.
//!
//! Nodes of a kind this client does not understand decode to
//! [`Predicate::Unknown`], which keeps the raw node so it re-encodes
//! verbatim and renders as an explicit placeholder.

pub mod edit;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::value::SchemaValue;

pub use edit::{EditError, NodePath};

/// Values supplied for `BindValue` placeholders, keyed by bind name.
pub type Params = BTreeMap<String, SchemaValue>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when checking a [`WherePredicate`] before execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    /// One or more `BindValue` names have no entry in `params`.
    #[error("missing bind values: {}", names.join(", "))]
    MissingBind { names: Vec<String> },
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Comparison operators.
///
/// Wire names are lowercase mnemonics (`eq`, `neq`, ...); [`CompareOp::symbol`]
/// gives the rendered form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// Returns the operator as it appears in rendered query text.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Bindable {
    /// Named placeholder resolved from [`WherePredicate::params`] at execution time.
    BindValue { name: String },
    /// Inline constant.
    Literal { value: SchemaValue },
    /// Reference to another field of the same record.
    Locatable { path: String },
}

impl Bindable {
    #[must_use]
    pub fn bind(name: impl Into<String>) -> Self {
        Self::BindValue { name: name.into() }
    }

    #[must_use]
    pub fn literal(value: impl Into<SchemaValue>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn locatable(path: impl Into<String>) -> Self {
        Self::Locatable { path: path.into() }
    }
}

impl fmt::Display for Bindable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindValue { name } => write!(f, ":{name}"),
            Self::Literal { value } => write!(f, "{value}"),
            Self::Locatable { path } => write!(f, "@{path}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// A leaf comparison `location op value`.
///
/// The location is fixed at construction: re-targeting a comparison means
/// removing it and building a new one. Operation and value are replaced
/// through [`Comparison::with_operation`] and [`Comparison::with_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    location: String,
    operation: CompareOp,
    value: Bindable,
}

impl Comparison {
    #[must_use]
    pub fn new(location: impl Into<String>, operation: CompareOp, value: Bindable) -> Self {
        Self {
            location: location.into(),
            operation,
            value,
        }
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn operation(&self) -> CompareOp {
        self.operation
    }

    #[must_use]
    pub fn value(&self) -> &Bindable {
        &self.value
    }

    #[must_use]
    pub fn with_operation(&self, operation: CompareOp) -> Self {
        Self {
            operation,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_value(&self, value: Bindable) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }
}

/// A predicate node whose `kind` tag this client does not recognise.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownPredicate {
    /// The unrecognised `kind` tag.
    pub kind: String,
    /// The node exactly as received.
    pub raw: rmpv::Value,
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// Recursive predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare(Comparison),
    Unknown(UnknownPredicate),
}

impl Predicate {
    /// Builds a conjunction, collapsing 0 children to `None` and 1 child to itself.
    #[must_use]
    pub fn and(children: Vec<Predicate>) -> Option<Predicate> {
        collapse(children, Predicate::And)
    }

    /// Builds a disjunction, collapsing 0 children to `None` and 1 child to itself.
    #[must_use]
    pub fn or(children: Vec<Predicate>) -> Option<Predicate> {
        collapse(children, Predicate::Or)
    }

    #[must_use]
    pub fn not(child: Predicate) -> Predicate {
        Predicate::Not(Box::new(child))
    }

    #[must_use]
    pub fn compare(
        location: impl Into<String>,
        operation: CompareOp,
        value: Bindable,
    ) -> Predicate {
        Predicate::Compare(Comparison::new(location, operation, value))
    }

    /// Applies the collapse rules to every node, bottom-up.
    ///
    /// Returns `None` when the whole tree is semantically empty.
    #[must_use]
    pub fn normalized(&self) -> Option<Predicate> {
        match self {
            Self::And(children) => {
                Self::and(children.iter().filter_map(Predicate::normalized).collect())
            }
            Self::Or(children) => {
                Self::or(children.iter().filter_map(Predicate::normalized).collect())
            }
            Self::Not(child) => child.normalized().map(Predicate::not),
            Self::Compare(_) | Self::Unknown(_) => Some(self.clone()),
        }
    }

    /// Child nodes in order. Leaves have none.
    #[must_use]
    pub fn children(&self) -> &[Predicate] {
        match self {
            Self::And(children) | Self::Or(children) => children,
            Self::Not(child) => std::slice::from_ref(child.as_ref()),
            Self::Compare(_) | Self::Unknown(_) => &[],
        }
    }

    /// Visits every node in pre-order together with its path from the root.
    pub fn walk<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&NodePath, &'a Predicate),
    {
        fn visit<'a, F>(node: &'a Predicate, path: &mut NodePath, f: &mut F)
        where
            F: FnMut(&NodePath, &'a Predicate),
        {
            f(path, node);
            for (i, child) in node.children().iter().enumerate() {
                path.push(i);
                visit(child, path, f);
                path.pop();
            }
        }

        visit(self, &mut NodePath::root(), f);
    }

    /// Leaf nodes (`Compare` and `Unknown`) in left-to-right order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.walk(&mut |_, node| {
            if node.children().is_empty() && !matches!(node, Self::And(_) | Self::Or(_)) {
                out.push(node);
            }
        });
        out
    }

    /// Names of every `BindValue` placeholder reachable in the tree.
    #[must_use]
    pub fn bind_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.walk(&mut |_, node| {
            if let Self::Compare(cmp) = node {
                if let Bindable::BindValue { name } = cmp.value() {
                    names.insert(name.as_str());
                }
            }
        });
        names
    }

    /// Returns `true` if any node in the tree is of an unknown kind.
    #[must_use]
    pub fn has_unknown(&self) -> bool {
        let mut found = false;
        self.walk(&mut |_, node| found |= matches!(node, Self::Unknown(_)));
        found
    }
}

fn collapse(
    mut children: Vec<Predicate>,
    wrap: fn(Vec<Predicate>) -> Predicate,
) -> Option<Predicate> {
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(wrap(children)),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(children) => write_joined(f, children, " AND "),
            Self::Or(children) => write_joined(f, children, " OR "),
            Self::Not(child) => write!(f, "NOT {child}"),
            Self::Compare(cmp) => write!(
                f,
                "{} {} {}",
                cmp.location(),
                cmp.operation().symbol(),
                cmp.value()
            ),
            Self::Unknown(unknown) => write!(f, "<unknown predicate kind {:?}>", unknown.kind),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

// ---------------------------------------------------------------------------
// Predicate wire encoding
// ---------------------------------------------------------------------------

const KNOWN_KINDS: [&str; 4] = ["and", "or", "not", "compare"];

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum PredicateRef<'a> {
    And { children: &'a [Predicate] },
    Or { children: &'a [Predicate] },
    Not { child: &'a Predicate },
    Compare(&'a Comparison),
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum PredicateRepr {
    And { children: Vec<Predicate> },
    Or { children: Vec<Predicate> },
    Not { child: Box<Predicate> },
    Compare(Comparison),
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::And(children) => PredicateRef::And { children }.serialize(serializer),
            Self::Or(children) => PredicateRef::Or { children }.serialize(serializer),
            Self::Not(child) => PredicateRef::Not { child }.serialize(serializer),
            Self::Compare(cmp) => PredicateRef::Compare(cmp).serialize(serializer),
            Self::Unknown(unknown) => unknown.raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = rmpv::Value::deserialize(deserializer)?;
        let kind = raw
            .as_map()
            .and_then(|entries| entries.iter().find(|(k, _)| k.as_str() == Some("kind")))
            .and_then(|(_, v)| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| de::Error::custom("predicate node without a string `kind` tag"))?;

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            tracing::debug!(kind = %kind, "decoded predicate node of unknown kind");
            return Ok(Self::Unknown(UnknownPredicate { kind, raw }));
        }

        let repr: PredicateRepr = rmpv::ext::from_value(raw).map_err(de::Error::custom)?;
        Ok(match repr {
            PredicateRepr::And { children } => decoded_connective(&children, Self::And),
            PredicateRepr::Or { children } => decoded_connective(&children, Self::Or),
            PredicateRepr::Not { child } => child.normalized().map_or(Self::Not(child), Self::not),
            PredicateRepr::Compare(cmp) => Self::Compare(cmp),
        })
    }
}

/// Collapses a decoded `And`/`Or`. An empty node stays empty here and is
/// dropped by its parent or by [`WherePredicate`] decoding.
fn decoded_connective(children: &[Predicate], wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    let children = children.iter().filter_map(Predicate::normalized).collect();
    collapse(children, wrap).unwrap_or_else(|| wrap(Vec::new()))
}

fn normalized_predicate<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Predicate>, D::Error> {
    Ok(Option::<Predicate>::deserialize(deserializer)?.and_then(|p| p.normalized()))
}

// ---------------------------------------------------------------------------
// WherePredicate
// ---------------------------------------------------------------------------

/// Root query filter: an optional predicate plus values for its bind placeholders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WherePredicate {
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "normalized_predicate"
    )]
    pub predicate: Option<Predicate>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub params: Params,
}

impl WherePredicate {
    #[must_use]
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            params: Params::new(),
        }
    }

    /// Adds or replaces one bind value.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<SchemaValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Bind names referenced by the predicate that have no entry in `params`.
    #[must_use]
    pub fn missing_binds(&self) -> Vec<String> {
        self.predicate
            .as_ref()
            .map(|p| {
                p.bind_names()
                    .into_iter()
                    .filter(|name| !self.params.contains_key(*name))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Checks that every bind placeholder has a value.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::MissingBind`] listing the unbound names.
    pub fn validate(&self) -> Result<(), PredicateError> {
        let names = self.missing_binds();
        if names.is_empty() {
            Ok(())
        } else {
            Err(PredicateError::MissingBind { names })
        }
    }
}

impl fmt::Display for WherePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Some(p) => write!(f, "{p}"),
            None => f.write_str("<no predicate>"),
        }
    }
}

/// Merges two optional filters into their conjunction.
///
/// If either side is absent the other is returned unchanged. Otherwise the
/// params are unioned (right-hand side wins on collision) and the predicates
/// are joined into one flat `And`, left operands first. Existing top-level
/// `And` nodes on either side are flattened into the result so repeated
/// merges converge to a single conjunction in application order.
#[must_use]
pub fn merge_where(a: Option<WherePredicate>, b: Option<WherePredicate>) -> Option<WherePredicate> {
    let (a, b) = match (a, b) {
        (None, other) | (other, None) => return other,
        (Some(a), Some(b)) => (a, b),
    };

    let mut params = a.params;
    params.extend(b.params);

    let predicate = match (a.predicate, b.predicate) {
        (None, other) | (other, None) => other,
        (Some(left), Some(right)) => {
            let mut children = Vec::new();
            push_conjuncts(left, &mut children);
            push_conjuncts(right, &mut children);
            Predicate::and(children)
        }
    };

    Some(WherePredicate { predicate, params })
}

fn push_conjuncts(predicate: Predicate, out: &mut Vec<Predicate>) {
    match predicate {
        Predicate::And(children) => out.extend(children),
        other => out.push(other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
