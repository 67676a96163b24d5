use crate::error::{RebacError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_IDENTIFIER_LEN: usize = 64;

fn validate_identifier(value: &str) -> Result<()> {
    let invalid = |reason| RebacError::InvalidIdentifier {
        value: value.to_string(),
        reason,
    };

    let mut chars = value.chars();
    match chars.next() {
        None => return Err(invalid("must not be empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(invalid("must start with an ASCII letter"))
        }
        Some(_) => {}
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("must be at most 64 characters"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("may only contain ASCII letters, digits and '_'"));
    }
    Ok(())
}

/// Type name of an object or subject, e.g. `UserTask`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn user() -> Self {
        Self("User".to_string())
    }

    pub fn user_task() -> Self {
        Self("UserTask".to_string())
    }

    pub fn team() -> Self {
        Self("Team".to_string())
    }

    pub fn organization() -> Self {
        Self("Organization".to_string())
    }

    pub fn role() -> Self {
        Self("Role".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Namespace {
    type Error = RebacError;

    fn try_from(value: String) -> Result<Self> {
        validate_identifier(&value)?;
        Ok(Self(value))
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a relation, e.g. `viewer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Relation(String);

impl Relation {
    pub fn new(name: &str) -> Result<Self> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn viewer() -> Self {
        Self("viewer".to_string())
    }

    pub fn owner() -> Self {
        Self("owner".to_string())
    }

    pub fn member() -> Self {
        Self("member".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Relation {
    type Error = RebacError;

    fn try_from(value: String) -> Result<Self> {
        validate_identifier(&value)?;
        Ok(Self(value))
    }
}

impl From<Relation> for String {
    fn from(value: Relation) -> Self {
        value.0
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object, or a concrete subject: `Namespace:key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub namespace: Namespace,
    pub key: i64,
}

impl EntityRef {
    pub fn new(namespace: Namespace, key: i64) -> Self {
        Self { namespace, key }
    }

    pub fn user(key: i64) -> Self {
        Self::new(Namespace::user(), key)
    }

    pub fn user_task(key: i64) -> Self {
        Self::new(Namespace::user_task(), key)
    }

    pub fn team(key: i64) -> Self {
        Self::new(Namespace::team(), key)
    }

    pub fn organization(key: i64) -> Self {
        Self::new(Namespace::organization(), key)
    }

    /// The userset "everyone with `relation` on this entity".
    pub fn userset(&self, relation: Relation) -> Userset {
        Userset {
            entity: self.clone(),
            relation,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

impl FromStr for EntityRef {
    type Err = RebacError;

    fn from_str(s: &str) -> Result<Self> {
        let (namespace, key) = s.split_once(':').ok_or_else(|| {
            RebacError::InvalidTuple(format!("expected 'Namespace:key', got '{}'", s))
        })?;
        let key = key
            .parse::<i64>()
            .map_err(|_| RebacError::InvalidTuple(format!("invalid key in '{}'", s)))?;
        Ok(Self::new(Namespace::new(namespace)?, key))
    }
}

/// All subjects holding `relation` on `entity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Userset {
    pub entity: EntityRef,
    pub relation: Relation,
}

impl fmt::Display for Userset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.relation)
    }
}

/// Subject term of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Concrete(EntityRef),
    Userset(Userset),
}

impl Subject {
    pub fn entity(&self) -> &EntityRef {
        match self {
            Subject::Concrete(entity) => entity,
            Subject::Userset(userset) => &userset.entity,
        }
    }

    pub fn relation(&self) -> Option<&Relation> {
        match self {
            Subject::Concrete(_) => None,
            Subject::Userset(userset) => Some(&userset.relation),
        }
    }

    /// Builds a subject from the flat column layout used by storage.
    pub fn from_parts(entity: EntityRef, relation: Option<Relation>) -> Self {
        match relation {
            Some(relation) => Subject::Userset(Userset { entity, relation }),
            None => Subject::Concrete(entity),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Concrete(entity) => entity.fmt(f),
            Subject::Userset(userset) => userset.fmt(f),
        }
    }
}

impl FromStr for Subject {
    type Err = RebacError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('#') {
            Some((entity, relation)) => Ok(Subject::Userset(Userset {
                entity: entity.parse()?,
                relation: Relation::new(relation)?,
            })),
            None => Ok(Subject::Concrete(s.parse()?)),
        }
    }
}

impl From<EntityRef> for Subject {
    fn from(value: EntityRef) -> Self {
        Subject::Concrete(value)
    }
}

impl From<Userset> for Subject {
    fn from(value: Userset) -> Self {
        Subject::Userset(value)
    }
}

/// Compound identity of a relation tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleKey {
    pub object: EntityRef,
    pub relation: Relation,
    pub subject: Subject,
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// "`object` has `relation` to `subject`", valid within an optional window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub object: EntityRef,
    pub relation: Relation,
    pub subject: Subject,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub last_edited_by: i64,
}

impl RelationTuple {
    pub fn new(object: EntityRef, relation: Relation, subject: Subject, last_edited_by: i64) -> Self {
        Self {
            object,
            relation,
            subject,
            valid_from: None,
            valid_to: None,
            last_edited_by,
        }
    }

    pub fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    pub fn key(&self) -> TupleKey {
        TupleKey {
            object: self.object.clone(),
            relation: self.relation.clone(),
            subject: self.subject.clone(),
        }
    }

    /// `valid_from` is inclusive, `valid_to` exclusive; `None` is unbounded.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= at) && self.valid_to.map_or(true, |to| at < to)
    }

    pub fn same_identity_and_window(&self, other: &RelationTuple) -> bool {
        self.object == other.object
            && self.relation == other.relation
            && self.subject == other.subject
            && self.valid_from == other.valid_from
            && self.valid_to == other.valid_to
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// How a [`TupleFilter`] constrains the subject relation column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelationMatch {
    #[default]
    Any,
    /// Only concrete subjects (no subject relation).
    Concrete,
    Is(Relation),
}

/// Predicate over tuple identity columns; `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TupleFilter {
    pub object_namespace: Option<Namespace>,
    pub object_key: Option<i64>,
    pub relation: Option<Relation>,
    pub subject_namespace: Option<Namespace>,
    pub subject_key: Option<i64>,
    pub subject_relation: RelationMatch,
}

impl TupleFilter {
    pub fn for_object(object: &EntityRef) -> Self {
        Self {
            object_namespace: Some(object.namespace.clone()),
            object_key: Some(object.key),
            ..Self::default()
        }
    }

    /// Matches tuples whose subject is `entity`, directly or as a userset.
    pub fn for_subject_entity(entity: &EntityRef) -> Self {
        Self {
            subject_namespace: Some(entity.namespace.clone()),
            subject_key: Some(entity.key),
            ..Self::default()
        }
    }

    pub fn for_key(key: &TupleKey) -> Self {
        let subject = key.subject.entity();
        Self {
            object_namespace: Some(key.object.namespace.clone()),
            object_key: Some(key.object.key),
            relation: Some(key.relation.clone()),
            subject_namespace: Some(subject.namespace.clone()),
            subject_key: Some(subject.key),
            subject_relation: match key.subject.relation() {
                Some(relation) => RelationMatch::Is(relation.clone()),
                None => RelationMatch::Concrete,
            },
        }
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        let subject = tuple.subject.entity();
        let subject_relation_matches = match &self.subject_relation {
            RelationMatch::Any => true,
            RelationMatch::Concrete => tuple.subject.relation().is_none(),
            RelationMatch::Is(relation) => tuple.subject.relation() == Some(relation),
        };

        self.object_namespace.as_ref().map_or(true, |ns| *ns == tuple.object.namespace)
            && self.object_key.map_or(true, |key| key == tuple.object.key)
            && self.relation.as_ref().map_or(true, |r| *r == tuple.relation)
            && self.subject_namespace.as_ref().map_or(true, |ns| *ns == subject.namespace)
            && self.subject_key.map_or(true, |key| key == subject.key)
            && subject_relation_matches
    }
}

/// Subject narrowing for reverse lookups keyed by (object namespace, relation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatch {
    Any,
    Concrete(EntityRef),
    Usersets,
}

/// A single mutation inside an atomic [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Insert(RelationTuple),
    Delete(TupleFilter),
    /// Sets `valid_to = at` on matching tuples still active at `at`.
    Close { filter: TupleFilter, at: DateTime<Utc> },
}

/// Ordered mutations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, tuple: RelationTuple) -> Self {
        self.ops.push(WriteOp::Insert(tuple));
        self
    }

    pub fn delete(mut self, filter: TupleFilter) -> Self {
        self.ops.push(WriteOp::Delete(filter));
        self
    }

    pub fn close(mut self, filter: TupleFilter, at: DateTime<Utc>) -> Self {
        self.ops.push(WriteOp::Close { filter, at });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub inserted: u64,
    pub deleted: u64,
    pub closed: u64,
}
