use crate::{
    error::{RebacError, Result},
    models::*,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Optional registry of the relations meaningful within each namespace.
///
/// Without a schema every relation name is accepted and unknown relations
/// simply resolve to empty membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub namespaces: HashMap<Namespace, NamespaceDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, definition: NamespaceDefinition) -> Self {
        self.namespaces.insert(definition.name.clone(), definition);
        self
    }

    /// Task-tracking schema: users belong to teams, organizations and roles;
    /// tasks are owned and viewed through those memberships.
    pub fn task_schema() -> Self {
        Self::new()
            .with_namespace(NamespaceDefinition::new(Namespace::user(), vec![]))
            .with_namespace(NamespaceDefinition::new(
                Namespace::user_task(),
                vec![
                    RelationDefinition::new(Relation::owner(), "Full control over the task"),
                    RelationDefinition::new(Relation::viewer(), "Can read the task"),
                ],
            ))
            .with_namespace(NamespaceDefinition::new(
                Namespace::team(),
                vec![RelationDefinition::new(Relation::member(), "Member of the team")],
            ))
            .with_namespace(NamespaceDefinition::new(
                Namespace::organization(),
                vec![RelationDefinition::new(
                    Relation::member(),
                    "Member of the organization",
                )],
            ))
            .with_namespace(NamespaceDefinition::new(
                Namespace::role(),
                vec![RelationDefinition::new(Relation::member(), "Holder of the role")],
            ))
    }

    pub fn has_relation(&self, namespace: &Namespace, relation: &Relation) -> bool {
        self.namespaces
            .get(namespace)
            .map_or(false, |ns| ns.relations.iter().any(|r| &r.name == relation))
    }

    fn ensure_relation(&self, namespace: &Namespace, relation: &Relation) -> Result<()> {
        if self.has_relation(namespace, relation) {
            Ok(())
        } else {
            Err(RebacError::InvalidRelationReference {
                namespace: namespace.to_string(),
                relation: relation.to_string(),
            })
        }
    }

    /// Both the tuple relation and, for userset subjects, the subject relation
    /// must be defined.
    pub fn validate_tuple(&self, tuple: &RelationTuple) -> Result<()> {
        self.ensure_relation(&tuple.object.namespace, &tuple.relation)?;
        if let Subject::Userset(userset) = &tuple.subject {
            self.ensure_relation(&userset.entity.namespace, &userset.relation)?;
        }
        Ok(())
    }

    /// Validate the entire schema is well-formed
    pub fn validate(&self) -> Result<()> {
        for (name, namespace) in &self.namespaces {
            if name != &namespace.name {
                return Err(RebacError::Configuration(format!(
                    "Namespace key '{}' doesn't match name '{}'",
                    name, namespace.name
                )));
            }

            let mut seen = std::collections::HashSet::new();
            for relation in &namespace.relations {
                if !seen.insert(&relation.name) {
                    return Err(RebacError::Configuration(format!(
                        "Relation '{}' defined twice in namespace '{}'",
                        relation.name, name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Definition of a namespace (object type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: Namespace,
    pub relations: Vec<RelationDefinition>,
}

impl NamespaceDefinition {
    pub fn new(name: Namespace, relations: Vec<RelationDefinition>) -> Self {
        Self { name, relations }
    }
}

/// Definition of a relation within a namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: Relation,
    pub description: String,
}

impl RelationDefinition {
    pub fn new(name: Relation, description: &str) -> Self {
        Self {
            name,
            description: description.to_string(),
        }
    }
}
