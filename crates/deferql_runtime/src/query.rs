//! Query plans for deferred execution.
//!
//! A plan is the already-parsed operation: a tree of [`PlanNode`]s whose
//! fields carry the annotations written on each occurrence in the query
//! (`@defer`, `@skip`, `@include`). Plans are serde-serializable so that
//! persisted operations and fixtures can be stored as JSON.

use crate::error::DeferError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The kind of operation being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

/// An output type reference, e.g. `[User!]!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Returns true if the outermost wrapper is non-null.
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Returns the innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named_type(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::List(inner) => write!(f, "[{}]", inner),
            Self::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

/// Error for a malformed type reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid type reference `{0}`")]
pub struct TypeRefError(String);

impl FromStr for TypeRef {
    type Err = TypeRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix('!') {
            let inner: TypeRef = inner.parse().map_err(|_| TypeRefError(s.to_string()))?;
            if inner.is_non_null() {
                return Err(TypeRefError(s.to_string()));
            }
            return Ok(Self::non_null(inner));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let inner = inner.parse().map_err(|_| TypeRefError(s.to_string()))?;
            return Ok(Self::list(inner));
        }
        let valid = s
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self::named(s))
        } else {
            Err(TypeRefError(s.to_string()))
        }
    }
}

impl TryFrom<String> for TypeRef {
    type Error = TypeRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

/// A directive condition: a literal or a `$variable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Variable(String),
}

impl Condition {
    /// The default condition of `@defer`.
    pub fn always() -> Self {
        Self::Literal(true)
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Evaluates the condition against request variables.
    pub fn evaluate(&self, variables: &HashMap<String, Value>) -> Result<bool, DeferError> {
        match self {
            Self::Literal(value) => Ok(*value),
            Self::Variable(name) => {
                let name = name.trim_start_matches('$');
                match variables.get(name) {
                    Some(Value::Bool(value)) => Ok(*value),
                    Some(other) => Err(DeferError::InvalidCondition {
                        name: name.to_string(),
                        found: other.to_string(),
                    }),
                    None => Err(DeferError::UnboundVariable {
                        name: name.to_string(),
                    }),
                }
            }
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

/// An annotation written on one occurrence of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "camelCase")]
pub enum Annotation {
    /// `@defer(if:, label:)`.
    Defer {
        #[serde(rename = "if", default)]
        condition: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// `@skip(if:)`.
    Skip {
        #[serde(rename = "if")]
        condition: Condition,
    },
    /// `@include(if:)`.
    Include {
        #[serde(rename = "if")]
        condition: Condition,
    },
}

impl Annotation {
    /// An unconditional `@defer`.
    pub fn defer() -> Self {
        Self::Defer {
            condition: Condition::always(),
            label: None,
        }
    }

    pub fn defer_if(condition: Condition) -> Self {
        Self::Defer {
            condition,
            label: None,
        }
    }

    pub fn skip_if(condition: Condition) -> Self {
        Self::Skip { condition }
    }

    pub fn include_if(condition: Condition) -> Self {
        Self::Include { condition }
    }
}

/// One syntactic occurrence of a field in the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNode {
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl FieldNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an annotation.
    pub fn with(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// The condition of this occurrence's `@defer`, if it has one.
    pub fn defer_condition(&self) -> Option<&Condition> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Defer { condition, .. } => Some(condition),
            _ => None,
        })
    }

    /// Returns true if `@skip`/`@include` keep this occurrence in the response.
    pub fn is_included(&self, variables: &HashMap<String, Value>) -> Result<bool, DeferError> {
        for annotation in &self.annotations {
            match annotation {
                Annotation::Skip { condition } if condition.evaluate(variables)? => {
                    return Ok(false)
                }
                Annotation::Include { condition } if !condition.evaluate(variables)? => {
                    return Ok(false)
                }
                _ => {}
            }
        }
        Ok(true)
    }
}

/// Info about a field to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    /// Schema field name.
    pub name: String,
    /// Alias used as the response key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Type that owns the field.
    pub parent_type: String,
    /// Declared output type.
    #[serde(rename = "type")]
    pub return_type: TypeRef,
    /// Argument values.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, Value>,
    /// Merged occurrences of this field in the operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<FieldNode>,
}

impl FieldInfo {
    /// Creates field info for a single, unannotated occurrence.
    pub fn new(
        name: impl Into<String>,
        parent_type: impl Into<String>,
        return_type: TypeRef,
    ) -> Self {
        Self {
            name: name.into(),
            alias: None,
            parent_type: parent_type.into(),
            return_type,
            arguments: IndexMap::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Adds another occurrence of the field.
    pub fn with_node(mut self, node: FieldNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Annotates every occurrence, creating one if there is none yet.
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        if self.nodes.is_empty() {
            self.nodes.push(FieldNode::new());
        }
        for node in &mut self.nodes {
            node.annotations.push(annotation.clone());
        }
        self
    }

    /// Shorthand for an unconditional `@defer` on every occurrence.
    pub fn deferred(self) -> Self {
        self.with_annotation(Annotation::defer())
    }

    /// The key this field is written under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_typename(&self) -> bool {
        self.name == "__typename"
    }

    /// A field is included when at least one of its occurrences is.
    pub fn is_included(&self, variables: &HashMap<String, Value>) -> Result<bool, DeferError> {
        if self.nodes.is_empty() {
            return Ok(true);
        }
        for node in &self.nodes {
            if node.is_included(variables)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// A node in the query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanNode {
    /// Sequential execution.
    Sequence { nodes: Vec<PlanNode> },
    /// Parallel execution.
    Parallel { nodes: Vec<PlanNode> },
    /// A field with a nested selection.
    Field {
        info: FieldInfo,
        children: Box<PlanNode>,
    },
    /// A leaf field to resolve.
    Leaf { field: FieldInfo },
}

impl PlanNode {
    pub fn sequence(nodes: Vec<PlanNode>) -> Self {
        Self::Sequence { nodes }
    }

    pub fn parallel(nodes: Vec<PlanNode>) -> Self {
        Self::Parallel { nodes }
    }

    pub fn field(info: FieldInfo, children: PlanNode) -> Self {
        Self::Field {
            info,
            children: Box::new(children),
        }
    }

    pub fn leaf(field: FieldInfo) -> Self {
        Self::Leaf { field }
    }
}

/// A query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// The root node of the plan.
    pub root: PlanNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub operation_kind: OperationKind,
}

impl QueryPlan {
    /// Creates a query plan.
    pub fn new(root: PlanNode) -> Self {
        Self {
            root,
            operation_name: None,
            operation_kind: OperationKind::Query,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.operation_kind = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_ref_parse_and_display() {
        let ty: TypeRef = "[User!]!".parse().unwrap();
        assert!(ty.is_non_null());
        assert_eq!(ty.named_type(), "User");
        assert_eq!(ty.to_string(), "[User!]!");
        assert_eq!(
            ty,
            TypeRef::non_null(TypeRef::list(TypeRef::non_null(TypeRef::named("User"))))
        );

        assert!(!"String".parse::<TypeRef>().unwrap().is_non_null());
        assert!("String!!".parse::<TypeRef>().is_err());
        assert!("[String".parse::<TypeRef>().is_err());
        assert!("".parse::<TypeRef>().is_err());
    }

    #[test]
    fn test_condition_evaluate() {
        let mut vars = HashMap::new();
        vars.insert("slow".to_string(), json!(true));
        vars.insert("count".to_string(), json!(3));

        assert_eq!(Condition::Literal(false).evaluate(&vars), Ok(false));
        assert_eq!(Condition::variable("$slow").evaluate(&vars), Ok(true));
        assert_eq!(Condition::variable("slow").evaluate(&vars), Ok(true));
        assert!(matches!(
            Condition::variable("count").evaluate(&vars),
            Err(DeferError::InvalidCondition { .. })
        ));
        assert!(matches!(
            Condition::variable("missing").evaluate(&vars),
            Err(DeferError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn test_field_inclusion() {
        let vars = HashMap::new();
        let plain = FieldInfo::new("name", "User", TypeRef::named("String"));
        assert!(plain.is_included(&vars).unwrap());

        let skipped = plain
            .clone()
            .with_annotation(Annotation::skip_if(Condition::Literal(true)));
        assert!(!skipped.is_included(&vars).unwrap());

        let excluded = plain
            .clone()
            .with_annotation(Annotation::include_if(Condition::Literal(false)));
        assert!(!excluded.is_included(&vars).unwrap());

        // One included occurrence keeps the field.
        let merged = plain
            .with_node(FieldNode::new().with(Annotation::skip_if(Condition::Literal(true))))
            .with_node(FieldNode::new());
        assert!(merged.is_included(&vars).unwrap());
    }

    #[test]
    fn test_plan_from_json() {
        let plan: QueryPlan = serde_json::from_value(json!({
            "operationName": "Profile",
            "root": {
                "kind": "field",
                "info": {"name": "user", "parentType": "Query", "type": "User"},
                "children": {
                    "kind": "parallel",
                    "nodes": [
                        {"kind": "leaf", "field": {
                            "name": "name",
                            "parentType": "User",
                            "type": "String!"
                        }},
                        {"kind": "leaf", "field": {
                            "name": "bio",
                            "parentType": "User",
                            "type": "String",
                            "nodes": [{"annotations": [{"directive": "defer"}]}]
                        }}
                    ]
                }
            }
        }))
        .unwrap();

        assert_eq!(plan.operation_kind, OperationKind::Query);
        let PlanNode::Field { info, children } = &plan.root else {
            panic!("expected field");
        };
        assert_eq!(info.response_key(), "user");
        let PlanNode::Parallel { nodes } = children.as_ref() else {
            panic!("expected parallel");
        };
        let PlanNode::Leaf { field } = &nodes[1] else {
            panic!("expected leaf");
        };
        assert_eq!(field.nodes[0].defer_condition(), Some(&Condition::Literal(true)));
    }
}
