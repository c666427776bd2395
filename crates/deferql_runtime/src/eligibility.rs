//! Deferral eligibility.
//!
//! Decides, per field, whether this execution may postpone it:
//!
//! 1. never inside a mutation;
//! 2. only if every occurrence carries `@defer` whose `if` holds;
//! 3. not if `@skip`/`@include` drop any occurrence;
//! 4. otherwise the field defers, unless its type is non-nullable, which
//!    is reported as an error.

use crate::error::DeferError;
use crate::path::FieldPath;
use crate::query::{Annotation, FieldInfo, FieldNode, OperationKind, PlanNode, QueryPlan, TypeRef};
use crate::response::FieldError;
use serde_json::Value;
use std::collections::HashMap;

/// Eligibility rules bound to one operation and its variables.
#[derive(Debug, Clone, Copy)]
pub struct Eligibility<'a> {
    operation: OperationKind,
    variables: &'a HashMap<String, Value>,
}

impl<'a> Eligibility<'a> {
    pub fn new(operation: OperationKind, variables: &'a HashMap<String, Value>) -> Self {
        Self {
            operation,
            variables,
        }
    }

    /// Returns whether a field of `field_type`, written as `nodes`, defers.
    pub fn should_defer(
        &self,
        field_type: &TypeRef,
        nodes: &[FieldNode],
    ) -> Result<bool, DeferError> {
        if self.operation == OperationKind::Mutation {
            return Ok(false);
        }

        if nodes.is_empty() {
            return Ok(false);
        }
        for node in nodes {
            match node.defer_condition() {
                Some(condition) if condition.evaluate(self.variables)? => {}
                _ => return Ok(false),
            }
        }

        for node in nodes {
            for annotation in &node.annotations {
                let removes = match annotation {
                    Annotation::Skip { condition } => condition.evaluate(self.variables)?,
                    Annotation::Include { condition } => !condition.evaluate(self.variables)?,
                    Annotation::Defer { .. } => false,
                };
                if removes {
                    return Ok(false);
                }
            }
        }

        if field_type.is_non_null() {
            return Err(DeferError::NonNullableDefer {
                field_type: field_type.to_string(),
            });
        }

        Ok(true)
    }

    /// Convenience for a planned field.
    pub fn should_defer_field(&self, field: &FieldInfo) -> Result<bool, DeferError> {
        self.should_defer(&field.return_type, &field.nodes)
    }
}

/// Checks every field of `plan` before execution starts.
///
/// Returns the request-level errors for fields that can never be
/// evaluated, such as `@defer` on a non-nullable field. List positions are
/// not known before execution, so reported paths contain response keys only.
pub fn validate_plan(
    plan: &QueryPlan,
    variables: &HashMap<String, Value>,
) -> Result<(), Vec<FieldError>> {
    let eligibility = Eligibility::new(plan.operation_kind, variables);
    let mut errors = Vec::new();
    validate_node(&plan.root, &FieldPath::root(), &eligibility, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_node(
    node: &PlanNode,
    path: &FieldPath,
    eligibility: &Eligibility<'_>,
    errors: &mut Vec<FieldError>,
) {
    match node {
        PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => {
            for node in nodes {
                validate_node(node, path, eligibility, errors);
            }
        }
        PlanNode::Field { info, children } => {
            let field_path = path.child(info.response_key());
            validate_field(info, &field_path, eligibility, errors);
            validate_node(children, &field_path, eligibility, errors);
        }
        PlanNode::Leaf { field } => {
            validate_field(field, &path.child(field.response_key()), eligibility, errors);
        }
    }
}

fn validate_field(
    field: &FieldInfo,
    path: &FieldPath,
    eligibility: &Eligibility<'_>,
    errors: &mut Vec<FieldError>,
) {
    let checked = field
        .is_included(eligibility.variables)
        .and_then(|_| eligibility.should_defer_field(field));
    if let Err(e) = checked {
        errors.push(e.into_field_error(Some(path.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Condition;
    use serde_json::json;

    fn nullable() -> TypeRef {
        TypeRef::named("String")
    }

    fn deferred() -> FieldNode {
        FieldNode::new().with(Annotation::defer())
    }

    fn no_vars() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_requires_defer_annotation() {
        let vars = no_vars();
        let rules = Eligibility::new(OperationKind::Query, &vars);

        assert_eq!(rules.should_defer(&nullable(), &[]), Ok(false));
        assert_eq!(rules.should_defer(&nullable(), &[FieldNode::new()]), Ok(false));
        assert_eq!(rules.should_defer(&nullable(), &[deferred()]), Ok(true));
    }

    #[test]
    fn test_defer_if_condition() {
        let mut vars = no_vars();
        vars.insert("later".to_string(), json!(false));
        let rules = Eligibility::new(OperationKind::Query, &vars);

        let off = FieldNode::new().with(Annotation::defer_if(Condition::Literal(false)));
        assert_eq!(rules.should_defer(&nullable(), &[off]), Ok(false));

        let by_variable = FieldNode::new().with(Annotation::defer_if(Condition::variable("later")));
        assert_eq!(rules.should_defer(&nullable(), &[by_variable]), Ok(false));

        let unbound = FieldNode::new().with(Annotation::defer_if(Condition::variable("nope")));
        assert!(matches!(
            rules.should_defer(&nullable(), &[unbound]),
            Err(DeferError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn test_every_occurrence_must_defer() {
        let vars = no_vars();
        let rules = Eligibility::new(OperationKind::Query, &vars);

        assert_eq!(
            rules.should_defer(&nullable(), &[deferred(), FieldNode::new()]),
            Ok(false)
        );
        assert_eq!(rules.should_defer(&nullable(), &[deferred(), deferred()]), Ok(true));
    }

    #[test]
    fn test_mutation_never_defers() {
        let vars = no_vars();
        let rules = Eligibility::new(OperationKind::Mutation, &vars);

        assert_eq!(rules.should_defer(&nullable(), &[deferred()]), Ok(false));
        // Checked before the non-null guard.
        let non_null = TypeRef::non_null(nullable());
        assert_eq!(rules.should_defer(&non_null, &[deferred()]), Ok(false));
    }

    #[test]
    fn test_skip_and_include_block_deferral() {
        let vars = no_vars();
        let rules = Eligibility::new(OperationKind::Query, &vars);

        let skipped = deferred().with(Annotation::skip_if(Condition::Literal(true)));
        assert_eq!(rules.should_defer(&nullable(), &[skipped]), Ok(false));

        let excluded = deferred().with(Annotation::include_if(Condition::Literal(false)));
        assert_eq!(rules.should_defer(&nullable(), &[excluded]), Ok(false));

        let kept = deferred()
            .with(Annotation::skip_if(Condition::Literal(false)))
            .with(Annotation::include_if(Condition::Literal(true)));
        assert_eq!(rules.should_defer(&nullable(), &[kept]), Ok(true));
    }

    #[test]
    fn test_non_null_guard_runs_last() {
        let vars = no_vars();
        let rules = Eligibility::new(OperationKind::Query, &vars);
        let non_null = TypeRef::non_null(nullable());

        assert!(matches!(
            rules.should_defer(&non_null, &[deferred()]),
            Err(DeferError::NonNullableDefer { .. })
        ));

        // Otherwise ineligible fields never reach the guard.
        let off = FieldNode::new().with(Annotation::defer_if(Condition::Literal(false)));
        assert_eq!(rules.should_defer(&non_null, &[off]), Ok(false));
        let skipped = deferred().with(Annotation::skip_if(Condition::Literal(true)));
        assert_eq!(rules.should_defer(&non_null, &[skipped]), Ok(false));

        // A nullable list of non-null items is fine.
        let list = TypeRef::list(TypeRef::non_null(nullable()));
        assert_eq!(rules.should_defer(&list, &[deferred()]), Ok(true));
    }

    #[test]
    fn test_validate_plan_reports_non_null_defer() {
        let plan = QueryPlan::new(PlanNode::field(
            FieldInfo::new("user", "Query", TypeRef::named("User")),
            PlanNode::parallel(vec![
                PlanNode::leaf(FieldInfo::new("name", "User", nullable()).deferred()),
                PlanNode::leaf(
                    FieldInfo::new("id", "User", TypeRef::non_null(TypeRef::named("ID")))
                        .with_alias("userId")
                        .deferred(),
                ),
            ]),
        ));

        let errors = validate_plan(&plan, &no_vars()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, Some(FieldPath::from_iter(["user", "userId"])));
        assert!(errors[0].message.contains("ID!"));

        let ok = QueryPlan::new(PlanNode::leaf(
            FieldInfo::new("name", "Query", nullable()).deferred(),
        ));
        assert!(validate_plan(&ok, &no_vars()).is_ok());
    }

    #[test]
    fn test_validate_plan_reports_unbound_condition() {
        let plan = QueryPlan::new(PlanNode::leaf(
            FieldInfo::new("name", "Query", nullable())
                .with_annotation(Annotation::include_if(Condition::variable("$withName"))),
        ));

        let errors = validate_plan(&plan, &no_vars()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), Some(crate::error::INVALID_CONDITION));
    }
}
