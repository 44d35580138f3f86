//! # Dynamic Filter Markers
//!
//! A dynamic filter is a runtime predicate: the build side of an inner hash
//! join collects the distinct values of its join key and ships them to the
//! probe-side scan, which can then skip non-matching input. At planning time
//! the filter is represented by a tagged marker expression on the probe
//! side, paired with an id -> build-symbol entry in the join node.
//!
//! The marker is encoded as a call to a reserved function so it flows
//! through every expression utility unchanged. It is deterministic by
//! construction and opaque to the rewriter once planted.

use ppd_core::expr::{Expression, ScalarValue, Symbol};

/// Reserved function name tagging a dynamic filter marker.
pub const DYNAMIC_FILTER_FUNCTION: &str = "$internal$dynamic_filter_function";

/// The planning-time content of a marker: the filter id and the probe-side
/// expression the runtime filter will be applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicFilterDescriptor {
    pub id: String,
    pub probe: Expression,
}

/// Build a probe-side marker expression for filter `id` over `probe`.
pub fn create_dynamic_filter_expression(id: &str, probe: &Symbol) -> Expression {
    Expression::Function {
        name: DYNAMIC_FILTER_FUNCTION.to_string(),
        args: vec![
            probe.to_expression(),
            Expression::Literal(ScalarValue::Varchar(id.to_string())),
        ],
    }
}

/// Decode a marker expression, if `expression` is one.
pub fn get_descriptor(expression: &Expression) -> Option<DynamicFilterDescriptor> {
    let Expression::Function { name, args } = expression else {
        return None;
    };
    if name != DYNAMIC_FILTER_FUNCTION || args.len() != 2 {
        return None;
    }
    let Expression::Literal(ScalarValue::Varchar(id)) = &args[1] else {
        return None;
    };
    Some(DynamicFilterDescriptor {
        id: id.clone(),
        probe: args[0].clone(),
    })
}

/// Split a predicate's conjuncts into ordinary conjuncts and decoded dynamic
/// filter markers.
pub fn extract_dynamic_filters(
    predicate: &Expression,
) -> (Vec<Expression>, Vec<DynamicFilterDescriptor>) {
    let mut statics = Vec::new();
    let mut dynamics = Vec::new();
    for conjunct in ppd_core::utils::extract_conjuncts(predicate) {
        match get_descriptor(&conjunct) {
            Some(descriptor) => dynamics.push(descriptor),
            None => statics.push(conjunct),
        }
    }
    (statics, dynamics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        let marker = create_dynamic_filter_expression("df_3", &Symbol::new("k"));
        let descriptor = get_descriptor(&marker).expect("marker decodes");
        assert_eq!(descriptor.id, "df_3");
        assert_eq!(descriptor.probe, Symbol::new("k").to_expression());
    }

    #[test]
    fn test_extract_separates_markers() {
        let marker = create_dynamic_filter_expression("df_0", &Symbol::new("k"));
        let plain = Expression::comparison(
            ppd_core::expr::ComparisonOp::Gt,
            Symbol::new("k").to_expression(),
            Expression::bigint(0),
        );
        let predicate = Expression::And(vec![plain.clone(), marker]);
        let (statics, dynamics) = extract_dynamic_filters(&predicate);
        assert_eq!(statics, vec![plain]);
        assert_eq!(dynamics.len(), 1);
    }

    #[test]
    fn test_ordinary_function_is_not_a_marker() {
        let call = Expression::Function {
            name: "abs".to_string(),
            args: vec![Symbol::new("k").to_expression()],
        };
        assert!(get_descriptor(&call).is_none());
    }
}
