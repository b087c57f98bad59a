//! 基础操作符：相等、包含、定义检查、正则

use super::{OperandConstraint, OperatorDefinition, loose_eq, pattern_matches, text};
use crate::models::FactType;

const SIMPLE_TYPES: &[FactType] = &[FactType::String, FactType::Number, FactType::Boolean];

pub(crate) fn definitions() -> Vec<OperatorDefinition> {
    vec![
        OperatorDefinition::binary(
            "equals",
            OperandConstraint::any(),
            OperandConstraint::any(),
            |lhs, rhs, _| Ok(loose_eq(lhs, rhs)),
        ),
        OperatorDefinition::binary(
            "notEquals",
            OperandConstraint::any(),
            OperandConstraint::any(),
            |lhs, rhs, _| Ok(!loose_eq(lhs, rhs)),
        ),
        // 变量值在给定列表中
        OperatorDefinition::binary(
            "inArray",
            OperandConstraint::simple(),
            OperandConstraint::array(SIMPLE_TYPES),
            |lhs, rhs, _| Ok(in_list(lhs, rhs)),
        ),
        OperatorDefinition::binary(
            "notInArray",
            OperandConstraint::simple(),
            OperandConstraint::array(SIMPLE_TYPES),
            |lhs, rhs, _| Ok(!in_list(lhs, rhs)),
        ),
        // 变量值是给定文本的子串
        OperatorDefinition::binary(
            "inString",
            OperandConstraint::string(),
            OperandConstraint::string(),
            |lhs, rhs, _| Ok(text(rhs).contains(text(lhs))),
        ),
        OperatorDefinition::binary(
            "notInString",
            OperandConstraint::string(),
            OperandConstraint::string(),
            |lhs, rhs, _| Ok(!text(rhs).contains(text(lhs))),
        ),
        OperatorDefinition::unary(
            "isDefined",
            OperandConstraint::any().allow_undefined(),
            |value, _| Ok(!value.is_null()),
        ),
        OperatorDefinition::unary(
            "isUndefined",
            OperandConstraint::any().allow_undefined(),
            |value, _| Ok(value.is_null()),
        ),
        OperatorDefinition::binary(
            "matchesPattern",
            OperandConstraint::string(),
            OperandConstraint::string(),
            |lhs, rhs, _| pattern_matches("matchesPattern", text(rhs), text(lhs)),
        ),
    ]
}

fn in_list(value: &serde_json::Value, list: &serde_json::Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| loose_eq(value, item)))
}
