//! 依赖分析
//!
//! 计算规则集需要监听的事实集合：条件和 SET_FACT 中引用的事实名，
//! 加上所用操作符声明的隐式依赖（如 `currentTime`）。
//! 临时事实只存在于单次执行内部，不计入监听集合。

use crate::compiler::{BlockId, BlockNode, CompiledCondition, CompiledOperand, CompiledRuleset};
use std::collections::{BTreeSet, HashSet};

/// 计算规则集的监听事实集合
pub fn compute_watched_facts(ruleset: &CompiledRuleset) -> BTreeSet<String> {
    let mut facts = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<BlockId> = ruleset.rules.iter().map(|r| r.root).collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        match ruleset.block(id) {
            Some(BlockNode::IfElse {
                condition,
                success,
                failure,
            }) => {
                if let Some(condition) = condition {
                    condition_facts(condition, &mut facts);
                }
                stack.extend(success.iter().chain(failure.iter()).copied());
            }
            Some(BlockNode::SetTemporaryFact { value, .. }) => operand_fact(value, &mut facts),
            Some(BlockNode::Action(_)) | None => {}
        }
    }

    facts
}

/// 收集条件树引用的事实
pub fn condition_facts(condition: &CompiledCondition, out: &mut BTreeSet<String>) {
    match condition {
        CompiledCondition::All(children) | CompiledCondition::Any(children) => {
            children.iter().for_each(|c| condition_facts(c, out));
        }
        CompiledCondition::Not(inner) => condition_facts(inner, out),
        CompiledCondition::Operation { operator, lhs, rhs } => {
            operand_fact(lhs, out);
            if let Some(rhs) = rhs {
                operand_fact(rhs, out);
            }
            out.extend(operator.implicit_fact_dependencies.iter().cloned());
        }
    }
}

fn operand_fact(operand: &CompiledOperand, out: &mut BTreeSet<String>) {
    if let CompiledOperand::Fact { name, .. } = operand {
        out.insert(name.clone());
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::CatalogCompiler;
    use crate::metadata::EngineMetadata;
    use crate::operators::OperatorCatalog;
    use serde_json::json;
    use std::sync::Arc;

    fn watched(catalog: serde_json::Value) -> Vec<String> {
        let compiler = CatalogCompiler::new(
            Arc::new(OperatorCatalog::builtin()),
            Arc::new(EngineMetadata::default()),
        );
        let catalog = compiler.compile_json(&catalog.to_string()).unwrap();
        catalog.rulesets()[0].watched_facts.iter().cloned().collect()
    }

    #[test]
    fn test_collects_facts_from_nested_blocks() {
        let facts = watched(json!({
            "rulesets": [{
                "id": "rs",
                "rules": [{
                    "id": "r1",
                    "rootElement": {
                        "blockType": "IF_ELSE",
                        "condition": {"any": [
                            {"operator": "equals", "lhs": {"type": "FACT", "factName": "destination"}, "rhs": {"type": "LITERAL", "value": "PAR"}},
                            {"not": {"operator": "isDefined", "lhs": {"type": "FACT", "factName": "cart", "path": "$.items"}}}
                        ]},
                        "successElements": [{
                            "blockType": "IF_ELSE",
                            "condition": {"operator": "lessThan", "lhs": {"type": "FACT", "factName": "age"}, "rhs": {"type": "FACT", "factName": "limit"}},
                            "successElements": [{"blockType": "SET_FACT", "fact": "copy", "value": {"type": "FACT", "factName": "origin"}}]
                        }]
                    }
                }]
            }]
        }));

        assert_eq!(facts, vec!["age", "cart", "destination", "limit", "origin"]);
    }

    #[test]
    fn test_implicit_dependencies_and_temporary_facts() {
        let facts = watched(json!({
            "rulesets": [{
                "id": "rs",
                "rules": [{
                    "id": "r1",
                    "rootElement": {
                        "blockType": "IF_ELSE",
                        "condition": {"all": [
                            {"operator": "dateInNextMinutes", "lhs": {"type": "FACT", "factName": "departure"}, "rhs": {"type": "LITERAL", "value": 30}},
                            {"operator": "isDefined", "lhs": {"type": "TEMPORARY_FACT", "factName": "scratch"}}
                        ]}
                    }
                }]
            }]
        }));

        assert_eq!(facts, vec!["currentTime", "departure"]);
    }

    #[test]
    fn test_ruleset_without_conditions_watches_nothing() {
        let facts = watched(json!({
            "rulesets": [{
                "id": "rs",
                "rules": [{"id": "r1", "rootElement": {"blockType": "ACTION", "action": {"type": "noop"}}}]
            }]
        }));
        assert!(facts.is_empty());
    }
}
