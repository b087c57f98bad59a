//! 规则目录编译器
//!
//! 将 JSON 规则目录校验并编译为内存中的执行结构：
//! - 每个规则集的块树展开为按下标引用的 arena，具名块只编译一次
//! - 操作符在加载期解析为目录中的定义，路径表达式预先解析
//! - 任一校验失败即拒绝整个目录，不会产生部分可用的目录

use crate::dependencies;
use crate::error::{Result, RuleError};
use crate::jsonpath::JsonPath;
use crate::metadata::EngineMetadata;
use crate::models::{
    Block, Condition, FactType, Operand, Operation, OutputAction, RuleCatalogDefinition, Ruleset,
    ValidityRange,
};
use crate::operators::{
    Arity, OperandConstraint, OperatorCatalog, OperatorDefinition, parse_datetime, type_name,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// arena 中的块下标
pub type BlockId = usize;

/// 编译后的操作数
#[derive(Debug, Clone)]
pub enum CompiledOperand {
    Literal(Value),
    Fact {
        name: String,
        path: Option<JsonPath>,
    },
    TemporaryFact {
        name: String,
        path: Option<JsonPath>,
    },
}

/// 编译后的条件树
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    All(Vec<CompiledCondition>),
    Any(Vec<CompiledCondition>),
    Not(Box<CompiledCondition>),
    Operation {
        operator: Arc<OperatorDefinition>,
        lhs: CompiledOperand,
        rhs: Option<CompiledOperand>,
    },
}

/// arena 中的块节点
#[derive(Debug, Clone)]
pub enum BlockNode {
    Action(OutputAction),
    IfElse {
        /// None 表示恒真
        condition: Option<CompiledCondition>,
        success: Vec<BlockId>,
        failure: Vec<BlockId>,
    },
    SetTemporaryFact {
        name: String,
        value: CompiledOperand,
    },
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub name: Option<String>,
    pub root: BlockId,
}

/// 规则集生效时间窗口，两端包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidityWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| from <= now) && self.to.is_none_or(|to| now <= to)
    }
}

/// 编译后的规则集
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    pub id: String,
    pub name: Option<String>,
    /// 在目录中的声明顺序
    pub index: usize,
    pub rules: Vec<CompiledRule>,
    pub blocks: Vec<BlockNode>,
    /// 需要监听的事实（加载期计算并缓存）
    pub watched_facts: BTreeSet<String>,
    pub validity: Option<ValidityWindow>,
    /// 关联组件键（`library#name`），非空时规则集按需激活
    pub linked_components: Vec<String>,
}

impl CompiledRuleset {
    /// 不依赖组件激活、仅受时间窗口约束的规则集在 `now` 时是否生效
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validity.is_none_or(|window| window.contains(now))
    }

    pub fn is_on_demand(&self) -> bool {
        !self.linked_components.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockNode> {
        self.blocks.get(id)
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.id.clone()).collect()
    }
}

/// 编译后的规则目录
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    /// 由存储在切换时分配
    pub version: u64,
    rulesets: Vec<Arc<CompiledRuleset>>,
}

impl RuleCatalog {
    /// 按声明顺序排列的规则集
    pub fn rulesets(&self) -> &[Arc<CompiledRuleset>] {
        &self.rulesets
    }

    pub fn get(&self, ruleset_id: &str) -> Option<&Arc<CompiledRuleset>> {
        self.rulesets.iter().find(|r| r.id == ruleset_id)
    }

    pub fn len(&self) -> usize {
        self.rulesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rulesets.is_empty()
    }
}

/// 规则目录编译器
pub struct CatalogCompiler {
    operators: Arc<OperatorCatalog>,
    metadata: Arc<EngineMetadata>,
}

impl CatalogCompiler {
    pub fn new(operators: Arc<OperatorCatalog>, metadata: Arc<EngineMetadata>) -> Self {
        Self {
            operators,
            metadata,
        }
    }

    pub fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    /// 从 JSON 字符串编译规则目录
    pub fn compile_json(&self, json: &str) -> Result<RuleCatalog> {
        let definition = RuleCatalogDefinition::from_json(json)?;
        self.compile(&definition)
    }

    /// 编译规则目录
    pub fn compile(&self, definition: &RuleCatalogDefinition) -> Result<RuleCatalog> {
        let mut seen = HashSet::new();
        let mut rulesets = Vec::with_capacity(definition.rulesets.len());

        for (index, ruleset) in definition.rulesets.iter().enumerate() {
            if ruleset.id.is_empty() {
                return Err(RuleError::ParseError(format!(
                    "rulesets[{}]: 规则集 ID 不能为空",
                    index
                )));
            }
            if !seen.insert(ruleset.id.as_str()) {
                return Err(RuleError::DuplicateId(format!("ruleset {}", ruleset.id)));
            }
            rulesets.push(Arc::new(self.compile_ruleset(ruleset, index)?));
        }

        Ok(RuleCatalog {
            version: 0,
            rulesets,
        })
    }

    fn compile_ruleset(&self, ruleset: &Ruleset, index: usize) -> Result<CompiledRuleset> {
        let base = format!("rulesets[{}]", index);
        let mut builder = RulesetBuilder {
            compiler: self,
            ruleset,
            base: base.clone(),
            blocks: Vec::new(),
            named: HashMap::new(),
            visiting: Vec::new(),
        };

        let mut rule_ids = HashSet::new();
        let mut rules = Vec::with_capacity(ruleset.rules.len());
        for (i, rule) in ruleset.rules.iter().enumerate() {
            let path = format!("{}.rules[{}]", base, i);
            if rule.id.is_empty() {
                return Err(RuleError::ParseError(format!("{}: 规则 ID 不能为空", path)));
            }
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(RuleError::DuplicateId(format!(
                    "rule {}/{}",
                    ruleset.id, rule.id
                )));
            }
            let root = builder.block(&rule.root_element, &format!("{}.rootElement", path))?;
            rules.push(CompiledRule {
                id: rule.id.clone(),
                name: rule.name.clone(),
                root,
            });
        }

        // 未被引用的具名块同样需要通过校验
        for name in ruleset.blocks.keys() {
            builder.named_block(name, &format!("{}.blocks", base))?;
        }

        let validity = ruleset
            .validity_range
            .as_ref()
            .map(|range| validity_window(range, &format!("{}.validityRange", base)))
            .transpose()?;
        let linked_components: Vec<String> = ruleset
            .linked_components
            .as_ref()
            .map(|linked| linked.or.iter().map(|item| item.key()).collect())
            .unwrap_or_default();

        let mut compiled = CompiledRuleset {
            id: ruleset.id.clone(),
            name: ruleset.name.clone(),
            index,
            rules,
            blocks: builder.blocks,
            watched_facts: BTreeSet::new(),
            validity,
            linked_components,
        };
        compiled.watched_facts = dependencies::compute_watched_facts(&compiled);

        Ok(compiled)
    }
}

fn validity_window(range: &ValidityRange, path: &str) -> Result<ValidityWindow> {
    let bound = |value: &Option<Value>, field: &str| -> Result<Option<DateTime<Utc>>> {
        match value {
            None => Ok(None),
            Some(value) => parse_datetime(value).map(Some).ok_or_else(|| {
                RuleError::ParseError(format!("{}.{}: 无法解析的日期 {}", path, field, value))
            }),
        }
    };
    let window = ValidityWindow {
        from: bound(&range.from, "from")?,
        to: bound(&range.to, "to")?,
    };
    if let (Some(from), Some(to)) = (window.from, window.to) {
        if from > to {
            return Err(RuleError::ParseError(format!("{}: from 晚于 to", path)));
        }
    }
    Ok(window)
}

/// 单个规则集的编译状态
struct RulesetBuilder<'a> {
    compiler: &'a CatalogCompiler,
    ruleset: &'a Ruleset,
    base: String,
    blocks: Vec<BlockNode>,
    /// 已编译的具名块
    named: HashMap<String, BlockId>,
    /// 当前展开路径上的具名块，用于检测循环
    visiting: Vec<String>,
}

impl<'a> RulesetBuilder<'a> {
    fn push(&mut self, node: BlockNode) -> BlockId {
        self.blocks.push(node);
        self.blocks.len() - 1
    }

    fn block(&mut self, block: &'a Block, path: &str) -> Result<BlockId> {
        match block {
            Block::Action { action } => {
                self.compiler.metadata.validate_action(action, path)?;
                Ok(self.push(BlockNode::Action(action.clone())))
            }
            Block::IfElse {
                condition,
                success_elements,
                failure_elements,
            } => {
                let condition = condition
                    .as_ref()
                    .map(|c| self.condition(c, &format!("{}.condition", path)))
                    .transpose()?;
                let success =
                    self.children(success_elements, &format!("{}.successElements", path))?;
                let failure =
                    self.children(failure_elements, &format!("{}.failureElements", path))?;
                Ok(self.push(BlockNode::IfElse {
                    condition,
                    success,
                    failure,
                }))
            }
            Block::SetFact { fact, value } => {
                if fact.is_empty() {
                    return Err(RuleError::ParseError(format!("{}: 临时事实名不能为空", path)));
                }
                let value = self.operand(value, None, &format!("{}.value", path))?;
                Ok(self.push(BlockNode::SetTemporaryFact {
                    name: fact.clone(),
                    value,
                }))
            }
            Block::BlockRef { block_id } => self.named_block(block_id, path),
        }
    }

    fn children(&mut self, blocks: &'a [Block], path: &str) -> Result<Vec<BlockId>> {
        blocks
            .iter()
            .enumerate()
            .map(|(i, b)| self.block(b, &format!("{}[{}]", path, i)))
            .collect()
    }

    fn named_block(&mut self, name: &str, path: &str) -> Result<BlockId> {
        if let Some(id) = self.named.get(name) {
            return Ok(*id);
        }

        if let Some(start) = self.visiting.iter().position(|n| n == name) {
            let mut chain: Vec<&str> = self.visiting[start..].iter().map(String::as_str).collect();
            chain.push(name);
            return Err(RuleError::CyclicBlock {
                ruleset: self.ruleset.id.clone(),
                chain: chain.join(" -> "),
            });
        }

        let ruleset = self.ruleset;
        let block = ruleset
            .blocks
            .get(name)
            .ok_or_else(|| RuleError::UnknownBlockRef {
                block_id: name.to_string(),
                path: path.to_string(),
            })?;

        self.visiting.push(name.to_string());
        let block_path = format!("{}.blocks['{}']", self.base, name);
        let compiled = self.block(block, &block_path);
        self.visiting.pop();

        let id = compiled?;
        self.named.insert(name.to_string(), id);
        Ok(id)
    }

    fn condition(&self, condition: &Condition, path: &str) -> Result<CompiledCondition> {
        match condition {
            Condition::All { all } => Ok(CompiledCondition::All(
                self.group(all, &format!("{}.all", path))?,
            )),
            Condition::Any { any } => Ok(CompiledCondition::Any(
                self.group(any, &format!("{}.any", path))?,
            )),
            Condition::Not { not } => Ok(CompiledCondition::Not(Box::new(
                self.condition(not, &format!("{}.not", path))?,
            ))),
            Condition::Operation(operation) => self.operation(operation, path),
        }
    }

    fn group(&self, conditions: &[Condition], path: &str) -> Result<Vec<CompiledCondition>> {
        if conditions.is_empty() {
            return Err(RuleError::ParseError(format!("逻辑组 '{}' 不能为空", path)));
        }
        conditions
            .iter()
            .enumerate()
            .map(|(i, c)| self.condition(c, &format!("{}[{}]", path, i)))
            .collect()
    }

    fn operation(&self, operation: &Operation, path: &str) -> Result<CompiledCondition> {
        let operator = self
            .compiler
            .operators
            .get(&operation.operator)
            .ok_or_else(|| RuleError::UnknownOperator {
                operator: operation.operator.clone(),
                path: path.to_string(),
            })?;

        let arity_error = |message: &str| RuleError::ArityMismatch {
            operator: operator.id.clone(),
            message: message.to_string(),
            path: path.to_string(),
        };

        let rhs = match (&operator.rhs, &operation.rhs) {
            (Some(constraint), Some(operand)) => Some(self.operand(
                operand,
                Some((operator.id.as_str(), constraint)),
                &format!("{}.rhs", path),
            )?),
            (Some(_), None) => return Err(arity_error("需要右操作数")),
            (None, Some(_)) => return Err(arity_error("是一元操作符，不接受右操作数")),
            (None, None) => None,
        };
        let lhs = self.operand(
            &operation.lhs,
            Some((operator.id.as_str(), &operator.lhs)),
            &format!("{}.lhs", path),
        )?;

        Ok(CompiledCondition::Operation { operator, lhs, rhs })
    }

    fn operand(
        &self,
        operand: &Operand,
        constraint: Option<(&str, &OperandConstraint)>,
        path: &str,
    ) -> Result<CompiledOperand> {
        match operand {
            Operand::Literal { value } => {
                if let Some((operator, constraint)) = constraint {
                    check_literal(operator, constraint, value, path)?;
                }
                Ok(CompiledOperand::Literal(value.clone()))
            }
            Operand::Fact { fact_name, path: query } => {
                let query = parse_query(fact_name, query.as_deref(), path)?;
                if let Some(declared) = self.compiler.metadata.fact_type(fact_name) {
                    check_fact_type(declared, query.is_some(), constraint, path)?;
                }
                Ok(CompiledOperand::Fact {
                    name: fact_name.clone(),
                    path: query,
                })
            }
            Operand::TemporaryFact { fact_name, path: query } => {
                let query = parse_query(fact_name, query.as_deref(), path)?;
                Ok(CompiledOperand::TemporaryFact {
                    name: fact_name.clone(),
                    path: query,
                })
            }
        }
    }
}

fn parse_query(fact_name: &str, query: Option<&str>, path: &str) -> Result<Option<JsonPath>> {
    if fact_name.is_empty() {
        return Err(RuleError::ParseError(format!("{}: 事实名不能为空", path)));
    }
    query.map(JsonPath::parse).transpose()
}

/// 字面量必须满足操作数约束；null 视作未定义，运行期求值为 false
fn check_literal(
    operator: &str,
    constraint: &OperandConstraint,
    value: &Value,
    path: &str,
) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    if !constraint.arity.accepts(value) {
        return Err(RuleError::ArityMismatch {
            operator: operator.to_string(),
            message: format!("期望{}操作数, 实际 {}", constraint.arity, value),
            path: path.to_string(),
        });
    }
    if !constraint.validate(value) {
        return Err(RuleError::OperandTypeMismatch {
            expected: constraint.describe_types(),
            actual: format!("{} {}", type_name(value), value),
            path: path.to_string(),
        });
    }
    Ok(())
}

/// 依据元数据中的事实类型做静态检查
fn check_fact_type(
    declared: FactType,
    has_path: bool,
    constraint: Option<(&str, &OperandConstraint)>,
    path: &str,
) -> Result<()> {
    if has_path {
        // 路径只对对象类型的事实有意义
        if declared != FactType::Object {
            return Err(RuleError::OperandTypeMismatch {
                expected: FactType::Object.as_str().to_string(),
                actual: declared.as_str().to_string(),
                path: path.to_string(),
            });
        }
        return Ok(());
    }

    if let Some((_, constraint)) = constraint {
        if constraint.arity == Arity::Scalar && !constraint.accepts_fact_type(declared) {
            return Err(RuleError::OperandTypeMismatch {
                expected: constraint.describe_types(),
                actual: declared.as_str().to_string(),
                path: path.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EngineMetadata;
    use serde_json::json;

    fn compiler() -> CatalogCompiler {
        CatalogCompiler::new(
            Arc::new(OperatorCatalog::builtin()),
            Arc::new(EngineMetadata::default()),
        )
    }

    fn catalog_with_rule(root: serde_json::Value) -> String {
        json!({
            "rulesets": [{
                "id": "rs",
                "rules": [{"id": "r1", "rootElement": root}]
            }]
        })
        .to_string()
    }

    fn equals_destination(value: &str) -> serde_json::Value {
        json!({
            "operator": "equals",
            "lhs": {"type": "FACT", "factName": "destination"},
            "rhs": {"type": "LITERAL", "value": value}
        })
    }

    #[test]
    fn test_compile_into_arena() {
        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": equals_destination("PAR"),
            "successElements": [
                {"blockType": "ACTION", "action": {"type": "setLanguage", "parameters": {"lang": "fr-FR"}}}
            ],
            "failureElements": [
                {"blockType": "ACTION", "action": {"type": "setLanguage", "parameters": {"lang": "en-GB"}}}
            ]
        }));

        let catalog = compiler().compile_json(&json).unwrap();
        assert_eq!(catalog.len(), 1);

        let ruleset = catalog.get("rs").unwrap();
        assert_eq!(ruleset.blocks.len(), 3);
        assert_eq!(ruleset.index, 0);
        let root = ruleset.block(ruleset.rules[0].root).unwrap();
        assert!(matches!(
            root,
            BlockNode::IfElse { condition: Some(_), success, failure }
                if success.len() == 1 && failure.len() == 1
        ));
        assert!(ruleset.watched_facts.contains("destination"));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {
                "operator": "isAwesome",
                "lhs": {"type": "FACT", "factName": "destination"}
            },
            "successElements": []
        }));

        let err = compiler().compile_json(&json).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_OPERATOR");
        assert!(err.is_load_error());
        assert!(err.to_string().contains("rulesets[0].rules[0].rootElement.condition"));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let missing_rhs = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {"operator": "equals", "lhs": {"type": "FACT", "factName": "a"}}
        }));
        assert_eq!(
            compiler().compile_json(&missing_rhs).unwrap_err().code(),
            "ARITY_MISMATCH"
        );

        let tuple = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {
                "operator": "inRangeDate",
                "lhs": {"type": "FACT", "factName": "departure"},
                "rhs": {"type": "LITERAL", "value": ["2024-01-01"]}
            }
        }));
        assert_eq!(
            compiler().compile_json(&tuple).unwrap_err().code(),
            "ARITY_MISMATCH"
        );
    }

    #[test]
    fn test_literal_type_mismatch_rejected() {
        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {
                "operator": "greaterThan",
                "lhs": {"type": "FACT", "factName": "passengers"},
                "rhs": {"type": "LITERAL", "value": "many"}
            }
        }));
        assert_eq!(
            compiler().compile_json(&json).unwrap_err().code(),
            "OPERAND_TYPE_MISMATCH"
        );
    }

    #[test]
    fn test_cyclic_block_refs_rejected() {
        let json = json!({
            "rulesets": [{
                "id": "rs",
                "blocks": {
                    "a": {"blockType": "IF_ELSE", "successElements": [{"blockType": "BLOCK_REF", "blockId": "b"}]},
                    "b": {"blockType": "IF_ELSE", "failureElements": [{"blockType": "BLOCK_REF", "blockId": "a"}]}
                },
                "rules": [{"id": "r1", "rootElement": {"blockType": "BLOCK_REF", "blockId": "a"}}]
            }]
        })
        .to_string();

        let err = compiler().compile_json(&json).unwrap_err();
        assert_eq!(err.code(), "CYCLIC_BLOCK");
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_unreferenced_self_cycle_rejected() {
        let json = json!({
            "rulesets": [{
                "id": "rs",
                "blocks": {"loop": {"blockType": "BLOCK_REF", "blockId": "loop"}},
                "rules": []
            }]
        })
        .to_string();

        assert_eq!(compiler().compile_json(&json).unwrap_err().code(), "CYCLIC_BLOCK");
    }

    #[test]
    fn test_shared_block_compiled_once() {
        let json = json!({
            "rulesets": [{
                "id": "rs",
                "blocks": {
                    "french": {"blockType": "ACTION", "action": {"type": "setLanguage", "parameters": {"lang": "fr-FR"}}}
                },
                "rules": [
                    {"id": "r1", "rootElement": {"blockType": "BLOCK_REF", "blockId": "french"}},
                    {"id": "r2", "rootElement": {"blockType": "BLOCK_REF", "blockId": "french"}}
                ]
            }]
        })
        .to_string();

        let catalog = compiler().compile_json(&json).unwrap();
        let ruleset = catalog.get("rs").unwrap();
        assert_eq!(ruleset.blocks.len(), 1);
        assert_eq!(ruleset.rules[0].root, ruleset.rules[1].root);
    }

    #[test]
    fn test_unknown_block_ref_rejected() {
        let json = catalog_with_rule(json!({"blockType": "BLOCK_REF", "blockId": "ghost"}));
        assert_eq!(
            compiler().compile_json(&json).unwrap_err().code(),
            "UNKNOWN_BLOCK_REF"
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = json!({
            "rulesets": [
                {"id": "rs", "rules": []},
                {"id": "rs", "rules": []}
            ]
        })
        .to_string();
        assert!(matches!(
            compiler().compile_json(&json),
            Err(RuleError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_unknown_action_rejected_with_metadata() {
        let metadata = EngineMetadata::from_json(
            &json!({"actions": [{"type": "setLanguage", "parameters": {"lang": {"type": "string"}}}]})
                .to_string(),
        )
        .unwrap();
        let compiler = CatalogCompiler::new(Arc::new(OperatorCatalog::builtin()), Arc::new(metadata));

        let json = catalog_with_rule(json!({
            "blockType": "ACTION",
            "action": {"type": "launchRocket"}
        }));
        assert_eq!(compiler.compile_json(&json).unwrap_err().code(), "UNKNOWN_ACTION");
    }

    #[test]
    fn test_path_on_non_object_fact_rejected() {
        let metadata =
            EngineMetadata::from_json(&json!({"facts": {"destination": "string"}}).to_string())
                .unwrap();
        let compiler = CatalogCompiler::new(Arc::new(OperatorCatalog::builtin()), Arc::new(metadata));

        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {
                "operator": "isDefined",
                "lhs": {"type": "FACT", "factName": "destination", "path": "$.code"}
            }
        }));
        assert_eq!(
            compiler.compile_json(&json).unwrap_err().code(),
            "OPERAND_TYPE_MISMATCH"
        );
    }

    #[test]
    fn test_invalid_path_rejected() {
        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {
                "operator": "isDefined",
                "lhs": {"type": "FACT", "factName": "trip", "path": "$["}
            }
        }));
        assert_eq!(compiler().compile_json(&json).unwrap_err().code(), "INVALID_PATH");
    }

    #[test]
    fn test_empty_group_rejected() {
        let json = catalog_with_rule(json!({
            "blockType": "IF_ELSE",
            "condition": {"all": []}
        }));
        let err = compiler().compile_json(&json).unwrap_err();
        assert!(err.to_string().contains("不能为空"));
    }

    #[test]
    fn test_compile_validity_and_linked_components() {
        let json = json!({
            "rulesets": [
                {
                    "id": "summer",
                    "rules": [],
                    "validityRange": {"from": "2024-06-01", "to": 1_725_148_800_000_i64}
                },
                {"id": "open", "rules": [], "validityRange": {}},
                {
                    "id": "basket",
                    "rules": [],
                    "linkedComponents": {"or": [{"library": "@shop/ui", "name": "Basket"}]}
                }
            ]
        })
        .to_string();

        let catalog = compiler().compile_json(&json).unwrap();
        let summer = catalog.get("summer").unwrap();
        let inside = DateTime::parse_from_rfc3339("2024-07-14T12:00:00Z").unwrap().with_timezone(&Utc);
        let before = DateTime::parse_from_rfc3339("2024-05-31T23:59:59Z").unwrap().with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2024-09-01T00:00:01Z").unwrap().with_timezone(&Utc);
        assert!(summer.is_valid_at(inside));
        assert!(!summer.is_valid_at(before));
        assert!(!summer.is_valid_at(after));
        assert!(!summer.is_on_demand());

        let open = catalog.get("open").unwrap();
        assert_eq!(open.validity, Some(ValidityWindow::default()));
        assert!(open.is_valid_at(before));

        let basket = catalog.get("basket").unwrap();
        assert!(basket.is_on_demand());
        assert_eq!(basket.linked_components, vec!["@shop/ui#Basket"]);
    }

    #[test]
    fn test_reject_invalid_validity_range() {
        for range in [
            json!({"from": "not a date"}),
            json!({"to": true}),
            json!({"from": "2024-09-01", "to": "2024-06-01"}),
        ] {
            let json = json!({"rulesets": [{"id": "rs", "rules": [], "validityRange": range}]});
            let err = compiler().compile_json(&json.to_string()).unwrap_err();
            assert!(matches!(err, RuleError::ParseError(_)), "{:?}", range);
        }
    }
}
