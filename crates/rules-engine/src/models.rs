//! 规则引擎领域模型
//!
//! 规则目录的 JSON 结构：规则集 -> 规则 -> 块树 -> 条件 -> 操作数。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 事实快照：事实名 -> 最新值，缺失的键表示事实尚未产生值
pub type FactSnapshot = BTreeMap<String, Value>;

/// 事实声明类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    String,
    Number,
    Date,
    Object,
    Boolean,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
            Self::Object => "object",
            Self::Boolean => "boolean",
        }
    }
}

/// 操作数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operand {
    /// 字面量
    Literal {
        #[serde(default)]
        value: Value,
    },
    /// 引用事实，可选 JSONPath 路径
    Fact {
        #[serde(rename = "factName")]
        fact_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// 引用本次规则集执行中由 SET_FACT 写入的临时事实
    #[serde(alias = "RUNTIME_FACT")]
    TemporaryFact {
        #[serde(rename = "factName")]
        fact_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn fact(name: impl Into<String>) -> Self {
        Self::Fact {
            fact_name: name.into(),
            path: None,
        }
    }

    pub fn fact_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Fact {
            fact_name: name.into(),
            path: Some(path.into()),
        }
    }

    pub fn temporary(name: impl Into<String>) -> Self {
        Self::TemporaryFact {
            fact_name: name.into(),
            path: None,
        }
    }
}

/// 单个操作符调用（一元或二元）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operator: String,
    pub lhs: Operand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Operand>,
}

/// 条件树
///
/// `{"all": [...]}` / `{"any": [...]}` / `{"not": ...}` / `{"operator": .., "lhs": .., "rhs": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Operation(Operation),
}

impl Condition {
    pub fn binary(operator: impl Into<String>, lhs: Operand, rhs: Operand) -> Self {
        Self::Operation(Operation {
            operator: operator.into(),
            lhs,
            rhs: Some(rhs),
        })
    }

    pub fn unary(operator: impl Into<String>, operand: Operand) -> Self {
        Self::Operation(Operation {
            operator: operator.into(),
            lhs: operand,
            rhs: None,
        })
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { all: conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Any { any: conditions }
    }

    pub fn not(condition: Condition) -> Self {
        Self::Not {
            not: Box::new(condition),
        }
    }
}

/// 输出动作：不透明、带类型的指令，由宿主应用分发
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl OutputAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// 规则块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "blockType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Block {
    Action {
        action: OutputAction,
    },
    IfElse {
        /// 缺省时视为恒真
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
        #[serde(rename = "successElements", default)]
        success_elements: Vec<Block>,
        #[serde(rename = "failureElements", default)]
        failure_elements: Vec<Block>,
    },
    SetFact {
        fact: String,
        value: Operand,
    },
    BlockRef {
        #[serde(rename = "blockId")]
        block_id: String,
    },
}

impl Block {
    pub fn action(action: OutputAction) -> Self {
        Self::Action { action }
    }

    pub fn if_else(condition: Condition, success: Vec<Block>, failure: Vec<Block>) -> Self {
        Self::IfElse {
            condition: Some(condition),
            success_elements: success,
            failure_elements: failure,
        }
    }
}

/// 规则：一棵块树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "rootElement", alias = "rootBlock")]
    pub root_element: Block,
}

/// 规则集生效时间范围，边界为日期字符串或毫秒时间戳，缺省表示不限
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidityRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
}

/// 宿主组件标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentifier {
    #[serde(default)]
    pub library: String,
    pub name: String,
}

impl ItemIdentifier {
    pub fn new(library: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            name: name.into(),
        }
    }

    /// 组件激活计数使用的键：`library#name`
    pub fn key(&self) -> String {
        format!("{}#{}", self.library, self.name)
    }
}

/// 按需激活：任一关联组件处于激活状态时规则集才生效
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkedComponents {
    #[serde(default)]
    pub or: Vec<ItemIdentifier>,
}

/// 规则集：激活的最小单位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ruleset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rules: Vec<Rule>,
    /// 可被 BLOCK_REF 引用的具名块
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_range: Option<ValidityRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_components: Option<LinkedComponents>,
}

/// 规则目录（序列化形式）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleCatalogDefinition {
    #[serde(default)]
    pub rulesets: Vec<Ruleset>,
}

impl RuleCatalogDefinition {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
