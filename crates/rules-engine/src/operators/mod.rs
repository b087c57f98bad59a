//! 规则操作符定义
//!
//! 每个操作符声明左右操作数的类型、个数约束和隐式事实依赖。
//! 内置操作符按类别拆分在子模块中，启动时汇总进 [`OperatorCatalog`]，之后只读。

pub mod array;
pub mod basic;
pub mod date;
pub mod number;

use crate::error::{Result, RuleError};
use crate::models::{FactSnapshot, FactType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// 当前时间事实名（epoch 毫秒或 RFC 3339 字符串）
pub const CURRENT_TIME_FACT: &str = "currentTime";

static NULL: Value = Value::Null;

/// 操作数个数约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// 不限制（元数据中记为 0）
    Unconstrained,
    /// 标量（1）
    Scalar,
    /// 任意长度数组（-1）
    Array,
    /// 定长元组（n）
    Tuple(usize),
}

impl Arity {
    /// 从元数据中的数字表示转换
    pub fn from_declared(n: i64) -> Self {
        match n {
            0 => Self::Unconstrained,
            1 => Self::Scalar,
            n if n < 0 => Self::Array,
            n => Self::Tuple(n as usize),
        }
    }

    pub fn declared(&self) -> i64 {
        match self {
            Self::Unconstrained => 0,
            Self::Scalar => 1,
            Self::Array => -1,
            Self::Tuple(n) => *n as i64,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Unconstrained => true,
            Self::Scalar => !value.is_array(),
            Self::Array => value.is_array(),
            Self::Tuple(n) => value.as_array().is_some_and(|arr| arr.len() == *n),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconstrained => write!(f, "任意"),
            Self::Scalar => write!(f, "标量"),
            Self::Array => write!(f, "数组"),
            Self::Tuple(n) => write!(f, "{} 元组", n),
        }
    }
}

/// 值校验函数
pub type ValueValidator = fn(&Value) -> bool;

/// 操作数约束
#[derive(Clone)]
pub struct OperandConstraint {
    /// 可接受的事实类型（数组约束时为元素类型），为空表示不限
    pub types: Vec<FactType>,
    pub arity: Arity,
    /// 是否接受未定义的值（如 isDefined）
    pub accepts_undefined: bool,
    validator: ValueValidator,
}

impl OperandConstraint {
    pub fn new(types: &[FactType], arity: Arity, validator: ValueValidator) -> Self {
        Self {
            types: types.to_vec(),
            arity,
            accepts_undefined: false,
            validator,
        }
    }

    pub fn any() -> Self {
        Self::new(&[], Arity::Unconstrained, |_| true)
    }

    pub fn string() -> Self {
        Self::new(&[FactType::String], Arity::Scalar, Value::is_string)
    }

    pub fn number() -> Self {
        Self::new(&[FactType::Number], Arity::Scalar, is_number)
    }

    /// 字符串、数字或布尔
    pub fn simple() -> Self {
        Self::new(
            &[FactType::String, FactType::Number, FactType::Boolean],
            Arity::Scalar,
            is_simple,
        )
    }

    /// 元素类型为 `types` 的数组
    pub fn array(types: &[FactType]) -> Self {
        Self::new(types, Arity::Array, |_| true)
    }

    /// `[from, to]` 数值区间，要求 from <= to
    pub fn number_range() -> Self {
        Self::new(&[FactType::Number], Arity::Tuple(2), is_range_number)
    }

    pub fn date() -> Self {
        Self::new(
            &[FactType::Date, FactType::String, FactType::Number],
            Arity::Scalar,
            is_date,
        )
    }

    /// `[from, to]` 日期区间
    pub fn date_range() -> Self {
        Self::new(
            &[FactType::Date, FactType::String, FactType::Number],
            Arity::Tuple(2),
            |v| {
                v.as_array()
                    .is_some_and(|arr| arr.iter().all(is_date))
            },
        )
    }

    pub fn allow_undefined(mut self) -> Self {
        self.accepts_undefined = true;
        self
    }

    /// 个数约束和值校验均通过
    pub fn validate(&self, value: &Value) -> bool {
        self.arity.accepts(value) && (self.validator)(value)
    }

    /// 声明类型为 `fact_type` 的事实能否作为该操作数
    pub fn accepts_fact_type(&self, fact_type: FactType) -> bool {
        self.types.is_empty() || self.types.contains(&fact_type)
    }

    pub fn describe_types(&self) -> String {
        if self.types.is_empty() {
            return "any".to_string();
        }
        self.types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Debug for OperandConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperandConstraint")
            .field("types", &self.types)
            .field("arity", &self.arity)
            .field("accepts_undefined", &self.accepts_undefined)
            .finish()
    }
}

/// 操作符执行上下文，提供隐式依赖事实的取值
pub struct OperatorContext<'a> {
    facts: &'a FactSnapshot,
}

impl<'a> OperatorContext<'a> {
    pub fn new(facts: &'a FactSnapshot) -> Self {
        Self { facts }
    }

    pub fn fact(&self, name: &str) -> Option<&'a Value> {
        self.facts.get(name).filter(|v| !v.is_null())
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.fact(CURRENT_TIME_FACT).and_then(parse_datetime)
    }
}

type UnaryFn = dyn Fn(&Value, &OperatorContext<'_>) -> Result<bool> + Send + Sync;
type BinaryFn = dyn Fn(&Value, &Value, &OperatorContext<'_>) -> Result<bool> + Send + Sync;

#[derive(Clone)]
enum Evaluator {
    Unary(Arc<UnaryFn>),
    Binary(Arc<BinaryFn>),
}

/// 操作符定义
#[derive(Clone)]
pub struct OperatorDefinition {
    pub id: String,
    pub lhs: OperandConstraint,
    pub rhs: Option<OperandConstraint>,
    pub implicit_fact_dependencies: Vec<String>,
    evaluator: Evaluator,
}

impl OperatorDefinition {
    /// 一元操作符
    pub fn unary<F>(id: impl Into<String>, lhs: OperandConstraint, evaluator: F) -> Self
    where
        F: Fn(&Value, &OperatorContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            lhs,
            rhs: None,
            implicit_fact_dependencies: Vec::new(),
            evaluator: Evaluator::Unary(Arc::new(evaluator)),
        }
    }

    /// 二元操作符
    pub fn binary<F>(
        id: impl Into<String>,
        lhs: OperandConstraint,
        rhs: OperandConstraint,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&Value, &Value, &OperatorContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            lhs,
            rhs: Some(rhs),
            implicit_fact_dependencies: Vec::new(),
            evaluator: Evaluator::Binary(Arc::new(evaluator)),
        }
    }

    pub fn with_implicit_dependencies<I, S>(mut self, facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.implicit_fact_dependencies = facts.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_unary(&self) -> bool {
        matches!(self.evaluator, Evaluator::Unary(_))
    }

    /// 执行操作符
    ///
    /// 必需操作数未定义（缺失或 null）时返回 false；
    /// 操作数存在但不满足约束时返回 `OperandValidation` 错误。
    pub fn execute(
        &self,
        lhs: Option<&Value>,
        rhs: Option<&Value>,
        ctx: &OperatorContext<'_>,
    ) -> Result<bool> {
        let Some(lhs) = self.check_operand("lhs", &self.lhs, lhs)? else {
            return Ok(false);
        };

        match &self.evaluator {
            Evaluator::Unary(evaluate) => evaluate(lhs, ctx),
            Evaluator::Binary(evaluate) => {
                let constraint = self.rhs.as_ref().ok_or_else(|| {
                    RuleError::ExecutionError(format!("操作符 {} 缺少右操作数约束", self.id))
                })?;
                let Some(rhs) = self.check_operand("rhs", constraint, rhs)? else {
                    return Ok(false);
                };
                evaluate(lhs, rhs, ctx)
            }
        }
    }

    fn check_operand<'v>(
        &self,
        side: &'static str,
        constraint: &OperandConstraint,
        value: Option<&'v Value>,
    ) -> Result<Option<&'v Value>> {
        match value.filter(|v| !v.is_null()) {
            None if constraint.accepts_undefined => Ok(Some(&NULL)),
            None => Ok(None),
            Some(v) if constraint.validate(v) => Ok(Some(v)),
            Some(v) => Err(RuleError::OperandValidation {
                operator: self.id.clone(),
                side,
                value: preview(v),
            }),
        }
    }
}

impl fmt::Debug for OperatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDefinition")
            .field("id", &self.id)
            .field("lhs", &self.lhs)
            .field("rhs", &self.rhs)
            .field("implicit_fact_dependencies", &self.implicit_fact_dependencies)
            .finish()
    }
}

/// 操作符目录
#[derive(Debug, Clone, Default)]
pub struct OperatorCatalog {
    operators: HashMap<String, Arc<OperatorDefinition>>,
}

impl OperatorCatalog {
    /// 空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含全部内置操作符的目录
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        let definitions = basic::definitions()
            .into_iter()
            .chain(number::definitions())
            .chain(array::definitions())
            .chain(date::definitions());
        for definition in definitions {
            catalog
                .operators
                .insert(definition.id.clone(), Arc::new(definition));
        }
        catalog
    }

    /// 注册自定义操作符，id 冲突时报错
    pub fn register(&mut self, definition: OperatorDefinition) -> Result<()> {
        if self.operators.contains_key(&definition.id) {
            return Err(RuleError::DuplicateId(format!("operator {}", definition.id)));
        }
        self.operators
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<OperatorDefinition>> {
        self.operators.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.operators.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// 已注册的操作符 id（排序）
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// 进程级内置操作符目录
pub fn global() -> Arc<OperatorCatalog> {
    static GLOBAL: OnceLock<Arc<OperatorCatalog>> = OnceLock::new();
    GLOBAL
        .get_or_init(|| Arc::new(OperatorCatalog::builtin()))
        .clone()
}

// ============================================================================
// 值辅助函数
// ============================================================================

/// 尝试将 Value 转换为 f64（数字或数字字符串）
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n: &f64| n.is_finite())
}

pub(crate) fn is_number(value: &Value) -> bool {
    as_f64(value).is_some()
}

pub(crate) fn is_simple(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

pub(crate) fn is_range_number(value: &Value) -> bool {
    match value.as_array().map(Vec::as_slice) {
        Some([from, to]) => match (as_f64(from), as_f64(to)) {
            (Some(from), Some(to)) => from <= to,
            _ => false,
        },
        _ => false,
    }
}

pub(crate) fn is_date(value: &Value) -> bool {
    parse_datetime(value).is_some()
}

/// 相等比较：至少一侧是数字时按数值比较（100 == 100.0，1 == "1"），
/// 两个字符串之间严格比较（"01" != "1"）
pub(crate) fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_) | Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_f64(left), as_f64(right)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            }
        }
        _ => left == right,
    }
}

/// 严格相等：不做类型转换，只把 1 和 1.0 视为同一个数
pub(crate) fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

pub(crate) fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 解析日期时间：epoch 毫秒、RFC 3339、无时区的 ISO 时间或纯日期
pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

/// 编译正则，支持 `/pattern/flags` 写法（i、m、s）
pub(crate) fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let literal = pattern
        .strip_prefix('/')
        .and_then(|body| body.rfind('/').map(|end| (&body[..end], &body[end + 1..])));
    match literal {
        Some((body, flags)) => RegexBuilder::new(body)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build(),
        None => Regex::new(pattern),
    }
}

/// 正则匹配，非法正则转为运行期错误
pub(crate) fn pattern_matches(operator: &str, pattern: &str, input: &str) -> Result<bool> {
    compile_pattern(pattern)
        .map(|regex| regex.is_match(input))
        .map_err(|e| RuleError::OperatorFailed {
            operator: operator.to_string(),
            message: format!("无效的正则表达式 '{}': {}", pattern, e),
        })
}

fn preview(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 64 {
        let head: String = rendered.chars().take(64).collect();
        format!("{}… ({})", head, type_name(value))
    } else {
        rendered
    }
}
