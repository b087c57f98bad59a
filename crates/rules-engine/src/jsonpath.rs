//! 事实路径查询
//!
//! 支持 JSONPath 的常用子集，加载期解析，运行期只做遍历：
//!
//! - `$` 根节点（可省略，`a.b[0]` 等价于 `$.a.b[0]`）
//! - `.name` / `['name']` 子字段
//! - `[n]` 数组下标，负数从末尾计数
//! - `[*]` / `.*` 通配
//! - `..name` / `..*` 递归下降
//!
//! 结果不包装：恰好一个匹配时返回该值，多个匹配返回数组，无匹配返回 `None`。

use crate::error::{Result, RuleError};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
}

/// 已解析的路径表达式
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    expression: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// 解析路径表达式
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |message: &str| RuleError::InvalidPath {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid("路径不能为空"));
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut segments = Vec::new();

        let mut pos = if chars[0] == '$' {
            1
        } else {
            // 裸路径 "a.b" 视作 "$.a.b"
            let (name, next) = read_name(&chars, 0);
            if name.is_empty() {
                return Err(invalid("路径必须以 '$' 或字段名开头"));
            }
            segments.push(Segment::Child(name));
            next
        };

        while pos < chars.len() {
            match chars[pos] {
                '.' if chars.get(pos + 1) == Some(&'.') => {
                    pos += 2;
                    if chars.get(pos) == Some(&'*') {
                        segments.push(Segment::DescendantWildcard);
                        pos += 1;
                    } else {
                        let (name, next) = read_name(&chars, pos);
                        if name.is_empty() {
                            return Err(invalid("'..' 之后缺少字段名"));
                        }
                        segments.push(Segment::Descendant(name));
                        pos = next;
                    }
                }
                '.' => {
                    pos += 1;
                    if chars.get(pos) == Some(&'*') {
                        segments.push(Segment::Wildcard);
                        pos += 1;
                    } else {
                        let (name, next) = read_name(&chars, pos);
                        if name.is_empty() {
                            return Err(invalid("'.' 之后缺少字段名"));
                        }
                        segments.push(Segment::Child(name));
                        pos = next;
                    }
                }
                '[' => {
                    let close = chars[pos..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| pos + offset)
                        .ok_or_else(|| invalid("缺少 ']'"))?;
                    let inner: String = chars[pos + 1..close].iter().collect();
                    segments.push(parse_bracket(inner.trim()).ok_or_else(|| invalid("无法识别的下标"))?);
                    pos = close + 1;
                }
                c => {
                    return Err(invalid(&format!("位置 {} 出现意外字符 '{}'", pos, c)));
                }
            }
        }

        Ok(Self {
            expression: expression.to_string(),
            segments,
        })
    }

    /// 原始表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 返回所有匹配节点
    pub fn query<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                apply(segment, value, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    /// 解析为单个值（不包装）
    pub fn resolve(&self, root: &Value) -> Option<Value> {
        let mut matches = self.query(root);
        match matches.len() {
            0 => None,
            1 => matches.pop().cloned(),
            _ => Some(Value::Array(matches.into_iter().cloned().collect())),
        }
    }
}

impl FromStr for JsonPath {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    let quoted = inner.len() >= 2
        && ((inner.starts_with('\'') && inner.ends_with('\''))
            || (inner.starts_with('"') && inner.ends_with('"')));
    if quoted {
        return Some(Segment::Child(inner[1..inner.len() - 1].to_string()));
    }
    inner.parse::<i64>().ok().map(Segment::Index)
}

fn apply<'a>(segment: &Segment, value: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Child(name) => match value {
            Value::Object(map) => out.extend(map.get(name)),
            // 兼容 "items.0.name" 写法
            Value::Array(arr) => out.extend(name.parse::<usize>().ok().and_then(|i| arr.get(i))),
            _ => {}
        },
        Segment::Index(index) => {
            if let Value::Array(arr) = value {
                let len = arr.len() as i64;
                let i = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&i) {
                    out.push(&arr[i as usize]);
                }
            }
        }
        Segment::Wildcard => children(value, out),
        Segment::Descendant(name) => descend(value, &mut |v: &'a Value| {
            if let Value::Object(map) = v {
                out.extend(map.get(name));
            }
        }),
        Segment::DescendantWildcard => descend(value, &mut |v: &'a Value| children(v, out)),
    }
}

fn children<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => out.extend(map.values()),
        Value::Array(arr) => out.extend(arr.iter()),
        _ => {}
    }
}

/// 先序遍历 value 及其全部后代
fn descend<'a>(value: &'a Value, visit: &mut dyn FnMut(&'a Value)) {
    visit(value);
    match value {
        Value::Object(map) => map.values().for_each(|v| descend(v, visit)),
        Value::Array(arr) => arr.iter().for_each(|v| descend(v, visit)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trip() -> Value {
        json!({
            "destination": {"code": "PAR", "country": "FR"},
            "segments": [
                {"origin": "NCE", "price": 120},
                {"origin": "PAR", "price": 80}
            ]
        })
    }

    #[test]
    fn test_single_match_is_unwrapped() {
        let path = JsonPath::parse("$.destination.code").unwrap();
        assert_eq!(path.resolve(&trip()), Some(json!("PAR")));

        let bracket = JsonPath::parse("$['destination']['country']").unwrap();
        assert_eq!(bracket.resolve(&trip()), Some(json!("FR")));
    }

    #[test]
    fn test_bare_dotted_path() {
        let path = JsonPath::parse("segments.1.origin").unwrap();
        assert_eq!(path.resolve(&trip()), Some(json!("PAR")));
    }

    #[test]
    fn test_index_and_negative_index() {
        assert_eq!(
            JsonPath::parse("$.segments[0].price").unwrap().resolve(&trip()),
            Some(json!(120))
        );
        assert_eq!(
            JsonPath::parse("$.segments[-1].origin").unwrap().resolve(&trip()),
            Some(json!("PAR"))
        );
        assert_eq!(JsonPath::parse("$.segments[5]").unwrap().resolve(&trip()), None);
    }

    #[test]
    fn test_multiple_matches_become_array() {
        let path = JsonPath::parse("$.segments[*].price").unwrap();
        assert_eq!(path.resolve(&trip()), Some(json!([120, 80])));

        let recursive = JsonPath::parse("$..origin").unwrap();
        assert_eq!(recursive.resolve(&trip()), Some(json!(["NCE", "PAR"])));
    }

    #[test]
    fn test_missing_path_is_none() {
        let path = JsonPath::parse("$.passenger.name").unwrap();
        assert_eq!(path.resolve(&trip()), None);
        assert_eq!(path.resolve(&json!("scalar")), None);
    }

    #[test]
    fn test_root_path() {
        let path = JsonPath::parse("$").unwrap();
        assert_eq!(path.resolve(&json!(3)), Some(json!(3)));
    }

    #[test]
    fn test_invalid_expressions() {
        for expression in ["", "$.", "$..", "$[abc", "$[abc]", "$x"] {
            let err = JsonPath::parse(expression).unwrap_err();
            assert_eq!(err.code(), "INVALID_PATH", "expression: {:?}", expression);
        }
    }
}
