//! 日期操作符
//!
//! 日期可以是 epoch 毫秒、RFC 3339 字符串或 `YYYY-MM-DD`。
//! `dateInNextMinutes` / `dateNotInNextMinutes` 隐式依赖 `currentTime` 事实，
//! 该事实尚无值时结果为 false。

use super::{
    CURRENT_TIME_FACT, OperandConstraint, OperatorContext, OperatorDefinition, as_f64,
    parse_datetime,
};
use crate::models::FactType;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

pub(crate) fn definitions() -> Vec<OperatorDefinition> {
    vec![
        OperatorDefinition::binary(
            "inRangeDate",
            OperandConstraint::date(),
            OperandConstraint::date_range(),
            |lhs, rhs, _| {
                let bounds = rhs.as_array().map(Vec::as_slice).unwrap_or_default();
                let (Some(date), Some(from), Some(to)) = (
                    parse_datetime(lhs),
                    bounds.first().and_then(parse_datetime),
                    bounds.get(1).and_then(parse_datetime),
                ) else {
                    return Ok(false);
                };
                Ok(from <= date && date <= to)
            },
        ),
        compare("dateBefore", |a, b| a < b),
        compare("dateAfter", |a, b| a > b),
        // 同一自然日（UTC）
        compare("dateEquals", |a, b| a.date_naive() == b.date_naive()),
        compare("dateNotEquals", |a, b| a.date_naive() != b.date_naive()),
        next_minutes("dateInNextMinutes", |date, now, limit| {
            now <= date && limit.is_none_or(|limit| date <= limit)
        }),
        next_minutes("dateNotInNextMinutes", |date, _, limit| {
            limit.is_some_and(|limit| date > limit)
        }),
    ]
}

fn compare(
    id: &'static str,
    cmp: fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::date(),
        OperandConstraint::date(),
        move |lhs: &Value, rhs: &Value, _| match (parse_datetime(lhs), parse_datetime(rhs)) {
            (Some(a), Some(b)) => Ok(cmp(a, b)),
            _ => Ok(false),
        },
    )
}

fn non_negative_minutes() -> OperandConstraint {
    OperandConstraint::new(&[FactType::Number], super::Arity::Scalar, |v| {
        as_f64(v).is_some_and(|n| n >= 0.0)
    })
}

/// `now + minutes`，超出可表示的时间范围时返回 None（视为无上限）
fn window_end(now: DateTime<Utc>, minutes: f64) -> Option<DateTime<Utc>> {
    let millis = minutes * 60_000.0;
    if millis >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64).and_then(|delta| now.checked_add_signed(delta))
}

fn next_minutes(
    id: &'static str,
    check: fn(DateTime<Utc>, DateTime<Utc>, Option<DateTime<Utc>>) -> bool,
) -> OperatorDefinition {
    OperatorDefinition::binary(
        id,
        OperandConstraint::date(),
        non_negative_minutes(),
        move |lhs: &Value, rhs: &Value, ctx: &OperatorContext<'_>| {
            let (Some(date), Some(minutes), Some(now)) =
                (parse_datetime(lhs), as_f64(rhs), ctx.current_time())
            else {
                return Ok(false);
            };
            Ok(check(date, now, window_end(now, minutes)))
        },
    )
    .with_implicit_dependencies([CURRENT_TIME_FACT])
}
