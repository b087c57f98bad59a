//! 规则引擎错误类型
//!
//! 错误分两类：加载期错误（整个规则目录被拒绝）和运行期错误
//! （只影响单个规则集的本次执行）。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则目录解析失败: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("文件读取失败: {0}")]
    IoError(#[from] std::io::Error),

    #[error("未知操作符 '{operator}' ({path})")]
    UnknownOperator { operator: String, path: String },

    #[error("未知动作类型 '{action_type}' ({path})")]
    UnknownAction { action_type: String, path: String },

    #[error("动作参数无效: {message} ({path})")]
    InvalidActionParameters { message: String, path: String },

    #[error("检测到循环块引用: {chain} (规则集 {ruleset})")]
    CyclicBlock { ruleset: String, chain: String },

    #[error("引用的块不存在: '{block_id}' ({path})")]
    UnknownBlockRef { block_id: String, path: String },

    #[error("操作数个数不匹配: 操作符 {operator} {message} ({path})")]
    ArityMismatch {
        operator: String,
        message: String,
        path: String,
    },

    #[error("操作数类型不匹配: 期望 {expected}, 实际 {actual} ({path})")]
    OperandTypeMismatch {
        expected: String,
        actual: String,
        path: String,
    },

    #[error("无效的路径表达式 '{expression}': {message}")]
    InvalidPath { expression: String, message: String },

    #[error("重复的标识: {0}")]
    DuplicateId(String),

    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("操作数校验失败: 操作符 {operator} 的 {side} 操作数不接受 {value}")]
    OperandValidation {
        operator: String,
        side: &'static str,
        value: String,
    },

    #[error("操作符 {operator} 执行失败: {message}")]
    OperatorFailed { operator: String, message: String },

    #[error("临时事实在同一次执行中被重复写入: {0}")]
    TemporaryFactOverwrite(String),

    #[error("规则执行失败: {0}")]
    ExecutionError(String),
}

impl RuleError {
    /// 稳定的错误码，用于日志和调试事件
    pub fn code(&self) -> &'static str {
        match self {
            Self::JsonError(_) => "INVALID_JSON",
            Self::IoError(_) => "IO_ERROR",
            Self::UnknownOperator { .. } => "UNKNOWN_OPERATOR",
            Self::UnknownAction { .. } => "UNKNOWN_ACTION",
            Self::InvalidActionParameters { .. } => "INVALID_ACTION_PARAMETERS",
            Self::CyclicBlock { .. } => "CYCLIC_BLOCK",
            Self::UnknownBlockRef { .. } => "UNKNOWN_BLOCK_REF",
            Self::ArityMismatch { .. } => "ARITY_MISMATCH",
            Self::OperandTypeMismatch { .. } => "OPERAND_TYPE_MISMATCH",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::OperandValidation { .. } => "OPERAND_VALIDATION",
            Self::OperatorFailed { .. } => "OPERATOR_FAILED",
            Self::TemporaryFactOverwrite(_) => "TEMPORARY_FACT_OVERWRITE",
            Self::ExecutionError(_) => "EXECUTION_ERROR",
        }
    }

    /// 是否为加载期错误（导致整个目录被拒绝）
    pub fn is_load_error(&self) -> bool {
        !matches!(
            self,
            Self::OperandValidation { .. }
                | Self::OperatorFailed { .. }
                | Self::TemporaryFactOverwrite(_)
                | Self::ExecutionError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
