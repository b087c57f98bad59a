//! 声明式规则引擎
//!
//! 维护一组持续更新的事实，在相关事实变化时重新评估规则集，输出：
//! - 按规则集声明顺序拼接的输出动作流
//! - 可回放的调试/历史事件日志
//!
//! 主要组成：
//! - [`facts`]：事实注册表（多播、去重、惰性激活提供者）
//! - [`compiler`]：规则目录校验与编译，[`dependencies`] 计算监听事实
//! - [`evaluator`] / [`executor`]：条件求值与块树遍历
//! - [`scheduler`]：规则集调度状态机
//! - [`debug`]：调试事件记录与历史查询

pub mod compiler;
pub mod debug;
pub mod dependencies;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod facts;
pub mod jsonpath;
pub mod metadata;
pub mod models;
pub mod operators;
pub mod scheduler;
pub mod store;
pub mod watcher;

pub use compiler::{CatalogCompiler, CompiledRuleset, RuleCatalog, ValidityWindow};
pub use debug::{DebugEvent, DebugEventKind, ExecutionStatus, RulesetExecutionDebug};
pub use engine::{EngineOptions, RulesEngine, TickSummary};
pub use error::{Result, RuleError};
pub use executor::{ActionExecutor, RuleEvaluation};
pub use facts::{FactProvider, FactRegistry, FactStream};
pub use metadata::EngineMetadata;
pub use models::{
    Block, Condition, FactSnapshot, ItemIdentifier, LinkedComponents, Operand, OutputAction, Rule,
    RuleCatalogDefinition, Ruleset, ValidityRange,
};
pub use operators::{OperatorCatalog, OperatorDefinition};
pub use scheduler::RulesetState;
