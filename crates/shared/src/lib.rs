//! 共享库
//!
//! 包含规则引擎进程共用的配置加载、文件热更新监听和可观测性初始化代码。

pub mod config;
pub mod config_watcher;
pub mod observability;
