//! agent-bridge - 编辑器与语言 Agent 之间的桥接层
//!
//! 宿主编辑器把 buffer 事件交给 Bridge，Bridge 把它们转换成动作请求，
//! 通过 JSONL 发给一个外部 Agent 进程，再把 Agent 的响应（状态栏、格式化结果、
//! 补全、客户端动作）渲染回宿主。
//!
//! # 核心功能
//!
//! - **Agent 生命周期**: 懒启动、重启、环境变量变化时停止
//! - **请求/响应**: Token 关联，限时等待，Agent 被替换后旧响应一律作废
//! - **渲染跳板**: 所有宿主可见的修改在单一线程上按顺序执行
//! - **事件分发**: 阻塞事件同步执行，其余事件排队异步执行
//!
//! # Feature Flags
//!
//! - `process`: 子进程启动器 [`ProcessLauncher`] 和 `bridge-stub-agent`
//!
//! # 架构
//!
//! 宿主只和 [`Orchestrator`] 打交道。宿主 API 通过 [`Host`] trait 注入，
//! Agent 的启动方式通过 [`AgentLauncher`] trait 注入。

pub mod agent;
pub mod bootstrap;
pub mod client;
pub mod cmd_prompt;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod host;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod render;
pub mod token;
pub mod types;

// Re-exports
#[cfg(feature = "process")]
pub use agent::ProcessLauncher;
pub use agent::{AgentEvents, AgentHandle, AgentIo, AgentLauncher, AgentLifecycle, LaunchContext};
pub use bootstrap::extension_file;
pub use client::{Callback, PendingRequest, Request, RequestClient};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use host::{Host, OutputHandler};
pub use orchestrator::{EventOutput, HostEvent, Orchestrator};
pub use protocol::{Action, ClientAction, Response};
pub use token::{Token, TokenCounter};
pub use types::*;
