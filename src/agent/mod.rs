//! Agent 模块 - 句柄 + 生命周期 + 启动器
//!
//! 同一时刻只有一个当前 Agent：
//! - 懒启动：第一次请求时启动
//! - 重启：新句柄立即生效，旧句柄后台停止
//! - 环境变量变化：停止当前 Agent，下次请求时按新值启动

mod handle;
mod launcher;
mod lifecycle;

pub use handle::{AgentEvents, AgentHandle, AgentState, OUTBOUND_CAPACITY};
#[cfg(feature = "process")]
pub use launcher::ProcessLauncher;
pub use launcher::{AgentIo, AgentLauncher, LaunchContext, INBOUND_CAPACITY};
pub use lifecycle::AgentLifecycle;
