//! 错误类型定义

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 没有可用的 Agent（启动失败或已关闭）
    #[error("Agent 不可用: {0}")]
    AgentUnavailable(String),

    /// Agent 进程启动失败
    #[error("Agent 启动失败: {0}")]
    Launch(String),

    /// 通道已关闭（Agent 已退出或渲染线程已停止）
    #[error("通道已关闭: {0}")]
    ChannelClosed(&'static str),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
