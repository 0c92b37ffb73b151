//! Agent 句柄
//!
//! 一个句柄对应一次 Agent 启动。句柄之间用 [`Token`] 区分，
//! 请求绑定到发出时的句柄，句柄被替换后其响应一律作废。

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::launcher::AgentIo;
use crate::error::{Error, Result};
use crate::protocol::{AgentResponse, Response};
use crate::token::Token;

/// 出站通道容量
pub const OUTBOUND_CAPACITY: usize = 256;

/// 关闭 stdin 后等待进程退出的时间
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Agent 事件回调
///
/// 实现方不能在回调里同步调用 [`super::AgentLifecycle`] 的启动方法，
/// 需要的话应投递到别的线程。
pub trait AgentEvents: Send + Sync {
    /// 开始启动
    fn agent_starting(&self, agent: &Arc<AgentHandle>);
    /// 启动完成
    fn agent_ready(&self, agent: &Arc<AgentHandle>);
    /// 输出关闭（进程退出或被停止）
    fn agent_stopped(&self, agent: &Arc<AgentHandle>);
    /// 收到响应（在该 Agent 的读取线程上调用）
    fn on_response(&self, agent: &Arc<AgentHandle>, response: Response);
}

/// Agent 句柄
pub struct AgentHandle {
    token: Token,
    /// 启动时的环境变量值
    env_value: String,
    started_at: DateTime<Utc>,
    state: Mutex<AgentState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    child: Mutex<Option<tokio::process::Child>>,
    runtime: Handle,
}

impl AgentHandle {
    /// 创建句柄，返回出站帧的接收端（交给启动器）
    pub fn new(token: Token, env_value: &str, runtime: Handle) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = Arc::new(Self {
            token,
            env_value: env_value.to_string(),
            started_at: Utc::now(),
            state: Mutex::new(AgentState::Starting),
            outbound: Mutex::new(Some(tx)),
            child: Mutex::new(None),
            runtime,
        });
        (handle, rx)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn env_value(&self) -> &str {
        &self.env_value
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// 接上启动器返回的 IO，启动读取线程
    pub(crate) fn attach(self: &Arc<Self>, io: AgentIo, events: Weak<dyn AgentEvents>) {
        let AgentIo { mut inbound, child } = io;

        {
            let mut state = self.state.lock();
            if *state == AgentState::Starting {
                *state = AgentState::Running;
                *self.child.lock() = child;
            } else {
                // 启动过程中已被停止
                drop(state);
                if let Some(mut child) = child {
                    let _ = child.start_kill();
                }
            }
        }

        let handle = self.clone();
        self.runtime.spawn_blocking(move || {
            while let Some(line) = inbound.blocking_recv() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let response: AgentResponse = match serde_json::from_str(line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(agent = %handle.token, "解析响应失败: {}", e);
                        continue;
                    }
                };

                match events.upgrade() {
                    Some(events) => events.on_response(&handle, response.into()),
                    None => break,
                }
            }

            tracing::debug!(agent = %handle.token, "📤 Agent 输出关闭");
            handle.stop();
            if let Some(events) = events.upgrade() {
                events.agent_stopped(&handle);
            }
        });
    }

    /// 发送一行请求（不等待）
    pub fn send_frame(&self, line: String) -> Result<()> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(Error::ChannelClosed("agent"))?;

        sender.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(agent = %self.token, "📡 Channel full, dropping request");
                Error::AgentUnavailable(format!("{} 出站队列已满", self.token))
            }
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed("agent"),
        })
    }

    /// 停止 Agent
    ///
    /// 关闭 stdin，等待进程退出，超时后强杀。只有第一次调用生效，返回是否由本次调用停止。
    pub fn stop(&self) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, AgentState::Stopping | AgentState::Stopped) {
                return false;
            }
            *state = AgentState::Stopping;
        }

        // 关闭出站通道 → stdin EOF
        self.outbound.lock().take();

        if let Some(mut child) = self.child.lock().take() {
            let token = self.token.clone();
            self.runtime.spawn(async move {
                match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => tracing::debug!(agent = %token, "Agent 进程退出: {}", status),
                    Ok(Err(e)) => tracing::warn!(agent = %token, "等待 Agent 退出失败: {}", e),
                    Err(_) => {
                        tracing::warn!(agent = %token, "Agent 未在 {:?} 内退出，强制结束", EXIT_GRACE);
                        let _ = child.start_kill();
                    }
                }
            });
        }

        *self.state.lock() = AgentState::Stopped;
        tracing::info!(agent = %self.token, "🛑 Agent 已停止");
        true
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("token", &self.token.to_string())
            .field("env_value", &self.env_value)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenCounter;

    #[test]
    fn test_stop_is_idempotent_and_closes_outbound() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let tokens = TokenCounter::new("agent");
        let (handle, mut rx) = AgentHandle::new(tokens.next(), "/go", rt.handle().clone());

        assert_eq!(handle.state(), AgentState::Starting);
        handle.send_frame("{}".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "{}");

        assert!(handle.stop());
        assert!(!handle.stop());
        assert_eq!(handle.state(), AgentState::Stopped);

        // 出站通道已关闭
        assert!(handle.send_frame("{}".to_string()).is_err());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
