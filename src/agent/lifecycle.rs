//! Agent 生命周期
//!
//! 持有唯一的当前 Agent 句柄，负责启动、重启、停止，并在监听的环境变量变化时停止 Agent。

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use super::handle::{AgentEvents, AgentHandle};
use super::launcher::{AgentLauncher, LaunchContext};
use crate::error::{Error, Result};
use crate::protocol::Response;
use crate::token::TokenCounter;

/// Agent 生命周期
pub struct AgentLifecycle {
    launcher: Arc<dyn AgentLauncher>,
    runtime: Handle,
    tokens: TokenCounter,
    env_key: String,
    /// 最近一次看到的环境变量值
    last_env: Mutex<String>,
    current: Mutex<Option<Arc<AgentHandle>>>,
    /// 串行化 启动/重启，避免并发懒启动出两个 Agent
    start_lock: Mutex<()>,
    events: RwLock<Weak<dyn AgentEvents>>,
}

/// 未接入编排器时的空回调
struct Detached;

impl AgentEvents for Detached {
    fn agent_starting(&self, _agent: &Arc<AgentHandle>) {}
    fn agent_ready(&self, _agent: &Arc<AgentHandle>) {}
    fn agent_stopped(&self, _agent: &Arc<AgentHandle>) {}
    fn on_response(&self, _agent: &Arc<AgentHandle>, _response: Response) {}
}

impl AgentLifecycle {
    pub fn new(
        launcher: Arc<dyn AgentLauncher>,
        runtime: Handle,
        env_key: &str,
        token_start: u64,
    ) -> Self {
        let detached: Weak<dyn AgentEvents> = Weak::<Detached>::new();
        Self {
            launcher,
            runtime,
            tokens: TokenCounter::new("agent").with_start(token_start),
            env_key: env_key.to_string(),
            last_env: Mutex::new(String::new()),
            current: Mutex::new(None),
            start_lock: Mutex::new(()),
            events: RwLock::new(detached),
        }
    }

    /// 接入事件回调
    pub fn set_events(&self, events: Weak<dyn AgentEvents>) {
        *self.events.write() = events;
    }

    fn events(&self) -> Option<Arc<dyn AgentEvents>> {
        self.events.read().upgrade()
    }

    /// 当前句柄
    pub fn current(&self) -> Option<Arc<AgentHandle>> {
        self.current.lock().clone()
    }

    /// 是否为当前句柄
    pub fn is_current(&self, agent: &AgentHandle) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|cur| cur.token() == agent.token())
    }

    /// 最近一次看到的环境变量值
    pub fn last_env(&self) -> String {
        self.last_env.lock().clone()
    }

    /// 启动（等同于重启）
    pub fn start(&self) -> Result<Arc<AgentHandle>> {
        self.restart()
    }

    /// 重启
    ///
    /// 新句柄先成为当前句柄，旧句柄在后台停止，不阻塞调用方。
    pub fn restart(&self) -> Result<Arc<AgentHandle>> {
        let _guard = self.start_lock.lock();
        self.restart_locked()
    }

    /// 返回当前句柄，没有则懒启动
    pub fn current_or_start(&self) -> Result<Arc<AgentHandle>> {
        if let Some(agent) = self.current() {
            return Ok(agent);
        }

        let _guard = self.start_lock.lock();
        if let Some(agent) = self.current() {
            return Ok(agent);
        }
        tracing::debug!("没有运行中的 Agent，懒启动");
        self.restart_locked()
    }

    fn restart_locked(&self) -> Result<Arc<AgentHandle>> {
        let env_value = self.last_env();
        let (agent, outbound) = AgentHandle::new(self.tokens.next(), &env_value, self.runtime.clone());

        let old = self.current.lock().replace(agent.clone());
        if let Some(old) = old {
            tracing::info!("🔄 重启 Agent: {} -> {}", old.token(), agent.token());
            self.runtime.spawn(async move {
                old.stop();
            });
        }

        if let Some(events) = self.events() {
            events.agent_starting(&agent);
        }

        let ctx = LaunchContext {
            token: agent.token().clone(),
            env_key: self.env_key.clone(),
            env_value,
        };

        match self.launcher.launch(&self.runtime, &ctx, outbound) {
            Ok(io) => {
                agent.attach(io, self.events.read().clone());
                tracing::info!("🚀 Agent 启动: {}", agent.token());
                if let Some(events) = self.events() {
                    events.agent_ready(&agent);
                }
                Ok(agent)
            }
            Err(e) => {
                tracing::error!("Agent 启动失败: {}: {}", agent.token(), e);
                if let Some(events) = self.events() {
                    events.agent_stopped(&agent);
                }
                self.stop(Some(&agent));
                Err(Error::Launch(e.to_string()))
            }
        }
    }

    /// 停止
    ///
    /// 未指定或指定的是当前句柄时，清空当前句柄并停止它；
    /// 指定的句柄已被替换时不做任何事。返回是否清空了当前句柄。
    pub fn stop(&self, agent: Option<&Arc<AgentHandle>>) -> bool {
        let stopped = {
            let mut current = self.current.lock();
            let matches = match (agent, current.as_ref()) {
                (None, Some(_)) => true,
                (Some(a), Some(cur)) => a.token() == cur.token(),
                _ => false,
            };
            if matches {
                current.take()
            } else {
                None
            }
        };

        match stopped {
            Some(agent) => {
                agent.stop();
                true
            }
            None => {
                if let Some(a) = agent {
                    tracing::debug!("忽略过期句柄的停止请求: {}", a.token());
                }
                false
            }
        }
    }

    /// 同步环境变量
    ///
    /// 值变化且与当前 Agent 启动时的值不同，停止当前 Agent，下次请求时按新值懒启动。
    /// 返回是否停止了 Agent。
    pub fn sync_environment(&self, value: Option<&str>) -> bool {
        let new = match value {
            Some(v) if !v.is_empty() => v,
            _ => return false,
        };

        {
            let mut last = self.last_env.lock();
            if *last == new {
                return false;
            }
            *last = new.to_string();
        }

        let agent = match self.current() {
            Some(a) => a,
            None => return false,
        };
        if agent.env_value() == new {
            return false;
        }

        tracing::info!(
            "Stopping agent. {} changed: `{}` -> `{}`",
            self.env_key,
            agent.env_value(),
            new
        );
        self.stop(Some(&agent))
    }
}
