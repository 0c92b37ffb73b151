//! 请求客户端
//!
//! 构造动作请求并发给当前 Agent：
//! - `queue`：发出即返回
//! - `send`：登记等待项，返回可限时等待的 [`PendingRequest`]
//!
//! 每个等待项记录发出时绑定的 Agent。响应只在其绑定的 Agent 仍是当前 Agent 时生效；
//! Agent 被替换后，它的等待项不会再被解决，调用方等到超时即可。这是唯一的取消机制。
//!
//! 等待超时即移除等待项（回调也随之作废）；从未被等待的带回调等待项在超过
//! `pending_ttl` 后于下次发送时清理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::agent::{AgentHandle, AgentLifecycle};
use crate::error::Result;
use crate::protocol::{Action, AgentRequest, RequestProps, Response, ViewProps};
use crate::token::{Token, TokenCounter};
use crate::types::ViewInfo;

/// 响应回调（在 Agent 读取线程上调用，不要阻塞）
pub type Callback = Box<dyn FnOnce(&Arc<Response>) + Send>;

/// 已发出的请求
#[derive(Debug, Clone)]
pub struct Request {
    pub token: Token,
    /// 发出时绑定的 Agent
    pub agent: Token,
    pub actions: Vec<Action>,
    /// 发出时的 buffer 快照
    pub view: ViewProps,
    pub created_at: DateTime<Utc>,
}

/// 单次响应的等待槽
#[derive(Default)]
struct ResponseSlot {
    value: Mutex<Option<Arc<Response>>>,
    cond: Condvar,
}

impl ResponseSlot {
    fn fill(&self, response: Arc<Response>) {
        *self.value.lock() = Some(response);
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<Arc<Response>> {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();
        while value.is_none() {
            if self.cond.wait_until(&mut value, deadline).timed_out() {
                break;
            }
        }
        value.clone()
    }
}

struct PendingEntry {
    agent: Token,
    slot: Arc<ResponseSlot>,
    callback: Option<Callback>,
    sent_at: Instant,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// 等待中的请求
pub struct PendingRequest {
    request: Request,
    slot: Arc<ResponseSlot>,
    table: PendingTable,
    has_callback: bool,
}

impl PendingRequest {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn token(&self) -> &Token {
        &self.request.token
    }

    /// 阻塞当前线程直到收到响应或超时（超时返回 `None`）
    ///
    /// 不要在渲染线程上调用。
    pub fn wait(&self, timeout: Duration) -> Option<Arc<Response>> {
        let response = self.slot.wait(timeout);
        if response.is_none() && self.table.lock().remove(&self.request.token.to_string()).is_some() {
            tracing::debug!("等待超时，移除等待项: {}", self.request.token);
        }
        response
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        // 有回调的请求保留等待项，直到响应到达或 Agent 被替换
        if !self.has_callback {
            self.table.lock().remove(&self.request.token.to_string());
        }
    }
}

const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60);

/// 请求客户端
pub struct RequestClient {
    lifecycle: Arc<AgentLifecycle>,
    tokens: TokenCounter,
    pending: PendingTable,
    pending_ttl: Duration,
}

impl RequestClient {
    pub fn new(lifecycle: Arc<AgentLifecycle>) -> Self {
        Self {
            lifecycle,
            tokens: TokenCounter::new("rq"),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pending_ttl: DEFAULT_PENDING_TTL,
        }
    }

    /// 设置等待项的最长保留时间
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    fn frame(&self, token: &Token, actions: &[Action], view: &ViewProps) -> Result<String> {
        let request = AgentRequest {
            cookie: token.to_string(),
            props: RequestProps { view: view.clone() },
            actions: actions.to_vec(),
        };
        Ok(serde_json::to_string(&request)?)
    }

    /// 发出动作，不等待结果
    pub fn queue(&self, actions: Vec<Action>, view: &ViewInfo) -> Result<()> {
        let agent = self.lifecycle.current_or_start()?;
        let token = self.tokens.next();
        let line = self.frame(&token, &actions, &ViewProps::from(view))?;

        tracing::trace!(
            "📨 queue {} → {}: {:?}",
            token,
            agent.token(),
            actions.iter().map(Action::name).collect::<Vec<_>>()
        );
        agent.send_frame(line)
    }

    /// 发出动作并登记等待项
    pub fn send(
        &self,
        actions: Vec<Action>,
        view: &ViewInfo,
        callback: Option<Callback>,
    ) -> Result<PendingRequest> {
        let agent = self.lifecycle.current_or_start()?;
        let request = Request {
            token: self.tokens.next(),
            agent: agent.token().clone(),
            actions,
            view: ViewProps::from(view),
            created_at: Utc::now(),
        };
        let line = self.frame(&request.token, &request.actions, &request.view)?;

        let slot = Arc::new(ResponseSlot::default());
        let has_callback = callback.is_some();
        {
            let mut pending = self.pending.lock();
            let before = pending.len();
            let ttl = self.pending_ttl;
            pending.retain(|_, entry| entry.sent_at.elapsed() < ttl);
            if pending.len() < before {
                tracing::debug!("清理 {} 个过期等待项", before - pending.len());
            }
            pending.insert(
                request.token.to_string(),
                PendingEntry {
                    agent: request.agent.clone(),
                    slot: slot.clone(),
                    callback,
                    sent_at: Instant::now(),
                },
            );
        }

        tracing::trace!("📨 send {} → {}", request.token, request.agent);

        let pending = PendingRequest {
            request,
            slot,
            table: self.pending.clone(),
            has_callback,
        };

        // 发送失败时 pending 被丢弃，等待项随之移除
        if let Err(e) = agent.send_frame(line) {
            if has_callback {
                self.pending.lock().remove(&pending.request.token.to_string());
            }
            return Err(e);
        }

        Ok(pending)
    }

    /// 用响应解决等待项
    ///
    /// 等待项绑定的 Agent 与响应来源不一致，或响应来源已不是当前 Agent 时丢弃。
    /// 返回是否解决了某个等待项。
    pub fn resolve(&self, agent: &AgentHandle, response: Arc<Response>) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            let bound = pending.get(&response.token).map(|e| e.agent.clone());
            match bound {
                Some(bound) if bound != *agent.token() => {
                    tracing::debug!(
                        "丢弃孤儿响应: {} (绑定 {}, 来自 {})",
                        response.token,
                        bound,
                        agent.token()
                    );
                    pending.remove(&response.token);
                    return false;
                }
                // 持有等待表锁判断，重启不会插在判断和解决之间
                Some(_) if !self.lifecycle.is_current(agent) => {
                    tracing::debug!("丢弃过期 Agent 的响应: {} (来自 {})", response.token, agent.token());
                    pending.remove(&response.token);
                    return false;
                }
                Some(_) => pending.remove(&response.token),
                None => None,
            }
        };

        let entry = match entry {
            Some(e) => e,
            None => return false,
        };

        entry.slot.fill(response.clone());
        if let Some(callback) = entry.callback {
            callback(&response);
        }
        true
    }

    /// 丢弃绑定到某个 Agent 的全部等待项，返回丢弃数量
    pub fn discard_bound_to(&self, agent: &Token) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.agent != *agent);
        let discarded = before - pending.len();
        if discarded > 0 {
            tracing::debug!("丢弃 {} 个绑定到 {} 的请求", discarded, agent);
        }
        discarded
    }

    /// 等待中的请求数
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
