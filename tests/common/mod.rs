//! 测试共用的宿主和 Agent 替身

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_bridge::agent::{AgentIo, AgentLauncher, LaunchContext, INBOUND_CAPACITY};
use agent_bridge::protocol::{AgentRequest, AgentResponse};
use agent_bridge::{Error, Host, Token, ViewId, ViewInfo, WindowId};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// 轮询直到条件成立或超时
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// 记录所有调用的宿主
#[derive(Default)]
pub struct FakeHost {
    pub views: Mutex<Vec<ViewInfo>>,
    pub active: Mutex<Option<ViewInfo>>,
    pub lines: Mutex<HashMap<ViewId, (usize, String)>>,
    pub env: Mutex<HashMap<String, String>>,
    pub status: Mutex<Vec<Vec<String>>>,
    pub replaced: Mutex<Vec<(ViewId, String)>>,
    pub focused: Mutex<Vec<(String, i64, i64)>>,
    pub outputs: Mutex<Vec<(String, String)>>,
    pub settings: Mutex<Vec<Map<String, Value>>>,
    /// 为真时 show_output panic
    pub panic_on_output: AtomicBool,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_env(&self, key: &str, value: &str) {
        self.env.lock().insert(key.to_string(), value.to_string());
    }

    pub fn open(&self, view: ViewInfo) {
        self.views.lock().push(view);
    }

    pub fn last_status(&self) -> Option<Vec<String>> {
        self.status.lock().last().cloned()
    }
}

impl Host for FakeHost {
    fn open_views(&self) -> Vec<ViewInfo> {
        self.views.lock().clone()
    }

    fn active_view(&self, _window: Option<WindowId>) -> Option<ViewInfo> {
        self.active.lock().clone()
    }

    fn line_at(&self, view: ViewId, _pos: usize) -> Option<(usize, String)> {
        self.lines.lock().get(&view).cloned()
    }

    fn replace_src(&self, view: ViewId, src: &str) {
        self.replaced.lock().push((view, src.to_string()));
    }

    fn set_status(&self, status: &[String]) {
        self.status.lock().push(status.to_vec());
    }

    fn focus(&self, target: &str, row: i64, col: i64) {
        self.focused.lock().push((target.to_string(), row, col));
    }

    fn show_output(&self, panel: &str, text: &str) {
        if self.panic_on_output.load(Ordering::SeqCst) {
            panic!("show_output failed: {}", panel);
        }
        self.outputs.lock().push((panel.to_string(), text.to_string()));
    }

    fn apply_override_settings(&self, settings: &Map<String, Value>) {
        self.settings.lock().push(settings.clone());
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.env.lock().get(key).cloned()
    }
}

/// 根据请求生成响应，返回 `None` 表示不回复
pub type Responder = Arc<dyn Fn(&AgentRequest) -> Option<AgentResponse> + Send + Sync>;

/// 进程内 Agent：按脚本回复，记录启动和收到的请求
pub struct ScriptedLauncher {
    responder: RwLock<Responder>,
    delay: Arc<Mutex<Duration>>,
    fail: AtomicBool,
    pub launches: Mutex<Vec<LaunchContext>>,
    pub received: Arc<Mutex<Vec<(Token, AgentRequest)>>>,
    /// stdin 已关闭的 Agent
    pub closed: Arc<Mutex<Vec<Token>>>,
}

impl ScriptedLauncher {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&AgentRequest) -> Option<AgentResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: RwLock::new(Arc::new(responder)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            fail: AtomicBool::new(false),
            launches: Mutex::new(Vec::new()),
            received: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// 只回 cookie 的 Agent
    pub fn echo() -> Arc<Self> {
        Self::new(|rq| Some(reply(rq)))
    }

    /// 从不回复的 Agent
    pub fn silent() -> Arc<Self> {
        Self::new(|_| None)
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&AgentRequest) -> Option<AgentResponse> + Send + Sync + 'static,
    {
        *self.responder.write() = Arc::new(responder);
    }

    /// 之后启动的 Agent 回复前等待的时间
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn closed_count(&self, token: &Token) -> usize {
        self.closed.lock().iter().filter(|t| *t == token).count()
    }

    /// 收到的全部动作名
    pub fn action_names(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .flat_map(|(_, rq)| rq.actions.iter().map(|a| a.name().to_string()))
            .collect()
    }
}

impl AgentLauncher for ScriptedLauncher {
    fn launch(
        &self,
        runtime: &Handle,
        ctx: &LaunchContext,
        mut outbound: mpsc::Receiver<String>,
    ) -> agent_bridge::Result<AgentIo> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Launch("scripted failure".to_string()));
        }
        self.launches.lock().push(ctx.clone());

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let responder = self.responder.read().clone();
        let delay = *self.delay.lock();
        let received = self.received.clone();
        let closed = self.closed.clone();
        let token = ctx.token.clone();

        runtime.spawn(async move {
            while let Some(line) = outbound.recv().await {
                let request: AgentRequest = match serde_json::from_str(&line) {
                    Ok(rq) => rq,
                    Err(_) => continue,
                };
                received.lock().push((token.clone(), request.clone()));

                if let Some(response) = responder(&request) {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let line = serde_json::to_string(&response).unwrap();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
            closed.lock().push(token);
        });

        Ok(AgentIo {
            inbound: rx,
            child: None,
        })
    }
}

/// 只带 cookie 的空响应
pub fn reply(rq: &AgentRequest) -> AgentResponse {
    AgentResponse {
        cookie: rq.cookie.clone(),
        ..Default::default()
    }
}

/// 请求中的第一个动作名
pub fn first_action(rq: &AgentRequest) -> &str {
    rq.actions.first().map(|a| a.name()).unwrap_or("")
}

/// file-backed go buffer
pub fn go_view(id: ViewId, path: &str, src: &str) -> ViewInfo {
    ViewInfo::file(id, path, "go", src)
}
