//! 编排器
//!
//! 宿主与 Agent 之间的唯一入口：持有 tokio runtime、buffer 注册表、事件闸门、
//! Agent 生命周期、请求客户端和渲染跳板。
//!
//! 宿主事件分两类：
//! - 阻塞事件（保存前格式化、补全查询）在调用线程上同步执行，超过宽限时间记录慢事件日志
//! - 其余事件投递到事件线程按 FIFO 执行，立即返回
//!
//! 处理器里的错误和 panic 都在这里被拦截，不会传回宿主的事件循环。

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::agent::{AgentEvents, AgentHandle, AgentLauncher, AgentLifecycle};
use crate::client::{Callback, PendingRequest, RequestClient};
use crate::cmd_prompt;
use crate::config::BridgeConfig;
use crate::dispatch::ClientActionDispatcher;
use crate::error::Result;
use crate::gate::EventGate;
use crate::host::{Host, OutputHandler};
use crate::protocol::{Action, Response, TooltipData};
use crate::registry::{is_close_event, ViewRegistry};
use crate::render::{RenderFrame, RenderTrampoline};
use crate::types::{CompletionResult, FmtOutcome, ViewId, ViewInfo, ViewState, CMD_PROMPT_LANG};

/// 协议异常时使用的输出面板
const PROTOCOL_PANEL: &str = "agent-bridge.protocol";

/// 宿主事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    New,
    Activated,
    Modified,
    SelectionModified,
    PreSave,
    PostSave,
    Load,
    PreClose,
    Close,
    /// 悬停（行列从 0 开始）
    Hover { row: u64, col: u64 },
    /// 补全查询
    QueryCompletions { prefix: String, locations: Vec<usize> },
}

impl HostEvent {
    /// 事件名
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::New => "new",
            HostEvent::Activated => "activated",
            HostEvent::Modified => "modified",
            HostEvent::SelectionModified => "selection_modified",
            HostEvent::PreSave => "pre_save",
            HostEvent::PostSave => "post_save",
            HostEvent::Load => "load",
            HostEvent::PreClose => "pre_close",
            HostEvent::Close => "close",
            HostEvent::Hover { .. } => "hover",
            HostEvent::QueryCompletions { .. } => "query_completions",
        }
    }

    /// 是否需要在调用线程上同步处理
    pub fn is_blocking(&self) -> bool {
        matches!(self, HostEvent::PreSave | HostEvent::QueryCompletions { .. })
    }
}

/// 阻塞事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutput {
    Completions(CompletionResult),
    Fmt(FmtOutcome),
}

type EventTask = Box<dyn FnOnce(&Inner) + Send>;

/// 编排器
pub struct Orchestrator {
    inner: Arc<Inner>,
    runtime: Option<Runtime>,
}

struct Inner {
    config: BridgeConfig,
    host: Arc<dyn Host>,
    registry: ViewRegistry,
    gate: EventGate,
    lifecycle: Arc<AgentLifecycle>,
    client: RequestClient,
    dispatcher: Arc<ClientActionDispatcher>,
    trampoline: RenderTrampoline,
    /// 编排器自己的状态栏文本
    status: Mutex<Vec<String>>,
    last_response: RwLock<Option<Arc<Response>>>,
    override_settings: RwLock<Map<String, Value>>,
    events_tx: mpsc::UnboundedSender<EventTask>,
}

impl Orchestrator {
    /// 创建编排器
    ///
    /// 不会启动 Agent，调用 [`Orchestrator::init`] 之后才开始处理事件。
    pub fn new(
        config: BridgeConfig,
        host: Arc<dyn Host>,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("agent-bridge-io")
            .enable_all()
            .build()?;

        let lifecycle = Arc::new(AgentLifecycle::new(
            launcher,
            runtime.handle().clone(),
            &config.env_key,
            config.agent_token_start,
        ));
        let dispatcher = Arc::new(ClientActionDispatcher::new(host.clone(), lifecycle.clone()));
        let trampoline = RenderTrampoline::new(host.clone(), dispatcher.clone(), lifecycle.clone())?;
        let client = RequestClient::new(lifecycle.clone()).with_pending_ttl(config.pending_ttl);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<EventTask>();

        let inner = Arc::new(Inner {
            config,
            host,
            registry: ViewRegistry::new(),
            gate: EventGate::new(),
            lifecycle: lifecycle.clone(),
            client,
            dispatcher,
            trampoline,
            status: Mutex::new(Vec::new()),
            last_response: RwLock::new(None),
            override_settings: RwLock::new(Map::new()),
            events_tx,
        });

        let events: Weak<Inner> = Arc::downgrade(&inner);
        lifecycle.set_events(events);

        let weak = Arc::downgrade(&inner);
        std::thread::Builder::new()
            .name("agent-bridge-events".to_string())
            .spawn(move || {
                while let Some(task) = events_rx.blocking_recv() {
                    let inner = match weak.upgrade() {
                        Some(i) => i,
                        None => break,
                    };
                    if panic::catch_unwind(AssertUnwindSafe(|| task(&inner))).is_err() {
                        tracing::error!("事件任务 panic");
                    }
                }
                tracing::debug!("事件线程退出");
            })?;

        Ok(Self {
            inner,
            runtime: Some(runtime),
        })
    }

    /// 初始化：同步环境变量、登记已打开的 buffer、开放事件、启动 Agent
    pub fn init(&self) {
        let inner = &self.inner;
        inner.sync_settings();

        let views = inner.host.open_views();
        for view in &views {
            inner.registry.view(view.id, Some(view));
        }
        inner.gate.mark_ready();
        tracing::info!("✅ Bridge 就绪，已登记 {} 个 buffer", views.len());

        if let Err(e) = inner.lifecycle.start() {
            tracing::warn!("启动 Agent 失败，将在下次请求时重试: {}", e);
        }
    }

    /// 停止 Agent 和渲染线程（可重复调用）
    pub fn shutdown(&self) {
        self.inner.lifecycle.stop(None);
        self.inner.trampoline.shutdown();
    }

    /// 处理宿主事件
    ///
    /// 阻塞事件返回处理结果；非阻塞事件排队后立即返回 `None`。
    pub fn event(&self, event: HostEvent, view: ViewInfo) -> Option<EventOutput> {
        let name = event.name();
        let blocking = event.is_blocking();
        let allow_console = matches!(event, HostEvent::QueryCompletions { .. });
        self.inner
            .dispatch(name, view, blocking, allow_console, move |inner, view| {
                inner.handle_builtin(event, view)
            })
    }

    /// 以相同的闸门和错误边界执行外部事件处理器
    ///
    /// 处理器返回的错误或 panic 都被记录并视为没有结果。
    pub fn event_with<T, F>(&self, name: &str, view: ViewInfo, blocking: bool, handler: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&ViewInfo) -> anyhow::Result<Option<T>> + Send + 'static,
    {
        self.inner
            .dispatch(name, view, blocking, false, move |_, view| handler(view))
    }

    /// 发出动作，不等待结果
    pub fn queue(&self, actions: Vec<Action>, view: &ViewInfo) -> Result<()> {
        self.inner.client.queue(actions, view)
    }

    /// 发出动作并返回等待句柄
    pub fn send(
        &self,
        actions: Vec<Action>,
        view: &ViewInfo,
        callback: Option<Callback>,
    ) -> Result<PendingRequest> {
        self.inner.client.send(actions, view, callback)
    }

    /// 手动格式化
    pub fn fmt(&self, view: &ViewInfo) -> FmtOutcome {
        self.inner.fmt(view)
    }

    /// 保存前格式化
    pub fn on_pre_save(&self, view: &ViewInfo) -> FmtOutcome {
        self.inner.on_pre_save(view)
    }

    /// 补全查询
    pub fn on_query_completions(
        &self,
        view: &ViewInfo,
        prefix: &str,
        locations: &[usize],
    ) -> Option<CompletionResult> {
        self.inner.on_query_completions(view, prefix, locations)
    }

    /// 悬停提示
    pub fn on_hover(&self, view: &ViewInfo, row: u64, col: u64) -> Result<()> {
        self.inner
            .client
            .queue(vec![Action::QueryTooltips(TooltipData { row, col })], view)
    }

    /// 整体替换编排器的状态栏文本并重新渲染
    pub fn render_status(&self, lines: Vec<String>) {
        self.inner.render_status(lines);
    }

    pub fn clear_status(&self) {
        self.inner.clear_status();
    }

    /// 在渲染线程上执行一个响应里的客户端动作
    pub fn apply_client_actions(&self, response: Arc<Response>) {
        self.inner.trampoline.apply_client_actions(response);
    }

    /// 注册 CmdOutput 处理器
    pub fn set_output_handler(&self, handler: Option<Arc<dyn OutputHandler>>) {
        self.inner.dispatcher.set_output_handler(handler);
    }

    /// 同步监听的环境变量，值变化时停止 Agent。返回是否停止了 Agent。
    pub fn sync_settings(&self) -> bool {
        self.inner.sync_settings()
    }

    /// Agent 最近下发的设置覆盖
    pub fn override_settings(&self) -> Map<String, Value> {
        self.inner.override_settings.read().clone()
    }

    /// 最近一次渲染的响应
    pub fn last_response(&self) -> Option<Arc<Response>> {
        self.inner.last_response.read().clone()
    }

    /// buffer 的语言是否启用
    pub fn enabled(&self, view: &ViewInfo) -> bool {
        self.inner.gate.enabled(&ViewState::new(view))
    }

    /// 事件能否触发 Agent 交互（会登记该 buffer）
    pub fn can_trigger_event(&self, view: Option<&ViewInfo>, allow_console: bool) -> bool {
        self.inner.can_trigger_event(view, allow_console)
    }

    /// 缓存的 buffer 状态
    pub fn view_state(&self, id: ViewId) -> Option<ViewState> {
        self.inner.registry.view(id, None)
    }

    pub fn lifecycle(&self) -> &Arc<AgentLifecycle> {
        &self.inner.lifecycle
    }

    /// 当前 Agent
    pub fn current_agent(&self) -> Option<Arc<AgentHandle>> {
        self.inner.lifecycle.current()
    }

    /// 重启 Agent
    pub fn restart(&self) -> Result<Arc<AgentHandle>> {
        self.inner.lifecycle.restart()
    }

    /// 停止当前 Agent，下次请求时懒启动
    pub fn stop(&self) -> bool {
        self.inner.lifecycle.stop(None)
    }

    /// 等待的请求数
    pub fn pending_requests(&self) -> usize {
        self.inner.client.pending_count()
    }

    /// 等待已投递的渲染任务执行完
    pub fn flush_render(&self, timeout: Duration) -> bool {
        self.inner.trampoline.flush(timeout)
    }

    /// 等待已投递的事件任务执行完
    pub fn flush_events(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        self.inner.submit(Box::new(move |_: &Inner| {
            let _ = ack_tx.send(());
        }));
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(500));
        }
    }
}

impl Inner {
    fn submit(&self, task: EventTask) {
        if self.events_tx.send(task).is_err() {
            tracing::debug!("事件线程已停止，丢弃事件任务");
        }
    }

    fn dispatch<T, F>(
        &self,
        name: &str,
        view: ViewInfo,
        blocking: bool,
        allow_console: bool,
        handler: F,
    ) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &ViewInfo) -> anyhow::Result<Option<T>> + Send + 'static,
    {
        if blocking {
            let started = Instant::now();
            let output = self.handle_event(name, &view, allow_console, handler);
            let elapsed = started.elapsed();
            if elapsed > self.config.blocking_grace {
                tracing::warn!(event = name, view = %view, "⏱️ 阻塞事件耗时 {:?}", elapsed);
            }
            return output;
        }

        let name = name.to_string();
        self.submit(Box::new(move |inner: &Inner| {
            inner.handle_event(&name, &view, allow_console, handler);
        }));
        None
    }

    fn handle_event<T, F>(&self, name: &str, view: &ViewInfo, allow_console: bool, handler: F) -> Option<T>
    where
        F: FnOnce(&Inner, &ViewInfo) -> anyhow::Result<Option<T>>,
    {
        self.registry
            .sync_on_event(name, view, self.host.open_view_ids());

        // 关闭类事件只用于清理注册表
        if is_close_event(name) {
            return None;
        }

        if !self.can_trigger_event(Some(view), allow_console) {
            return None;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| handler(self, view))) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(event = name, view = %view, "事件处理失败: {:#}", e);
                None
            }
            Err(_) => {
                tracing::error!(event = name, view = %view, "事件处理 panic");
                None
            }
        }
    }

    fn handle_builtin(&self, event: HostEvent, view: &ViewInfo) -> anyhow::Result<Option<EventOutput>> {
        let action = match event {
            HostEvent::New | HostEvent::PreClose | HostEvent::Close => return Ok(None),
            HostEvent::PreSave => return Ok(Some(EventOutput::Fmt(self.on_pre_save(view)))),
            HostEvent::QueryCompletions { prefix, locations } => {
                return Ok(self
                    .on_query_completions(view, &prefix, &locations)
                    .map(EventOutput::Completions));
            }
            HostEvent::Activated => Action::ViewActivated,
            HostEvent::Modified => Action::ViewModified,
            HostEvent::SelectionModified => Action::ViewPosChanged,
            HostEvent::PostSave => Action::ViewSaved,
            HostEvent::Load => Action::ViewLoaded,
            HostEvent::Hover { row, col } => Action::QueryTooltips(TooltipData { row, col }),
        };

        self.client.queue(vec![action], view)?;
        Ok(None)
    }

    fn can_trigger_event(&self, view: Option<&ViewInfo>, allow_console: bool) -> bool {
        let view = match view {
            Some(v) => v,
            None => return false,
        };
        if !self.gate.is_ready() {
            return false;
        }
        let state = self.registry.view(view.id, Some(view));
        self.gate.can_trigger_event(state.as_ref(), allow_console)
    }

    fn sync_settings(&self) -> bool {
        let value = self.host.env_var(&self.config.env_key);
        self.lifecycle.sync_environment(value.as_deref())
    }

    fn render_status(&self, lines: Vec<String>) {
        *self.status.lock() = lines;
        self.render(None);
    }

    fn clear_status(&self) {
        self.render_status(Vec::new());
    }

    /// 合成状态栏并投递到渲染线程
    fn render(&self, response: Option<(Arc<AgentHandle>, Arc<Response>)>) {
        let mut override_settings = None;

        if let Some((_, rs)) = &response {
            *self.last_response.write() = Some(rs.clone());

            if let Some(config) = &rs.state.config {
                self.gate.set_enabled_langs(config.enabled_for_langs.clone());
                if !config.override_settings.is_empty() {
                    *self.override_settings.write() = config.override_settings.clone();
                    override_settings = Some(config.override_settings.clone());
                }
            }
        }

        let mut status = self.status.lock().clone();
        if let Some(rs) = self.last_response.read().as_ref() {
            status.extend(rs.state.status.iter().cloned());
        }

        let (agent, response) = match response {
            Some((agent, rs)) => (Some(agent), Some(rs)),
            None => (None, None),
        };

        self.trampoline.render(RenderFrame {
            status,
            override_settings,
            response,
            agent,
        });
    }

    fn fmt(&self, view: &ViewInfo) -> FmtOutcome {
        self.fmt_save(view, Action::ViewFmt, "fmt", self.config.fmt_timeout)
    }

    fn on_pre_save(&self, view: &ViewInfo) -> FmtOutcome {
        self.fmt_save(view, Action::ViewPreSave, "pre_save", self.config.pre_save_timeout)
    }

    fn fmt_save(&self, view: &ViewInfo, action: Action, event: &str, timeout: Duration) -> FmtOutcome {
        let rq = match self.client.send(vec![action], view, None) {
            Ok(rq) => rq,
            Err(e) => {
                tracing::warn!("{} 中止 ({}): {}", event, view, e);
                return FmtOutcome::Unavailable;
            }
        };

        let rs = rq.wait(timeout);
        self.apply_fmt_response(view, event, rq.request().view.name.as_str(), rs.as_deref())
    }

    fn apply_fmt_response(
        &self,
        view: &ViewInfo,
        event: &str,
        request_name: &str,
        rs: Option<&Response>,
    ) -> FmtOutcome {
        let rs = match rs {
            Some(rs) => rs,
            None => {
                tracing::info!("{} 超时 ({})", event, view);
                return FmtOutcome::TimedOut;
            }
        };

        if let Some(err) = &rs.error {
            tracing::info!("{} 失败 ({}): {}", event, view, err);
            return FmtOutcome::AgentError;
        }

        let res_name = rs.state.view.name.as_str();
        let src = rs.state.view.src.as_str();
        if res_name.is_empty() || src.is_empty() {
            return FmtOutcome::NothingToApply;
        }

        if res_name != request_name {
            let msg = format!(
                "{} 的响应属于另一个 buffer：请求 `{}`，响应 `{}`。响应未应用，这是 Agent 的协议错误，请报告。",
                event, request_name, res_name
            );
            tracing::error!(
                critical = true,
                event,
                request = request_name,
                response = res_name,
                "格式化响应与请求的 buffer 不一致"
            );
            self.trampoline.show_output(PROTOCOL_PANEL, &msg);
            return FmtOutcome::NameMismatch;
        }

        self.trampoline.replace_src(view.id, src.to_string());
        FmtOutcome::Applied
    }

    fn on_query_completions(
        &self,
        view: &ViewInfo,
        prefix: &str,
        locations: &[usize],
    ) -> Option<CompletionResult> {
        let lang = view.lang.as_deref()?;

        let (target, action) = if lang == CMD_PROMPT_LANG {
            let pos = *locations.first()?;
            let (begin, line) = self.host.line_at(view.id, pos)?;
            let data = cmd_prompt::parse(&line, pos.saturating_sub(begin))?;
            let target = self.host.active_view(view.window_id)?;
            (target, Action::QueryCmdCompletions(data))
        } else {
            (view.clone(), Action::QueryCompletions)
        };

        tracing::trace!(view = %target, prefix, "🔍 补全查询: {}", action.name());

        let rq = match self.client.send(vec![action], &target, None) {
            Ok(rq) => rq,
            Err(e) => {
                tracing::info!("补全查询失败 ({}): {}", target, e);
                return None;
            }
        };

        let rs = match rq.wait(self.config.completion_timeout) {
            Some(rs) => rs,
            None => {
                tracing::info!("补全查询超时 ({})", target);
                return None;
            }
        };

        if let Some(err) = &rs.error {
            tracing::info!("补全查询失败 ({}): {}", target, err);
            return None;
        }

        if !rs.state.view.src.is_empty() {
            self.apply_fmt_response(
                &target,
                "query_completions",
                rq.request().view.name.as_str(),
                Some(rs.as_ref()),
            );
        }

        let entries = rs.completion_entries();
        match rs.auto_complete_opts() {
            0 => Some(CompletionResult::List(entries)),
            opts => Some(CompletionResult::WithOpts(entries, opts)),
        }
    }
}

impl AgentEvents for Inner {
    fn agent_starting(&self, agent: &Arc<AgentHandle>) {
        if self.lifecycle.is_current(agent) {
            self.render_status(vec![self.config.status_starting.clone()]);
        }
    }

    fn agent_ready(&self, agent: &Arc<AgentHandle>) {
        if !self.lifecycle.is_current(agent) {
            return;
        }
        self.clear_status();

        // 在事件线程上发送，避免在启动锁内重入
        self.submit(Box::new(|inner: &Inner| {
            if let Some(view) = inner.host.active_view(None) {
                if let Err(e) = inner.client.queue(vec![Action::ViewActivated], &view) {
                    tracing::debug!("通知活动 buffer 失败: {}", e);
                }
            }
        }));
    }

    fn agent_stopped(&self, agent: &Arc<AgentHandle>) {
        self.client.discard_bound_to(agent.token());
        if self.lifecycle.stop(Some(agent)) {
            self.clear_status();
        }
    }

    fn on_response(&self, agent: &Arc<AgentHandle>, response: Response) {
        if !self.lifecycle.is_current(agent) {
            tracing::debug!(agent = %agent.token(), "丢弃过期 Agent 的响应: {}", response.token);
            self.client.discard_bound_to(agent.token());
            agent.stop();
            return;
        }

        let rs = Arc::new(response);
        self.client.resolve(agent, rs.clone());
        self.render(Some((agent.clone(), rs)));
    }
}
