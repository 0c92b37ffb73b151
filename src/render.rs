//! 渲染跳板
//!
//! 所有对宿主可见的修改（状态栏、替换 buffer、输出面板、客户端动作）都投递到同一个
//! 消费线程上按 FIFO 执行，宿主的 UI API 因此只会被一个逻辑线程访问。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::agent::{AgentHandle, AgentLifecycle};
use crate::dispatch::ClientActionDispatcher;
use crate::host::Host;
use crate::protocol::Response;
use crate::types::ViewId;

/// 一次渲染
#[derive(Default)]
pub struct RenderFrame {
    /// 状态栏文本（整体替换）
    pub status: Vec<String>,
    /// 需要应用的设置覆盖
    pub override_settings: Option<serde_json::Map<String, serde_json::Value>>,
    /// 渲染完成后执行其客户端动作的响应
    pub response: Option<Arc<Response>>,
    /// 产生该响应的 Agent，已不是当前 Agent 时渲染后停止它
    pub agent: Option<Arc<AgentHandle>>,
}

enum RenderTask {
    Render(RenderFrame),
    ClientActions(Arc<Response>),
    ReplaceSrc { view: ViewId, src: String },
    ShowOutput { panel: String, text: String },
    Flush(std::sync::mpsc::SyncSender<()>),
    Shutdown,
}

impl RenderTask {
    fn kind(&self) -> &'static str {
        match self {
            RenderTask::Render(_) => "render",
            RenderTask::ClientActions(_) => "client_actions",
            RenderTask::ReplaceSrc { .. } => "replace_src",
            RenderTask::ShowOutput { .. } => "show_output",
            RenderTask::Flush(_) => "flush",
            RenderTask::Shutdown => "shutdown",
        }
    }
}

/// 渲染跳板
pub struct RenderTrampoline {
    tx: mpsc::UnboundedSender<RenderTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenderTrampoline {
    /// 创建并启动消费线程
    pub fn new(
        host: Arc<dyn Host>,
        dispatcher: Arc<ClientActionDispatcher>,
        lifecycle: Arc<AgentLifecycle>,
    ) -> crate::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RenderTask>();

        let worker = std::thread::Builder::new()
            .name("agent-bridge-render".to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    let kind = task.kind();
                    let run = panic::catch_unwind(AssertUnwindSafe(|| match task {
                        RenderTask::Render(frame) => {
                            render_frame(host.as_ref(), &dispatcher, &lifecycle, frame);
                            true
                        }
                        RenderTask::ClientActions(response) => {
                            dispatcher.dispatch_all(&response);
                            true
                        }
                        RenderTask::ReplaceSrc { view, src } => {
                            host.replace_src(view, &src);
                            true
                        }
                        RenderTask::ShowOutput { panel, text } => {
                            host.show_output(&panel, &text);
                            true
                        }
                        RenderTask::Flush(ack) => {
                            let _ = ack.send(());
                            true
                        }
                        RenderTask::Shutdown => false,
                    }));
                    match run {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(_) => tracing::error!("渲染任务 panic: {}", kind),
                    }
                }
                tracing::debug!("渲染线程退出");
            })?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn submit(&self, task: RenderTask) {
        if self.tx.send(task).is_err() {
            tracing::debug!("渲染线程已停止，丢弃渲染任务");
        }
    }

    /// 渲染状态；完成后执行响应中的客户端动作
    pub fn render(&self, frame: RenderFrame) {
        self.submit(RenderTask::Render(frame));
    }

    /// 按顺序执行响应中的客户端动作
    pub fn apply_client_actions(&self, response: Arc<Response>) {
        self.submit(RenderTask::ClientActions(response));
    }

    /// 替换 buffer 内容
    pub fn replace_src(&self, view: ViewId, src: String) {
        self.submit(RenderTask::ReplaceSrc { view, src });
    }

    /// 显示输出面板
    pub fn show_output(&self, panel: &str, text: &str) {
        self.submit(RenderTask::ShowOutput {
            panel: panel.to_string(),
            text: text.to_string(),
        });
    }

    /// 等待此前投递的任务全部执行完，返回是否在超时前完成
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        if self.tx.send(RenderTask::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// 执行完已投递的任务后停止消费线程
    pub fn shutdown(&self) {
        self.submit(RenderTask::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // 在渲染线程上调用时不能 join 自己
            if worker.thread().id() != std::thread::current().id() && worker.join().is_err() {
                tracing::error!("渲染线程 panic");
            }
        }
    }
}

fn render_frame(
    host: &dyn Host,
    dispatcher: &ClientActionDispatcher,
    lifecycle: &AgentLifecycle,
    frame: RenderFrame,
) {
    if let Some(ref settings) = frame.override_settings {
        host.apply_override_settings(settings);
    }

    host.set_status(&frame.status);

    if let Some(ref response) = frame.response {
        dispatcher.dispatch_all(response);
    }

    if let Some(agent) = frame.agent {
        if !lifecycle.is_current(&agent) && agent.stop() {
            tracing::debug!("停止过期 Agent: {}", agent.token());
        }
    }
}
