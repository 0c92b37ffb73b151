//! 客户端动作分发
//!
//! 响应渲染完成后按顺序执行其中的客户端动作。动作类型是封闭的枚举，
//! 新增类型时这里的 match 会在编译期报错。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::agent::AgentLifecycle;
use crate::host::{Host, OutputHandler};
use crate::protocol::{ClientAction, Response};

/// 客户端动作分发器
pub struct ClientActionDispatcher {
    host: Arc<dyn Host>,
    lifecycle: Arc<AgentLifecycle>,
    output_handler: RwLock<Option<Arc<dyn OutputHandler>>>,
}

impl ClientActionDispatcher {
    pub fn new(host: Arc<dyn Host>, lifecycle: Arc<AgentLifecycle>) -> Self {
        Self {
            host,
            lifecycle,
            output_handler: RwLock::new(None),
        }
    }

    /// 注册 CmdOutput 处理器
    pub fn set_output_handler(&self, handler: Option<Arc<dyn OutputHandler>>) {
        *self.output_handler.write() = handler;
    }

    /// 执行单个动作，返回是否有处理器
    pub fn dispatch(&self, response: &Response, action: &ClientAction) -> bool {
        match action {
            ClientAction::Activate(data) => {
                self.host.focus(data.target(), data.row, data.col);
                true
            }
            ClientAction::Restart => {
                if let Err(e) = self.lifecycle.restart() {
                    tracing::error!("客户端动作 Restart 失败: {}", e);
                }
                true
            }
            ClientAction::Shutdown => {
                self.lifecycle.stop(None);
                true
            }
            ClientAction::CmdOutput(data) => {
                let handler = self.output_handler.read().clone();
                match handler {
                    Some(h) => h.handle_output(response, data),
                    None => tracing::debug!("CmdOutput 没有输出处理器，忽略"),
                }
                true
            }
            ClientAction::Unknown { name, data } => {
                tracing::warn!("Unknown client-action: {}: {}", name, data);
                false
            }
        }
    }

    /// 按顺序执行响应中的全部动作
    ///
    /// 单个动作 panic 只跳过该动作，后续动作照常执行。
    pub fn dispatch_all(&self, response: &Response) {
        for action in &response.state.client_actions {
            let run = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(response, action)));
            if run.is_err() {
                tracing::error!("客户端动作 panic: {} ({})", action.name(), response.token);
            }
        }
    }
}
