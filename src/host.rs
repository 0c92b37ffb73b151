//! 宿主接口
//!
//! 宿主编辑器的窗口/view API 对 Bridge 是黑盒，只通过这里的 trait 访问。
//! 除 `open_views`/`open_view_ids`/`active_view`/`line_at`/`env_var` 外，
//! 其余方法只会在渲染线程上调用。

use crate::protocol::Response;
use crate::types::{ViewId, ViewInfo, WindowId};

/// 宿主编辑器
pub trait Host: Send + Sync {
    /// 当前所有打开的 buffer 快照
    fn open_views(&self) -> Vec<ViewInfo>;

    /// 当前所有打开的 buffer id
    fn open_view_ids(&self) -> Vec<ViewId> {
        self.open_views().iter().map(|v| v.id).collect()
    }

    /// 窗口中的活动 view（`None` 表示当前活动窗口）
    fn active_view(&self, window: Option<WindowId>) -> Option<ViewInfo>;

    /// 返回 `pos` 所在行的起始偏移和整行文本
    fn line_at(&self, view: ViewId, pos: usize) -> Option<(usize, String)>;

    /// 替换 buffer 内容
    fn replace_src(&self, view: ViewId, src: &str);

    /// 整体替换状态栏文本
    fn set_status(&self, status: &[String]);

    /// 聚焦到文件位置
    fn focus(&self, target: &str, row: i64, col: i64);

    /// 在输出面板显示文本
    fn show_output(&self, panel: &str, text: &str);

    /// 应用 Agent 下发的设置覆盖
    fn apply_override_settings(&self, _settings: &serde_json::Map<String, serde_json::Value>) {}

    /// 读取环境变量（默认读进程环境）
    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// CmdOutput 动作的外部处理器
pub trait OutputHandler: Send + Sync {
    fn handle_output(&self, response: &Response, data: &serde_json::Value);
}

impl<F> OutputHandler for F
where
    F: Fn(&Response, &serde_json::Value) + Send + Sync,
{
    fn handle_output(&self, response: &Response, data: &serde_json::Value) {
        self(response, data)
    }
}
