//! 数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 宿主 buffer 标识
pub type ViewId = u64;

/// 宿主窗口标识
pub type WindowId = u64;

/// cmd-prompt 伪语言（控制台内的命令输入行）
pub const CMD_PROMPT_LANG: &str = "cmd-prompt";

/// 宿主提供的 buffer 快照
///
/// 每个事件入口都带一份，Bridge 不直接访问宿主的 view 对象。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub id: ViewId,
    pub window_id: Option<WindowId>,
    /// 显示名（未保存的 buffer 也有）
    pub name: String,
    /// 磁盘文件路径
    pub file_name: Option<String>,
    /// 语言标签（由 scope 推导）
    pub lang: Option<String>,
    /// 是否为控制台 view
    pub is_console: bool,
    /// 当前内容
    pub src: String,
}

impl ViewInfo {
    /// 创建 file-backed view
    pub fn file(id: ViewId, path: &str, lang: &str, src: &str) -> Self {
        Self {
            id,
            window_id: Some(1),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_name: Some(path.to_string()),
            lang: Some(lang.to_string()),
            is_console: false,
            src: src.to_string(),
        }
    }

    /// 是否有磁盘文件
    pub fn is_file(&self) -> bool {
        self.file_name.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// 发给 Agent 的 buffer 名：优先文件路径
    pub fn request_name(&self) -> &str {
        match self.file_name.as_deref() {
            Some(f) if !f.is_empty() => f,
            _ => &self.name,
        }
    }
}

impl fmt::Display for ViewInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.request_name())
    }
}

/// Bridge 缓存的 buffer 状态
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub id: ViewId,
    pub is_file: bool,
    pub is_console: bool,
    pub lang: Option<String>,
    /// 最近一次同步的快照
    pub snapshot: ViewInfo,
}

impl ViewState {
    pub fn new(view: &ViewInfo) -> Self {
        Self {
            id: view.id,
            is_file: view.is_file(),
            is_console: view.is_console,
            lang: view.lang.clone(),
            snapshot: view.clone(),
        }
    }

    /// 用新的快照刷新
    pub fn sync(&mut self, view: &ViewInfo) {
        self.is_file = view.is_file();
        self.is_console = view.is_console;
        self.lang = view.lang.clone();
        self.snapshot = view.clone();
    }
}

/// 宿主补全列表的一项：(触发文本, 插入内容)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    pub trigger: String,
    pub contents: String,
}

/// 补全查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// 补全选项为中性值时只返回列表
    List(Vec<CompletionEntry>),
    /// 列表 + 补全选项
    WithOpts(Vec<CompletionEntry>, u32),
}

impl CompletionResult {
    pub fn entries(&self) -> &[CompletionEntry] {
        match self {
            CompletionResult::List(l) | CompletionResult::WithOpts(l, _) => l,
        }
    }
}

/// 格式化流程的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtOutcome {
    /// 请求未能发出（Agent 不可用）
    Unavailable,
    /// 等待超时
    TimedOut,
    /// Agent 返回错误
    AgentError,
    /// 响应没有可应用的内容
    NothingToApply,
    /// 响应属于另一个 buffer（协议异常）
    NameMismatch,
    /// 已提交替换
    Applied,
}
