//! Agent 协议定义
//!
//! 通信方式：Agent 进程 stdin/stdout + JSONL（每条消息一行 JSON + '\n'）
//!
//! 宿主 → Agent：[`AgentRequest`]，携带 Cookie、buffer 快照和动作列表。
//! Agent → 宿主：[`AgentResponse`]，携带 Cookie、状态快照和客户端动作。

use serde::{Deserialize, Serialize};

use crate::types::{CompletionEntry, ViewInfo};

/// 动作（宿主 → Agent）
///
/// 词汇表是封闭的，新增动作需要在这里加变体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Name", content = "Data")]
pub enum Action {
    ViewActivated,
    ViewModified,
    ViewPosChanged,
    ViewSaved,
    ViewLoaded,
    ViewFmt,
    ViewPreSave,
    QueryCompletions,
    /// cmd-prompt 命令补全
    QueryCmdCompletions(CmdCompletionData),
    /// 悬停提示
    QueryTooltips(TooltipData),
}

impl Action {
    /// 动作名（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            Action::ViewActivated => "ViewActivated",
            Action::ViewModified => "ViewModified",
            Action::ViewPosChanged => "ViewPosChanged",
            Action::ViewSaved => "ViewSaved",
            Action::ViewLoaded => "ViewLoaded",
            Action::ViewFmt => "ViewFmt",
            Action::ViewPreSave => "ViewPreSave",
            Action::QueryCompletions => "QueryCompletions",
            Action::QueryCmdCompletions(_) => "QueryCmdCompletions",
            Action::QueryTooltips(_) => "QueryTooltips",
        }
    }
}

/// cmd-prompt 补全参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CmdCompletionData {
    /// 光标在 `src` 中的偏移（字符）
    pub pos: usize,
    /// 去掉提示符后的命令行
    pub src: String,
    /// 命令名
    pub name: String,
    /// 命令参数
    pub args: Vec<String>,
}

/// 悬停位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TooltipData {
    pub row: u64,
    pub col: u64,
}

/// 请求中的 buffer 快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewProps {
    pub name: String,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl From<&ViewInfo> for ViewProps {
    fn from(view: &ViewInfo) -> Self {
        Self {
            name: view.request_name().to_string(),
            src: view.src.clone(),
            lang: view.lang.clone(),
        }
    }
}

/// 请求属性
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestProps {
    #[serde(default)]
    pub view: ViewProps,
}

/// 请求帧（宿主 → Agent）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentRequest {
    pub cookie: String,
    pub props: RequestProps,
    pub actions: Vec<Action>,
}

/// 响应帧（Agent → 宿主）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentResponse {
    pub cookie: String,
    /// 空字符串表示没有错误
    pub error: String,
    pub state: ResponseState,
}

/// 响应携带的状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResponseState {
    pub view: ResponseView,
    pub completions: Vec<Completion>,
    pub config: Option<Config>,
    pub client_actions: Vec<ClientAction>,
    pub status: Vec<String>,
}

/// 响应中的 buffer 内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResponseView {
    pub name: String,
    pub src: String,
}

/// 补全项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Completion {
    pub query: String,
    pub title: String,
    pub src: String,
    pub tag: String,
}

impl Completion {
    /// 转换为宿主补全项
    pub fn entry(&self) -> CompletionEntry {
        CompletionEntry {
            trigger: format!("{}\t{} {}", self.query, self.title, self.tag),
            contents: self.src.clone(),
        }
    }
}

/// Agent 下发的运行策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// 启用的语言，`*` 表示全部
    pub enabled_for_langs: Vec<String>,
    /// 覆盖宿主设置
    pub override_settings: serde_json::Map<String, serde_json::Value>,
    /// 补全选项，0 为中性值
    pub auto_complete_opts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_for_langs: vec!["*".to_string()],
            override_settings: serde_json::Map::new(),
            auto_complete_opts: 0,
        }
    }
}

/// 客户端动作的线上格式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawClientAction {
    pub name: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Activate 动作参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ActivateData {
    pub name: String,
    pub path: String,
    pub row: i64,
    pub col: i64,
}

impl ActivateData {
    /// 聚焦目标：优先 name
    pub fn target(&self) -> &str {
        if self.name.is_empty() {
            &self.path
        } else {
            &self.name
        }
    }
}

/// 客户端动作（Agent → 宿主，由 Bridge 执行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawClientAction", into = "RawClientAction")]
pub enum ClientAction {
    Activate(ActivateData),
    Restart,
    Shutdown,
    /// 命令输出，原样转发给外部输出处理器
    CmdOutput(serde_json::Value),
    /// 未知动作（或参数无法解析）
    Unknown {
        name: String,
        data: serde_json::Value,
    },
}

impl ClientAction {
    pub fn name(&self) -> &str {
        match self {
            ClientAction::Activate(_) => "Activate",
            ClientAction::Restart => "Restart",
            ClientAction::Shutdown => "Shutdown",
            ClientAction::CmdOutput(_) => "CmdOutput",
            ClientAction::Unknown { name, .. } => name,
        }
    }
}

impl From<RawClientAction> for ClientAction {
    fn from(raw: RawClientAction) -> Self {
        match raw.name.as_str() {
            "Activate" => {
                let data = if raw.data.is_null() {
                    Ok(ActivateData::default())
                } else {
                    serde_json::from_value(raw.data.clone())
                };
                match data {
                    Ok(data) => ClientAction::Activate(data),
                    Err(_) => ClientAction::Unknown {
                        name: raw.name,
                        data: raw.data,
                    },
                }
            }
            "Restart" => ClientAction::Restart,
            "Shutdown" => ClientAction::Shutdown,
            "CmdOutput" => ClientAction::CmdOutput(raw.data),
            _ => ClientAction::Unknown {
                name: raw.name,
                data: raw.data,
            },
        }
    }
}

impl From<ClientAction> for RawClientAction {
    fn from(action: ClientAction) -> Self {
        let name = action.name().to_string();
        let data = match action {
            ClientAction::Activate(data) => {
                serde_json::to_value(data).unwrap_or(serde_json::Value::Null)
            }
            ClientAction::Restart | ClientAction::Shutdown => serde_json::Value::Null,
            ClientAction::CmdOutput(data) => data,
            ClientAction::Unknown { data, .. } => data,
        };
        RawClientAction { name, data }
    }
}

/// 已解析的响应（构造后不可变）
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// 对应请求的 Cookie
    pub token: String,
    pub state: ResponseState,
    pub error: Option<String>,
}

impl From<AgentResponse> for Response {
    fn from(rs: AgentResponse) -> Self {
        Self {
            token: rs.cookie,
            state: rs.state,
            error: if rs.error.is_empty() { None } else { Some(rs.error) },
        }
    }
}

impl Response {
    /// 构造补全结果
    pub fn completion_entries(&self) -> Vec<CompletionEntry> {
        self.state.completions.iter().map(Completion::entry).collect()
    }

    /// 补全选项（未下发配置时为中性值）
    pub fn auto_complete_opts(&self) -> u32 {
        self.state
            .config
            .as_ref()
            .map(|c| c.auto_complete_opts)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialize_unit_and_data() {
        let json = serde_json::to_string(&Action::ViewFmt).unwrap();
        assert_eq!(json, r#"{"Name":"ViewFmt"}"#);

        let json = serde_json::to_string(&Action::QueryTooltips(TooltipData { row: 3, col: 7 })).unwrap();
        assert_eq!(json, r#"{"Name":"QueryTooltips","Data":{"Row":3,"Col":7}}"#);

        let act = Action::QueryCmdCompletions(CmdCompletionData {
            pos: 7,
            src: "foo bar".to_string(),
            name: "foo".to_string(),
            args: vec!["bar".to_string()],
        });
        let json = serde_json::to_string(&act).unwrap();
        assert!(json.contains(r#""Name":"QueryCmdCompletions""#));
        assert!(json.contains(r#""Args":["bar"]"#));
        assert!(json.contains(r#""Pos":7"#));
    }

    #[test]
    fn test_request_frame_shape() {
        let view = ViewInfo::file(4, "/p/main.go", "go", "package main");
        let rq = AgentRequest {
            cookie: "rq#001".to_string(),
            props: RequestProps {
                view: ViewProps::from(&view),
            },
            actions: vec![Action::ViewPreSave],
        };
        let value = serde_json::to_value(&rq).unwrap();
        assert_eq!(value["Cookie"], "rq#001");
        assert_eq!(value["Props"]["View"]["Name"], "/p/main.go");
        assert_eq!(value["Props"]["View"]["Src"], "package main");
        assert_eq!(value["Actions"][0]["Name"], "ViewPreSave");
    }

    #[test]
    fn test_response_deserialize_full() {
        let json = r#"{
            "Cookie": "rq#002",
            "Error": "",
            "State": {
                "View": {"Name": "/p/main.go", "Src": "package main\n"},
                "Completions": [{"Query": "Println", "Title": "func()", "Src": "Println($1)", "Tag": "fmt"}],
                "Config": {"EnabledForLangs": ["go"], "OverrideSettings": {"tab_size": 4}, "AutoCompleteOpts": 8},
                "ClientActions": [
                    {"Name": "Activate", "Data": {"Path": "/p/x.go", "Row": 3, "Col": 1}},
                    {"Name": "Restart"},
                    {"Name": "CmdOutput", "Data": {"Fd": "1", "Output": "ok"}},
                    {"Name": "Teleport", "Data": 1}
                ],
                "Status": ["ok"]
            }
        }"#;

        let rs: Response = serde_json::from_str::<AgentResponse>(json).unwrap().into();
        assert_eq!(rs.token, "rq#002");
        assert!(rs.error.is_none());
        assert_eq!(rs.state.view.name, "/p/main.go");
        assert_eq!(rs.auto_complete_opts(), 8);

        let config = rs.state.config.as_ref().unwrap();
        assert_eq!(config.enabled_for_langs, vec!["go".to_string()]);
        assert_eq!(config.override_settings["tab_size"], 4);

        let entries = rs.completion_entries();
        assert_eq!(entries[0].trigger, "Println\tfunc() fmt");
        assert_eq!(entries[0].contents, "Println($1)");

        let actions = &rs.state.client_actions;
        match &actions[0] {
            ClientAction::Activate(data) => {
                assert_eq!(data.target(), "/p/x.go");
                assert_eq!(data.row, 3);
            }
            other => panic!("Expected Activate, got {:?}", other),
        }
        assert_eq!(actions[1], ClientAction::Restart);
        assert!(matches!(actions[2], ClientAction::CmdOutput(_)));
        assert_eq!(actions[3].name(), "Teleport");
    }

    #[test]
    fn test_response_missing_fields_default() {
        let rs: Response = serde_json::from_str::<AgentResponse>(r#"{"Cookie": "x", "Error": "boom"}"#)
            .unwrap()
            .into();
        assert_eq!(rs.error.as_deref(), Some("boom"));
        assert!(rs.state.config.is_none());
        assert!(rs.state.client_actions.is_empty());
        assert_eq!(rs.auto_complete_opts(), 0);
    }

    #[test]
    fn test_bad_activate_payload_is_unknown() {
        let action: ClientAction =
            serde_json::from_str(r#"{"Name": "Activate", "Data": {"Row": "not a number"}}"#).unwrap();
        assert!(matches!(action, ClientAction::Unknown { ref name, .. } if name == "Activate"));
    }
}
