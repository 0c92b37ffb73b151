//! bridge-stub-agent - 最小 Agent
//!
//! 通过 stdio 说 JSONL 协议：
//! - ViewFmt / ViewPreSave：去掉每行末尾空白后回显 buffer
//! - QueryCompletions / QueryCmdCompletions：返回一个补全项
//! - 其余动作：返回空状态
//!
//! stdin 关闭即退出。日志只写 stderr，stdout 只用于响应。

use agent_bridge::protocol::{Action, AgentRequest, AgentResponse, Completion, ResponseView};
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive("bridge_stub_agent=info".parse()?))
        .init();

    let token = std::env::var("AGENT_BRIDGE_TOKEN").unwrap_or_default();
    tracing::info!("🚀 bridge-stub-agent v{} ({})", env!("CARGO_PKG_VERSION"), token);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<AgentRequest>(line) {
            Ok(request) => respond(&request),
            Err(e) => {
                tracing::warn!("无法解析请求: {}", e);
                continue;
            }
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("👋 bridge-stub-agent exiting");
    Ok(())
}

fn respond(request: &AgentRequest) -> AgentResponse {
    let mut response = AgentResponse {
        cookie: request.cookie.clone(),
        ..Default::default()
    };

    for action in &request.actions {
        tracing::debug!("{} {}", request.cookie, action.name());
        match action {
            Action::ViewFmt | Action::ViewPreSave => {
                let view = &request.props.view;
                response.state.view = ResponseView {
                    name: view.name.clone(),
                    src: trim_trailing(&view.src),
                };
            }
            Action::QueryCompletions => {
                response.state.completions.push(Completion {
                    query: "stub".to_string(),
                    title: "stub()".to_string(),
                    src: "stub()".to_string(),
                    tag: "func".to_string(),
                });
            }
            Action::QueryCmdCompletions(data) => {
                response.state.completions.push(Completion {
                    query: data.name.clone(),
                    title: format!("{} {}", data.name, data.args.join(" ")).trim().to_string(),
                    src: data.name.clone(),
                    tag: "cmd".to_string(),
                });
            }
            _ => {}
        }
    }

    response
}

/// 去掉每行末尾的空白，保留原有的换行结构
fn trim_trailing(src: &str) -> String {
    let mut out: Vec<&str> = src.split('\n').map(str::trim_end).collect();
    // 末尾只保留一个换行
    while out.len() > 1 && out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    let mut joined = out.join("\n");
    if src.ends_with('\n') {
        joined.push('\n');
    }
    joined
}
