//! Agent 启动器
//!
//! 进程启动细节对生命周期管理是黑盒：启动器接收出站帧通道，返回入站帧通道。

#[cfg(feature = "process")]
use std::path::PathBuf;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::token::Token;

/// 入站通道容量
pub const INBOUND_CAPACITY: usize = 256;

/// 启动参数
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Agent 实例标识
    pub token: Token,
    /// 监听的环境变量名
    pub env_key: String,
    /// 启动时的环境变量值
    pub env_value: String,
}

/// 已启动 Agent 的 IO
pub struct AgentIo {
    /// Agent 输出的 JSONL 行
    pub inbound: mpsc::Receiver<String>,
    /// 子进程（进程内 Agent 为 `None`）
    pub child: Option<tokio::process::Child>,
}

/// Agent 启动器
pub trait AgentLauncher: Send + Sync {
    /// 启动 Agent
    ///
    /// `outbound` 中的每一项是一行完整的 JSON 请求，通道关闭表示 Agent 应退出。
    fn launch(
        &self,
        runtime: &Handle,
        ctx: &LaunchContext,
        outbound: mpsc::Receiver<String>,
    ) -> Result<AgentIo>;
}

/// 子进程启动器：stdin 写请求，stdout 读响应，stderr 转发到日志
#[cfg(feature = "process")]
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[cfg(feature = "process")]
impl ProcessLauncher {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[cfg(feature = "process")]
impl AgentLauncher for ProcessLauncher {
    fn launch(
        &self,
        runtime: &Handle,
        ctx: &LaunchContext,
        mut outbound: mpsc::Receiver<String>,
    ) -> Result<AgentIo> {
        use std::process::Stdio;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        use crate::error::Error;

        // 进程驱动需要在 runtime 上下文中创建
        let _guard = runtime.enter();

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("AGENT_BRIDGE_TOKEN", ctx.token.to_string())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        if !ctx.env_value.is_empty() {
            cmd.env(&ctx.env_key, &ctx.env_value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.program.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("stdin 不可用".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("stdout 不可用".to_string()))?;
        let stderr = child.stderr.take();

        // 写入任务：通道关闭时 stdin 随之关闭
        tokio::spawn(async move {
            while let Some(mut line) = outbound.recv().await {
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // 读取任务
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // 进程退出
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("读取 Agent 输出失败: {}", e);
                        break;
                    }
                }
            }
        });

        if let Some(stderr) = stderr {
            let token = ctx.token.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(agent = %token, "{}", line);
                }
            });
        }

        tracing::debug!(
            "启动 Agent 进程: {:?} (token={}, pid={:?})",
            self.program,
            ctx.token,
            child.id()
        );

        Ok(AgentIo {
            inbound: rx,
            child: Some(child),
        })
    }
}
