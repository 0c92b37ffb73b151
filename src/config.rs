//! Bridge 配置
//!
//! 宿主侧的静态配置。Agent 在响应中下发的运行时策略见 [`crate::protocol::Config`]。

use std::path::PathBuf;
use std::time::Duration;

/// 默认监听的环境变量
pub const DEFAULT_ENV_KEY: &str = "GOPATH";

/// Bridge 配置
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// 数据目录（默认 ~/.agent-bridge）
    pub data_dir: PathBuf,
    /// 监听的环境变量，值变化时重启 Agent
    pub env_key: String,
    /// 手动格式化的等待上限
    pub fmt_timeout: Duration,
    /// 保存前格式化的等待上限
    pub pre_save_timeout: Duration,
    /// 补全查询的等待上限
    pub completion_timeout: Duration,
    /// 阻塞事件的宽限时间，超过后记录慢事件日志
    pub blocking_grace: Duration,
    /// 等待项的最长保留时间，超过后在下次发送时清理
    pub pending_ttl: Duration,
    /// Agent 编号起始值
    pub agent_token_start: u64,
    /// Agent 启动中的状态栏文本
    pub status_starting: String,
    /// 示例扩展文件（首次使用时复制到用户目录）
    pub example_extension: Option<PathBuf>,
    /// 扩展文件后缀
    pub extension_suffix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-bridge");

        Self {
            data_dir,
            env_key: DEFAULT_ENV_KEY.to_string(),
            fmt_timeout: Duration::from_millis(5000),
            pre_save_timeout: Duration::from_millis(2000),
            completion_timeout: Duration::from_millis(500),
            blocking_grace: Duration::from_millis(100),
            pending_ttl: Duration::from_secs(60),
            agent_token_start: 1,
            status_starting: "starting agent".to_string(),
            example_extension: None,
            extension_suffix: "go".to_string(),
        }
    }
}

impl BridgeConfig {
    /// 从环境变量或默认值创建配置
    ///
    /// - `AGENT_BRIDGE_DATA_DIR`: 数据目录
    /// - `AGENT_BRIDGE_ENV_KEY`: 监听的环境变量名
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("AGENT_BRIDGE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(key) = std::env::var("AGENT_BRIDGE_ENV_KEY") {
            if !key.is_empty() {
                config.env_key = key;
            }
        }

        config
    }

    /// 设置数据目录
    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// 设置监听的环境变量
    pub fn with_env_key(mut self, key: &str) -> Self {
        self.env_key = key.to_string();
        self
    }

    /// 设置阻塞事件宽限时间
    pub fn with_blocking_grace(mut self, grace: Duration) -> Self {
        self.blocking_grace = grace;
        self
    }

    /// 设置等待项保留时间
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    /// 设置示例扩展文件
    pub fn with_example_extension<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.example_extension = Some(path.into());
        self
    }

    /// 用户扩展目录
    pub fn extension_dir(&self) -> PathBuf {
        self.data_dir.join("src").join("agent")
    }

    /// 校验配置
    pub fn validate(&self) -> crate::Result<()> {
        if self.env_key.is_empty() {
            return Err(crate::Error::Config("env_key 不能为空".to_string()));
        }
        if self.completion_timeout.is_zero() {
            return Err(crate::Error::Config("completion_timeout 不能为 0".to_string()));
        }
        if self.pending_ttl.is_zero() {
            return Err(crate::Error::Config("pending_ttl 不能为 0".to_string()));
        }
        Ok(())
    }
}
