//! 令牌生成器
//!
//! 为请求和 Agent 实例生成唯一、单调递增、可读的标识

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 唯一标识，显示为 `name#NNN`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    name: Arc<str>,
    seq: u64,
}

impl Token {
    /// 序号
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// 名称前缀
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:03}", self.name, self.seq)
    }
}

/// 令牌计数器
pub struct TokenCounter {
    name: Arc<str>,
    next: AtomicU64,
}

impl TokenCounter {
    /// 创建计数器（从 1 开始）
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            next: AtomicU64::new(1),
        }
    }

    /// 设置起始序号
    pub fn with_start(self, start: u64) -> Self {
        self.next.store(start, Ordering::Relaxed);
        self
    }

    /// 生成下一个令牌
    pub fn next(&self) -> Token {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        Token {
            name: self.name.clone(),
            seq,
        }
    }
}
