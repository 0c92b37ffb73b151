//! 请求客户端模块
//!
//! 构造动作请求、关联响应、限时等待

mod request;

pub use request::{Callback, PendingRequest, Request, RequestClient};
