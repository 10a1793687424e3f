//! # 统一错误处理模块
//!
//! 引擎故障、插件决定和配置问题都以 [`GatewayError`] 传递。
//! 令牌编解码器和 OAuth 客户端的底层错误在插件边界转换。

pub use types::GatewayError;

/// 网关统一的 `Result` 类型
pub type Result<T> = std::result::Result<T, GatewayError>;

pub mod types;

/// 错误归属方，用于选择日志级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 客户端请求不可接受（4xx）。
    Client,
    /// 网关或其后端故障（5xx）。
    Server,
}

impl GatewayError {
    /// 按渲染状态码对错误归类。
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        if self.status().is_client_error() {
            ErrorCategory::Client
        } else {
            ErrorCategory::Server
        }
    }
}
