//! # SSO 网关库
//!
//! 带插件管道的反向代理，以及在上游服务前执行 OAuth2/JWT 认证的单点登录插件。

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;

// 重新导出常用类型
pub use auth::SsoPlugin;
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use proxy::{Gateway, Plugin};
