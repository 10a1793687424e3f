//! # 认证模块
//!
//! SSO 插件及其组成部分：令牌校验、凭证 cookie、OAuth2 客户端策略和 401 质询。

pub mod challenge;
pub mod cookies;
pub mod jwt;
pub mod oauth;
pub mod sso;

pub use jwt::{Claims, TokenCodec, TokenError};
pub use oauth::{OAuthError, OAuthStrategy, TokenResponse};
pub use sso::SsoPlugin;
