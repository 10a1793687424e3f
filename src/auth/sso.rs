//! # SSO 插件
//!
//! 由网关承载的逐请求认证状态机：
//!
//! - `on_request` 完成 OAuth2 回调，或校验令牌后放行、刷新或拒绝。
//! - `on_response` 把上游 401 转为启动授权码流程的质询，`state` 携带重启目标。
//!
//! 不带凭证的请求原样放行，由上游决定是否接受。

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use tracing::{debug, info, warn};

use super::challenge::{self, safe_restart_target};
use super::cookies::{self, ACCESS_TOKEN_COOKIE, REDIRECT_PATH_COOKIE, REFRESH_TOKEN_COOKIE};
use super::jwt::TokenCodec;
use super::oauth::OAuthStrategy;
use crate::config::{CookieOptions, SsoConfig};
use crate::error::{GatewayError, Result};
use crate::proxy::{ClientResponse, Plugin, RequestContext, UpstreamResponse};

/// 客户端或上游指定的登录后跳转地址。
pub static X_RESTART_URL: HeaderName = HeaderName::from_static("x-restart-url");

/// 请求携带的凭证（校验后）。
#[derive(Debug, PartialEq, Eq)]
enum Credential {
    /// 没有令牌
    Anonymous,
    /// 已校验的令牌
    Valid(String),
    /// 令牌已过期；如有可用的刷新令牌则一并携带
    Expired(Option<String>),
}

/// OAuth2/JWT 单点登录插件
#[derive(Debug)]
pub struct SsoPlugin {
    codec: TokenCodec,
    oauth: OAuthStrategy,
    cookies: CookieOptions,
    callback_path: String,
}

impl SsoPlugin {
    /// 缺少 `public_key` 或 `oauth` 时返回 `"<option> is required"` 错误。
    pub fn new(config: &SsoConfig) -> Result<Self> {
        let public_key = config.resolve_public_key()?;
        let oauth_config = config.oauth()?;

        let codec = TokenCodec::new(&public_key, &config.jwt)?;
        let oauth = OAuthStrategy::new(oauth_config)?;
        let callback_path = oauth.callback_path();

        info!(
            callback_path,
            algorithms = ?config.jwt.algorithms,
            "sso plugin initialised"
        );

        Ok(Self {
            codec,
            oauth,
            cookies: config.cookies.clone(),
            callback_path,
        })
    }

    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    fn assess(&self, req: &RequestContext) -> Result<Credential> {
        let token = match bearer_token(req)? {
            Some(token) => Some(token),
            None => cookies::read(&req.headers, ACCESS_TOKEN_COOKIE),
        };
        let Some(token) = token else {
            return Ok(Credential::Anonymous);
        };

        match self.codec.verify(&token) {
            Ok(_) => Ok(Credential::Valid(token)),
            Err(err) if err.is_expired() => {
                let now = chrono::Utc::now().timestamp();
                let refresh_token = cookies::read(&req.headers, REFRESH_TOKEN_COOKIE)
                    .filter(|rt| TokenCodec::expiry(rt).is_none_or(|exp| exp > now));
                Ok(Credential::Expired(refresh_token))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh(
        &self,
        req: &mut RequestContext,
        res: &mut ClientResponse,
        refresh_token: &str,
    ) -> Result<()> {
        match self.oauth.refresh(refresh_token).await {
            Ok(tokens) => {
                let refresh_token = tokens.refresh_token.as_deref().unwrap_or(refresh_token);
                cookies::write_credentials(
                    res.headers_mut(),
                    &tokens.access_token,
                    Some(refresh_token),
                    &self.cookies,
                )?;
                set_bearer(req, &tokens.access_token)?;
                info!(correlation_id = req.correlation_id, "access token refreshed");
                Ok(())
            }
            Err(err) if err.is_rejection() => {
                warn!(
                    correlation_id = req.correlation_id,
                    error = %err,
                    "refresh token rejected, continuing unauthenticated"
                );
                cookies::clear(res.headers_mut(), ACCESS_TOKEN_COOKIE, &self.cookies)?;
                cookies::clear(res.headers_mut(), REFRESH_TOKEN_COOKIE, &self.cookies)?;
                req.headers.remove(header::AUTHORIZATION);
                Ok(())
            }
            Err(err) => Err(GatewayError::upstream_unavailable_with_source(
                format!("Unable to refresh access token: {err}"),
                err,
            )),
        }
    }

    async fn complete_login(&self, req: &RequestContext, res: &mut ClientResponse) -> Result<()> {
        if let Some(error) = req.query_param("error") {
            let description = req
                .query_param("error_description")
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            return Err(GatewayError::unauthorized(format!(
                "Authorization failed: {error}{description}"
            )));
        }

        let code = req
            .query_param("code")
            .filter(|code| !code.is_empty())
            .ok_or_else(|| GatewayError::bad_request("Missing authorization code"))?;

        let tokens = self.oauth.exchange_code(&code).await.map_err(|e| {
            GatewayError::upstream_unavailable_with_source(
                format!("Unable to obtain access token: {e}"),
                e,
            )
        })?;

        self.codec.verify(&tokens.access_token).map_err(|e| {
            GatewayError::upstream_unavailable_with_source(
                format!("Provider issued an unusable access token: {e}"),
                e,
            )
        })?;

        cookies::write_credentials(
            res.headers_mut(),
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            &self.cookies,
        )?;

        let destination = self.login_destination(req, res)?;
        info!(correlation_id = req.correlation_id, destination, "login complete");
        res.redirect(StatusCode::FOUND, &destination)
    }

    /// 依次取 `state`、旧版 `redirect_path` cookie、`/`。
    fn login_destination(&self, req: &RequestContext, res: &mut ClientResponse) -> Result<String> {
        if let Some(state) = req.query_param("state") {
            return Ok(safe_restart_target(&state));
        }

        if let Some(path) = cookies::read(&req.headers, REDIRECT_PATH_COOKIE) {
            cookies::clear(res.headers_mut(), REDIRECT_PATH_COOKIE, &self.cookies)?;
            return Ok(safe_restart_target(&path));
        }

        Ok("/".to_string())
    }
}

#[async_trait]
impl Plugin for SsoPlugin {
    fn name(&self) -> &str {
        "sso"
    }

    async fn on_request(&self, req: &mut RequestContext, res: &mut ClientResponse) -> Result<()> {
        let correlation_id = req.correlation_id;
        debug!(correlation_id, method = %req.method, path = req.path(), "onrequest");

        if req.method == Method::GET && req.path() == self.callback_path {
            return self.complete_login(req, res).await;
        }

        match self.assess(req)? {
            Credential::Anonymous => {
                debug!(correlation_id, "no credentials");
                Ok(())
            }
            Credential::Valid(token) => {
                debug!(correlation_id, "valid token");
                if !req.headers.contains_key(header::AUTHORIZATION) {
                    set_bearer(req, &token)?;
                }
                Ok(())
            }
            Credential::Expired(Some(refresh_token)) => {
                info!(correlation_id, "expired token, attempting refresh");
                self.refresh(req, res, &refresh_token).await
            }
            Credential::Expired(None) => {
                info!(correlation_id, "expired token and no usable refresh token");
                req.headers.remove(header::AUTHORIZATION);
                Ok(())
            }
        }
    }

    async fn on_response(
        &self,
        req: &RequestContext,
        res: &mut ClientResponse,
        upstream: &mut UpstreamResponse,
    ) -> Result<()> {
        if upstream.status != StatusCode::UNAUTHORIZED {
            return Ok(());
        }

        let state = (req.method == Method::GET).then(|| restart_target(req, upstream));
        let location = self.oauth.authorization_url(state.as_deref());

        info!(
            correlation_id = req.correlation_id,
            restart = state.as_deref().unwrap_or_default(),
            "invalid auth, start oauth flow"
        );
        challenge::respond(res, &location)
    }
}

/// 读取 `Authorization: Bearer <token>`。头存在但格式不符视为客户端错误。
fn bearer_token(req: &RequestContext) -> Result<Option<String>> {
    let Some(value) = req.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| Some(token.to_string()))
        .ok_or_else(|| GatewayError::bad_request("Invalid Authorization header"))
}

fn set_bearer(req: &mut RequestContext, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
        GatewayError::unauthorized_with_source("JWT Token error: token is not a valid header value", e)
    })?;
    req.headers.insert(header::AUTHORIZATION, value);
    Ok(())
}

/// 依次取请求头、上游响应头、入站请求地址。
fn restart_target(req: &RequestContext, upstream: &UpstreamResponse) -> String {
    let candidate = req
        .header_str(&X_RESTART_URL)
        .or_else(|| {
            upstream
                .headers
                .get(&X_RESTART_URL)
                .and_then(|v| v.to_str().ok())
        })
        .unwrap_or_else(|| req.path_and_query());

    safe_restart_target(candidate)
}
