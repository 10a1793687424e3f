//! 网关集成测试公共工具：签名密钥、模拟上游和认证服务、由 TOML 构建的路由。

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, header};
use axum_extra::extract::cookie::Cookie;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde_json::json;
use sso_gateway::auth::TokenCodec;
use sso_gateway::{Gateway, GatewayConfig, Plugin, SsoPlugin};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

pub const PRIVATE_KEY: &str = include_str!("../fixtures/private.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/public.pem");

/// 模拟认证服务接受的授权码。
pub const GOOD_CODE: &str = "good-code";

/// 为 `sub` 签发 `exp_offset` 秒后过期的 RS256 令牌。
pub fn sign(sub: &str, exp_offset: i64) -> String {
    let claims = json!({
        "sub": sub,
        "exp": chrono::Utc::now().timestamp() + exp_offset,
    });
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).expect("fixture private key");
    TokenCodec::encode(claims.as_object().expect("object"), Algorithm::RS256, &key)
        .expect("sign token")
}

/// `/secured` 回显 Authorization 头并返回 200，没有该头时返回 401。
struct SecuredEndpoint;

impl Respond for SecuredEndpoint {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        match request.headers.get(header::AUTHORIZATION) {
            Some(value) => ResponseTemplate::new(200).set_body_bytes(value.as_bytes().to_vec()),
            None => ResponseTemplate::new(401).set_body_string("unauthorized"),
        }
    }
}

/// 回显请求体。
pub struct EchoBody;

impl Respond for EchoBody {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(request.body.clone())
    }
}

/// 提供 `/`、`/unsecured` 和 `/secured` 的上游。
pub async fn upstream() -> MockServer {
    let server = MockServer::start().await;

    for route in ["/", "/unsecured"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string("unsecured"))
            .mount(&server)
            .await;
    }
    Mock::given(path("/secured"))
        .respond_with(SecuredEndpoint)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(EchoBody)
        .mount(&server)
        .await;

    server
}

/// 认证服务令牌端点：对 [`GOOD_CODE`] 和 `refresh_token` 签发给定令牌对，拒绝其他刷新请求。
pub async fn provider(access_token: &str, refresh_token: &str) -> MockServer {
    let server = MockServer::start().await;
    let pair = json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "Bearer",
        "expires_in": 300,
    });

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={GOOD_CODE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pair.clone()))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains(format!("refresh_token={refresh_token}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pair))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "token is not valid",
        })))
        .with_priority(10)
        .mount(&server)
        .await;

    server
}

/// 仅有一条指向 `upstream_url` 的通配路由的网关配置。
pub fn gateway_config(upstream_url: &str, extra: &str) -> GatewayConfig {
    let raw = format!(
        r#"
        [gateway]
        uid = "test"
        {extra}

        [[proxies]]
        base_path = "/"
        url = "{upstream_url}"
        "#
    );
    toml::from_str(&raw).expect("gateway config")
}

/// SSO 配置段指向 `provider_url` 的网关配置。
pub fn sso_config(upstream_url: &str, provider_url: &str) -> GatewayConfig {
    let mut config = gateway_config(upstream_url, "");
    config.sso = toml::from_str(&format!(
        r#"
        public_key = '''{PUBLIC_KEY}'''

        [oauth]
        authorization_url = "{provider_url}/oauth/authorize"
        token_url = "{provider_url}/oauth/token"
        client_id = "gateway"
        client_secret = "s3cret"
        callback_url = "http://localhost:XXXX/auth/sso/callback"
        "#
    ))
    .expect("sso config");
    if let Some(oauth) = config.sso.oauth.as_mut() {
        oauth.bind_port(8000);
    }
    config
}

pub fn router(config: &GatewayConfig, plugins: Vec<Arc<dyn Plugin>>) -> Router {
    Arc::new(Gateway::new(config, plugins).expect("gateway")).router()
}

pub fn sso_router(config: &GatewayConfig) -> Router {
    let plugin = SsoPlugin::new(&config.sso).expect("sso plugin");
    router(config, vec![Arc::new(plugin)])
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.expect("infallible")
}

pub fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// 从响应 `set-cookie` 头读取 cookie `name` 的值。
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// 响应中 cookie `name` 的 `Expires`，单位为 Unix 秒。
pub fn set_cookie_expiry(response: &Response<Body>, name: &str) -> Option<i64> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .find(|c| c.name() == name)
        .and_then(|c| c.expires_datetime())
        .map(time::OffsetDateTime::unix_timestamp)
}
