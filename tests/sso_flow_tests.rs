//! # SSO 流程测试
//!
//! 认证插件位于模拟上游和模拟 OAuth2 认证服务之前：透传、质询、令牌刷新和登录回调。

mod common;

use axum::body::Body;
use axum::http::{StatusCode, header};
use common::{
    GOOD_CODE, body_string, get, provider, send, set_cookie, set_cookie_expiry, sign, sso_config,
    sso_router, upstream,
};
use pretty_assertions::assert_eq;
use url::Url;

fn state_of(location: &str) -> Option<String> {
    Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
}

async fn error_body(response: axum::http::Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).expect("json error body")
}

#[tokio::test]
async fn test_unsecured_passes_through() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(&app, get("/unsecured").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "unsecured");
}

#[tokio::test]
async fn test_secured_without_credentials_is_challenged() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(&app, get("/secured?foo=bar").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with(&format!("{}/oauth/authorize?", provider.uri())));
    assert!(location.contains("response_type=code"));
    assert!(location.contains("client_id=gateway"));
    assert!(location.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8000%2Fauth%2Fsso%2Fcallback"));
    assert_eq!(state_of(&location).as_deref(), Some("/secured?foo=bar"));

    let page = body_string(response).await;
    assert!(page.contains("http-equiv=\"refresh\""));
}

#[tokio::test]
async fn test_bearer_and_cookie_are_equivalent() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));
    let token = sign("alice", 300);

    let by_header = send(
        &app,
        get("/secured")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let by_cookie = send(
        &app,
        get("/secured")
            .header(header::COOKIE, format!("access_token={token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(by_header.status(), StatusCode::OK);
    assert_eq!(by_cookie.status(), StatusCode::OK);
    assert_eq!(body_string(by_header).await, format!("Bearer {token}"));
    assert_eq!(body_string(by_cookie).await, format!("Bearer {token}"));
}

#[tokio::test]
async fn test_malformed_authorization_header_is_400() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(
        &app,
        get("/secured")
            .header(header::AUTHORIZATION, "Like, whatever, man")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = error_body(response).await;
    assert_eq!(body["error"], 400);
    assert_eq!(body["error_description"], "Invalid Authorization header");
}

#[tokio::test]
async fn test_invalid_token_is_401() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(
        &app,
        get("/secured")
            .header(header::AUTHORIZATION, "Bearer Like, whatever, man")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
    let body = error_body(response).await;
    assert_eq!(body["error"], 401);
    assert!(
        body["error_description"]
            .as_str()
            .unwrap()
            .starts_with("JWT Token error")
    );
}

#[tokio::test]
async fn test_expired_token_is_refreshed() {
    let fresh_access = sign("alice", 300);
    let refresh = sign("alice-refresh", 3600);
    let (upstream, provider) = (upstream().await, provider(&fresh_access, &refresh).await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));
    let expired = sign("alice", -300);

    let response = send(
        &app,
        get("/secured")
            .header(header::COOKIE, format!("access_token={expired}; refresh_token={refresh}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookie(&response, "access_token"), Some(fresh_access.clone()));
    assert_eq!(set_cookie(&response, "refresh_token"), Some(refresh));

    // 两个 cookie 的有效期跟随刷新令牌，而不是 10 秒下限。
    let horizon = chrono::Utc::now().timestamp() + 3000;
    for name in ["access_token", "refresh_token"] {
        let expires = set_cookie_expiry(&response, name).expect("cookie expiry");
        assert!(expires > horizon, "{name} expires at {expires}");
    }
    assert_eq!(body_string(response).await, format!("Bearer {fresh_access}"));
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_challenge() {
    let (upstream, provider) = (upstream().await, provider("a", "expected-refresh").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));
    let expired = sign("alice", -300);
    let unknown_refresh = sign("mallory-refresh", 3600);

    let response = send(
        &app,
        get("/secured")
            .header(
                header::COOKIE,
                format!("access_token={expired}; refresh_token={unknown_refresh}"),
            )
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::LOCATION));
    assert_eq!(set_cookie(&response, "access_token").as_deref(), Some(""));
    assert_eq!(set_cookie(&response, "refresh_token").as_deref(), Some(""));
}

#[tokio::test]
async fn test_expired_without_refresh_is_challenged() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));
    let expired = sign("alice", -300);

    let response = send(
        &app,
        get("/secured")
            .header(header::AUTHORIZATION, format!("Bearer {expired}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::LOCATION));
    assert!(provider.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_stale_refresh_token_is_not_exchanged() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));
    let expired = sign("alice", -300);
    let stale_refresh = sign("alice-refresh", -60);

    let response = send(
        &app,
        get("/secured")
            .header(
                header::COOKIE,
                format!("access_token={expired}; refresh_token={stale_refresh}"),
            )
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::LOCATION));
    assert!(provider.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_callback_sets_cookies_and_redirects_to_state() {
    let access = sign("alice", 300);
    let refresh = sign("alice-refresh", 3600);
    let (upstream, provider) = (upstream().await, provider(&access, &refresh).await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(
        &app,
        get(&format!(
            "/auth/sso/callback?code={GOOD_CODE}&state=%2Fsecured%3Ffoo%3Dbar"
        ))
        .body(Body::empty())
        .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/secured?foo=bar");
    assert_eq!(set_cookie(&response, "access_token"), Some(access));
    assert_eq!(set_cookie(&response, "refresh_token"), Some(refresh));
    assert!(
        set_cookie_expiry(&response, "access_token").unwrap()
            > chrono::Utc::now().timestamp() + 3000
    );
    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_callback_rejects_offsite_state() {
    let access = sign("alice", 300);
    let (upstream, provider) = (upstream().await, provider(&access, "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(
        &app,
        get(&format!(
            "/auth/sso/callback?code={GOOD_CODE}&state=https%3A%2F%2Fevil.example.com"
        ))
        .body(Body::empty())
        .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");
}

#[tokio::test]
async fn test_callback_with_unknown_code_is_500() {
    let (upstream, provider) = (upstream().await, provider("a", "r").await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let response = send(
        &app,
        get("/auth/sso/callback?code=stolen-code")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(response).await["error"], 500);
}

#[tokio::test]
async fn test_full_login_flow() {
    let access = sign("alice", 300);
    let refresh = sign("alice-refresh", 3600);
    let (upstream, provider) = (upstream().await, provider(&access, &refresh).await);
    let app = sso_router(&sso_config(&upstream.uri(), &provider.uri()));

    let challenge = send(&app, get("/secured?page=2").body(Body::empty()).unwrap()).await;
    assert_eq!(challenge.status(), StatusCode::UNAUTHORIZED);
    let location = challenge.headers()[header::LOCATION].to_str().unwrap();
    let state = state_of(location).expect("state in authorization url");

    let mut callback_url = Url::parse("http://gateway/auth/sso/callback").unwrap();
    callback_url
        .query_pairs_mut()
        .append_pair("code", GOOD_CODE)
        .append_pair("state", &state);
    let callback_uri = format!("{}?{}", callback_url.path(), callback_url.query().unwrap());

    let login = send(&app, get(&callback_uri).body(Body::empty()).unwrap()).await;
    assert_eq!(login.status(), StatusCode::FOUND);
    let destination = login.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(destination, "/secured?page=2");
    let cookie = format!(
        "access_token={}; refresh_token={}",
        set_cookie(&login, "access_token").unwrap(),
        set_cookie(&login, "refresh_token").unwrap()
    );

    let landed = send(
        &app,
        get(&destination)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(landed.status(), StatusCode::OK);
    assert_eq!(body_string(landed).await, format!("Bearer {access}"));
}
