//! # 会话 Cookie 存储
//!
//! 凭证保存在两个 HttpOnly cookie 中。过期时间由令牌本身计算，
//! 不短于 [`MIN_COOKIE_LIFETIME_SECS`]。

use axum::http::{HeaderMap, HeaderValue, header};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::OffsetDateTime;

use super::jwt::TokenCodec;
use crate::config::CookieOptions;
use crate::error::{GatewayError, Result};

/// Cookie 名称
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const REDIRECT_PATH_COOKIE: &str = "redirect_path";

/// 凭证 cookie 的最短有效期。
pub const MIN_COOKIE_LIFETIME_SECS: i64 = 10;

/// 从请求头读取 cookie `name` 的值。
#[must_use]
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// `max(access exp, refresh exp, now + floor)`，单位为 Unix 秒。
#[must_use]
pub fn credential_expiry(access_token: &str, refresh_token: Option<&str>, now: i64) -> i64 {
    let access = TokenCodec::expiry(access_token).unwrap_or(i64::MIN);
    let refresh = refresh_token
        .and_then(TokenCodec::expiry)
        .unwrap_or(i64::MIN);

    access.max(refresh).max(now + MIN_COOKIE_LIFETIME_SECS)
}

/// 为两个凭证追加 `set-cookie` 头。
pub fn write_credentials(
    headers: &mut HeaderMap,
    access_token: &str,
    refresh_token: Option<&str>,
    options: &CookieOptions,
) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    let expires_at = credential_expiry(access_token, refresh_token, now.unix_timestamp());
    let expires = OffsetDateTime::from_unix_timestamp(expires_at)
        .unwrap_or_else(|_| now + time::Duration::seconds(MIN_COOKIE_LIFETIME_SECS));

    append(
        headers,
        &credential_cookie(ACCESS_TOKEN_COOKIE, access_token, expires, options),
    )?;
    if let Some(refresh_token) = refresh_token {
        append(
            headers,
            &credential_cookie(REFRESH_TOKEN_COOKIE, refresh_token, expires, options),
        )?;
    }

    tracing::debug!(expires_at, "credential cookies written");
    Ok(())
}

/// 追加立即使 cookie `name` 失效的 `set-cookie` 头。
pub fn clear(headers: &mut HeaderMap, name: &'static str, options: &CookieOptions) -> Result<()> {
    let mut cookie = Cookie::build((name, ""))
        .http_only(options.http_only)
        .secure(options.secure)
        .same_site(SameSite::Lax)
        .path(options.path.clone())
        .max_age(time::Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH);

    if let Some(domain) = &options.domain {
        cookie = cookie.domain(domain.clone());
    }

    append(headers, &cookie.build())
}

fn credential_cookie<'a>(
    name: &'a str,
    value: &str,
    expires: OffsetDateTime,
    options: &CookieOptions,
) -> Cookie<'a> {
    let mut cookie = Cookie::build((name, value.to_string()))
        .http_only(options.http_only)
        .secure(options.secure)
        .same_site(SameSite::Lax)
        .path(options.path.clone())
        .expires(expires);

    if let Some(domain) = &options.domain {
        cookie = cookie.domain(domain.clone());
    }

    cookie.build()
}

fn append(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> Result<()> {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(|e| {
        GatewayError::internal_with_source(format!("invalid cookie {}", cookie.name()), e)
    })?;
    headers.append(header::SET_COOKIE, value);
    Ok(())
}
