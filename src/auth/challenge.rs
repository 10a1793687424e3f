//! # 认证质询
//!
//! 两类客户端都能处理的 401：浏览器跟随 meta-refresh 跳转到认证服务，
//! API 调用方读取 `location` 头。

use axum::http::{HeaderValue, StatusCode, header};

use crate::error::{GatewayError, Result};
use crate::proxy::ClientResponse;

/// 以指向 `location` 的质询结束 `res`。
pub fn respond(res: &mut ClientResponse, location: &str) -> Result<()> {
    let value = HeaderValue::from_str(location).map_err(|e| {
        GatewayError::internal_with_source("authorization URL is not a valid header value", e)
    })?;

    let headers = res.headers_mut();
    headers.insert(header::LOCATION, value);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    res.finish(StatusCode::UNAUTHORIZED, render_page(location));
    Ok(())
}

fn render_page(location: &str) -> String {
    let href = escape_html(location);
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"0; url={href}\">\n\
         <title>Authentication required</title>\n\
         </head>\n\
         <body>\n\
         <p>Authentication required. <a href=\"{href}\">Continue to sign in</a>.</p>\n\
         </body>\n\
         </html>\n"
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// 只接受同源相对路径作为重启目标，其余一律变为 `/`。
#[must_use]
pub fn safe_restart_target(candidate: &str) -> String {
    let safe = candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.contains("://")
        && !candidate.contains('\\')
        && !candidate.chars().any(char::is_control);

    if safe {
        candidate.to_string()
    } else {
        "/".to_string()
    }
}
