//! # 请求头转发处理模块
//!
//! 上游请求基本原样携带入站头。引擎追加配置的转发头，
//! 并去掉 HTTP 客户端会为新连接重新计算的头。

use axum::http::{HeaderMap, HeaderName, HeaderValue, Version, header};

use super::context::RequestContext;
use crate::config::HeaderToggles;

pub(crate) static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub(crate) static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub(crate) static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub(crate) static X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// 不跨越代理的逐跳头。
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// 由（插件修改后的）入站头部构造上游请求头。
pub(crate) fn upstream_headers(ctx: &RequestContext, toggles: &HeaderToggles, uid: &str) -> HeaderMap {
    let mut headers = ctx.headers.clone();

    if toggles.x_request_id {
        if let Ok(value) = HeaderValue::from_str(&format!("{uid}.{}", ctx.correlation_id)) {
            headers.insert(X_REQUEST_ID.clone(), value);
        }
    }

    if toggles.x_forwarded_for {
        if let Some(addr) = ctx.remote_addr {
            append_list(&mut headers, &X_FORWARDED_FOR, &addr.ip().to_string());
        }
    }

    let host = ctx
        .header_str(header::HOST)
        .map(str::to_string)
        .or_else(|| ctx.uri.authority().map(ToString::to_string));

    if let Some(host) = host {
        if toggles.x_forwarded_host {
            append_list(&mut headers, &X_FORWARDED_HOST, &host);
        }
        if toggles.via {
            let via = format!("{} {}", http_version(ctx.version), strip_port(&host));
            append_list(&mut headers, &header::VIA, &via);
        }
    }

    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }

    headers
}

/// 消息体可能已变时，去掉客户端连接会重新计算的头。
pub(crate) fn strip_response_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_LENGTH);
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// 向逗号分隔的列表头追加 `value`。
fn append_list(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    let mut parts: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    parts.push(value);

    if let Ok(joined) = HeaderValue::from_str(&parts.join(", ")) {
        headers.insert(name.clone(), joined);
    }
}

const fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.split(':').next().unwrap_or(host)
}
