//! # 插件共享的交换状态
//!
//! [`RequestContext`] 是插件看到的入站请求，[`ClientResponse`] 是客户端将收到的响应，
//! [`UpstreamResponse`] 是被代理服务响应的可变头部。

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, Method, StatusCode, Uri, Version, header,
        uri::PathAndQuery,
    },
    response::Response,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Instant;

use crate::error::{GatewayError, Result};

/// 入站请求头部，归单次交换所有。
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 到达时分配的进程内单调递增编号
    pub correlation_id: u64,
    pub method: Method,
    /// 请求目标；插件可在 `on_request` 中改写
    pub uri: Uri,
    pub version: Version,
    /// 请求链之后转发给上游的头
    pub headers: HeaderMap,
    /// 对端地址，服务未启用连接信息时缺失
    pub remote_addr: Option<SocketAddr>,
    pub received_at: Instant,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        correlation_id: u64,
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            correlation_id,
            method,
            uri,
            version,
            headers,
            remote_addr,
            received_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// 路径加查询串，两者皆无时为 `/`。
    #[must_use]
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map_or("/", PathAndQuery::as_str)
    }

    /// 查询参数 `name` 的第一个值（表单解码）。
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// 以文本读取头的值，缺失或非可见 ASCII 时为 `None`。
    #[must_use]
    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// 客户端将收到的响应。
///
/// 插件调用 [`finish`](Self::finish)、[`redirect`](Self::redirect) 或 [`fail`](Self::fail)
/// 即结束交换：引擎停止当前链并直接发送该响应，不再继续代理。
#[derive(Debug, Default)]
pub struct ClientResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl ClientResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub const fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// 以 `status` 和 `body` 结束交换。
    pub fn finish(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.status = status;
        self.body = body.into();
        self.finished = true;
    }

    /// 以跳转到 `location` 结束交换。
    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Result<()> {
        let value = HeaderValue::from_str(location).map_err(|e| {
            GatewayError::internal_with_source(format!("invalid redirect location: {location}"), e)
        })?;
        self.headers.insert(header::LOCATION, value);
        self.finish(status, Bytes::new());
        Ok(())
    }

    /// 以结构化 JSON 错误体结束交换。保留插件已设置的头（尤其是 cookie）。
    pub fn fail(&mut self, err: &GatewayError) {
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.finish(err.status(), err.json_body());
    }

    /// 接管上游的状态码和头。上游值覆盖插件设置的同名值，`set-cookie` 则累加。
    pub(crate) fn adopt_upstream(&mut self, upstream: &UpstreamResponse) {
        self.status = upstream.status;
        for name in upstream.headers.keys() {
            if name != header::SET_COOKIE {
                self.headers.remove(name);
            }
            for value in upstream.headers.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
    }

    /// 携带流式消息体的响应。
    pub(crate) fn into_response(self, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// 携带插件设置的缓冲消息体的响应。
    pub(crate) fn into_finished_response(mut self) -> Response {
        let body = std::mem::take(&mut self.body);
        self.into_response(Body::from(body))
    }
}

/// 上游响应头部，由响应钩子原地改写。
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl UpstreamResponse {
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }
}
