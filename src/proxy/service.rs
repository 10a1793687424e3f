//! # 网关引擎
//!
//! 驱动一次客户端交换经过插件链：请求钩子、准入、上游分发、响应钩子，
//! 然后是两个方向的流式消息体。

use axum::{
    Router,
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    response::Response,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::body::{ExchangeGuard, RequestLeg, ResponseLeg};
use super::context::{ClientResponse, RequestContext, UpstreamResponse};
use super::forwarding::{self, X_RESPONSE_TIME};
use super::limiter::ConnectionGate;
use super::pipeline::{Leg, PluginChain};
use super::plugin::Plugin;
use super::stats::{GatewayStats, StatsSnapshot};
use super::target::RouteTable;
use crate::config::{EngineConfig, GatewayConfig};
use crate::error::{ErrorCategory, GatewayError, Result};

/// 插件管道引擎
pub struct Gateway {
    chain: PluginChain,
    routes: RouteTable,
    gate: Arc<ConnectionGate>,
    stats: GatewayStats,
    engine: EngineConfig,
    correlation_seq: AtomicU64,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("plugins", &self.chain)
            .field("routes", &self.routes.len())
            .field("max_connections", &self.gate.limit())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// 组装引擎。`plugins` 保持顺序：请求钩子正序运行，响应钩子逆序运行。
    pub fn new(config: &GatewayConfig, plugins: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let routes = RouteTable::new(&config.proxies)?;
        let chain = PluginChain::new(plugins);
        let limit = config.gateway.connection_limit();

        info!(
            plugins = ?chain,
            routes = routes.len(),
            max_connections = ?limit,
            "gateway configured"
        );

        Ok(Self {
            chain,
            routes,
            gate: Arc::new(ConnectionGate::new(limit)),
            stats: GatewayStats::new(),
            engine: config.gateway.clone(),
            correlation_seq: AtomicU64::new(0),
        })
    }

    /// 将所有请求交给 [`Gateway::handle`] 的 axum 路由。
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 当前占用连接槽位的交换数。
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.gate.open_connections()
    }

    /// 处理一个客户端请求。
    pub async fn handle(&self, request: Request) -> Response {
        let correlation_id = self.correlation_seq.fetch_add(1, Ordering::Relaxed);
        self.stats.record_request();

        let (parts, body) = request.into_parts();
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        info!(correlation_id, method = %parts.method, uri = %parts.uri, "req");

        let mut ctx = RequestContext::new(
            correlation_id,
            parts.method,
            parts.uri,
            parts.version,
            parts.headers,
            remote_addr,
        );
        let mut res = ClientResponse::new();

        if let Err(err) = self.chain.run_request(&mut ctx, &mut res).await {
            return reject(correlation_id, res, &err);
        }
        if res.is_finished() {
            debug!(correlation_id, status = res.status().as_u16(), "answered by plugin");
            return res.into_finished_response();
        }

        self.forward(ctx, res, body).await
    }

    async fn forward(&self, ctx: RequestContext, mut res: ClientResponse, body: Body) -> Response {
        let correlation_id = ctx.correlation_id;

        let Some(permit) = self.gate.try_acquire() else {
            info!(
                correlation_id,
                method = %ctx.method,
                uri = %ctx.uri,
                open = self.gate.open_connections(),
                "dropped"
            );
            return reject(
                correlation_id,
                res,
                &GatewayError::too_many_connections("too many requests"),
            );
        };

        let Some(target) = self.routes.resolve(ctx.path()) else {
            let err = GatewayError::not_found(format!("no proxy route for {}", ctx.path()));
            return reject(correlation_id, res, &err);
        };

        let url = self.routes.upstream_url(target, &ctx.uri);
        let headers = forwarding::upstream_headers(&ctx, &self.engine.headers, &self.engine.uid);
        let ctx = Arc::new(ctx);

        let (failure_tx, mut failure_rx) = oneshot::channel();
        let upstream_body = if body.is_end_stream() {
            match self.buffered_request_tail(&ctx).await {
                Ok(tail) => tail.map(reqwest::Body::from),
                Err(err) => return reject(correlation_id, res, &err),
            }
        } else {
            let leg = RequestLeg::new(self.chain.clone(), Arc::clone(&ctx), body, failure_tx);
            Some(reqwest::Body::wrap_stream(leg.into_stream()))
        };

        let mut request = target
            .client
            .request(ctx.method.clone(), url.clone())
            .headers(headers);
        if let Some(upstream_body) = upstream_body {
            request = request.body(upstream_body);
        }

        debug!(correlation_id, upstream = %url, tls = target.tls, "treq");
        let dispatched = Instant::now();

        let upstream = match request.send().await {
            Ok(upstream) => upstream,
            Err(source) => {
                // 消息体钩子失败时错误钩子已运行。
                if let Ok(hook_err) = failure_rx.try_recv() {
                    return reject(correlation_id, res, &hook_err);
                }
                let err = GatewayError::bad_gateway_with_source("Upstream request failed", source);
                warn!(correlation_id, upstream = %url, error = ?err, "treq error");
                if let Err(hook_err) = self.chain.run_error(Leg::Request, &ctx, &err).await {
                    return reject(correlation_id, res, &hook_err);
                }
                return reject(correlation_id, res, &err);
            }
        };
        let latency = dispatched.elapsed();

        let guard = ExchangeGuard::new(self.chain.clone(), Arc::clone(&ctx), ctx.received_at, permit);
        let mut head = UpstreamResponse::new(upstream.status(), upstream.headers().clone());
        debug!(
            correlation_id,
            status = head.status.as_u16(),
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            "tres"
        );

        if let Err(err) = self.chain.run_response(&ctx, &mut res, &mut head).await {
            return reject(correlation_id, res, &err);
        }

        if res.is_finished() {
            self.stats.record_response(res.status());
            debug!(correlation_id, "discarding data received after response sent");
            drop(upstream);
            drop(guard);
            return res.into_finished_response();
        }

        forwarding::strip_response_headers(&mut head.headers);
        res.adopt_upstream(&head);
        if self.engine.headers.x_response_time {
            res.headers_mut().insert(
                X_RESPONSE_TIME.clone(),
                HeaderValue::from(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        self.stats.record_response(res.status());

        let body = ResponseLeg::new(self.chain.clone(), ctx, upstream, guard).into_body();
        res.into_response(body)
    }

    /// 无消息体的请求：结束钩子仍会运行，并可能产生消息体。
    async fn buffered_request_tail(&self, ctx: &RequestContext) -> Result<Option<Bytes>> {
        let tail = self.chain.run_end(Leg::Request, ctx).await?;
        self.chain.run_close(Leg::Request, ctx).await?;
        Ok(tail)
    }
}

async fn proxy_handler(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    gateway.handle(request).await
}

/// 以结构化错误体应答客户端。
fn reject(correlation_id: u64, mut res: ClientResponse, err: &GatewayError) -> Response {
    match err.category() {
        ErrorCategory::Client => {
            info!(correlation_id, status = err.status().as_u16(), error = %err, "request rejected");
        }
        ErrorCategory::Server => {
            warn!(correlation_id, status = err.status().as_u16(), error = ?err, "request failed");
        }
    }
    res.fail(err);
    res.into_finished_response()
}
