//! # 消息体流式处理
//!
//! 两个方向的消息体都是拉取驱动的流。请求方向将客户端数据块经请求数据钩子送往上游；
//! 响应方向将上游数据块经响应数据钩子送往客户端，并持有本次交换的连接许可。

use axum::body::Body;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::context::RequestContext;
use super::limiter::ConnectionPermit;
use super::pipeline::{Leg, PluginChain};
use crate::error::GatewayError;

/// 经请求数据钩子流向上游的客户端消息体。
pub(crate) struct RequestLeg {
    chain: PluginChain,
    ctx: Arc<RequestContext>,
    inbound: BoxStream<'static, io::Result<Bytes>>,
    failure: Option<oneshot::Sender<GatewayError>>,
    done: bool,
}

impl RequestLeg {
    /// `failure` 接收中断消息体的钩子错误（如有）。
    pub(crate) fn new(
        chain: PluginChain,
        ctx: Arc<RequestContext>,
        body: Body,
        failure: oneshot::Sender<GatewayError>,
    ) -> Self {
        Self {
            chain,
            ctx,
            inbound: body.into_data_stream().map_err(io::Error::other).boxed(),
            failure: Some(failure),
            done: false,
        }
    }

    pub(crate) fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::unfold(self, |mut leg| async move {
            leg.next_chunk().await.map(|item| (item, leg))
        })
    }

    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }

        loop {
            match self.inbound.next().await {
                Some(Ok(chunk)) => {
                    match self.chain.run_data(Leg::Request, &self.ctx, chunk).await {
                        Ok(Some(out)) if !out.is_empty() => return Some(Ok(out)),
                        Ok(_) => {}
                        Err(err) => return Some(Err(self.abort(err).await)),
                    }
                }
                Some(Err(err)) => {
                    let err = GatewayError::bad_request(format!("client request body failed: {err}"));
                    return Some(Err(self.abort(err).await));
                }
                None => {
                    self.done = true;
                    let tail = self.chain.run_end(Leg::Request, &self.ctx).await;
                    if let Err(err) = self.chain.run_close(Leg::Request, &self.ctx).await {
                        warn!(correlation_id = self.ctx.correlation_id, error = %err, "onclose_request failed");
                    }
                    return match tail {
                        Ok(tail) => tail.map(Ok),
                        Err(err) => Some(Err(self.abort(err).await)),
                    };
                }
            }
        }
    }

    async fn abort(&mut self, err: GatewayError) -> io::Error {
        self.done = true;
        warn!(correlation_id = self.ctx.correlation_id, error = %err, "treq error");

        if let Err(hook_err) = self.chain.run_error(Leg::Request, &self.ctx, &err).await {
            warn!(correlation_id = self.ctx.correlation_id, error = %hook_err, "onerror_request failed");
        }

        let io_err = io::Error::other(err.to_string());
        if let Some(failure) = self.failure.take() {
            let _ = failure.send(err);
        }
        io_err
    }
}

/// 在客户端响应存活期间占用连接槽位，销毁时（无论是否完成）运行关闭钩子。
pub(crate) struct ExchangeGuard {
    chain: PluginChain,
    ctx: Arc<RequestContext>,
    started: Instant,
    _permit: ConnectionPermit,
}

impl ExchangeGuard {
    pub(crate) const fn new(
        chain: PluginChain,
        ctx: Arc<RequestContext>,
        started: Instant,
        permit: ConnectionPermit,
    ) -> Self {
        Self {
            chain,
            ctx,
            started,
            _permit: permit,
        }
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        info!(
            correlation_id = self.ctx.correlation_id,
            elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "res"
        );

        let chain = self.chain.clone();
        let ctx = Arc::clone(&self.ctx);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = chain.run_close(Leg::Response, &ctx).await {
                    warn!(correlation_id = ctx.correlation_id, error = %err, "onclose_response failed");
                }
            });
        }
    }
}

/// 经响应数据钩子流向客户端的上游消息体。
pub(crate) struct ResponseLeg {
    chain: PluginChain,
    ctx: Arc<RequestContext>,
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    done: bool,
    _guard: ExchangeGuard,
}

impl ResponseLeg {
    pub(crate) fn new(
        chain: PluginChain,
        ctx: Arc<RequestContext>,
        upstream: reqwest::Response,
        guard: ExchangeGuard,
    ) -> Self {
        Self {
            chain,
            ctx,
            upstream: upstream.bytes_stream().boxed(),
            done: false,
            _guard: guard,
        }
    }

    pub(crate) fn into_body(self) -> Body {
        Body::from_stream(stream::unfold(self, |mut leg| async move {
            leg.next_chunk().await.map(|item| (item, leg))
        }))
    }

    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }

        loop {
            match self.upstream.next().await {
                Some(Ok(chunk)) => {
                    match self.chain.run_data(Leg::Response, &self.ctx, chunk).await {
                        Ok(Some(out)) if !out.is_empty() => return Some(Ok(out)),
                        Ok(_) => {}
                        Err(err) => return Some(Err(self.abort(err).await)),
                    }
                }
                Some(Err(err)) => {
                    let err = GatewayError::bad_gateway_with_source("upstream response body failed", err);
                    return Some(Err(self.abort(err).await));
                }
                None => {
                    self.done = true;
                    debug!(correlation_id = self.ctx.correlation_id, "tres end");
                    return match self.chain.run_end(Leg::Response, &self.ctx).await {
                        Ok(tail) => tail.map(Ok),
                        Err(err) => Some(Err(self.abort(err).await)),
                    };
                }
            }
        }
    }

    /// 先运行错误钩子，再通过产出错误断开客户端连接。
    async fn abort(&mut self, err: GatewayError) -> io::Error {
        self.done = true;
        warn!(correlation_id = self.ctx.correlation_id, error = %err, "tres error");

        if let Err(hook_err) = self.chain.run_error(Leg::Response, &self.ctx, &err).await {
            warn!(correlation_id = self.ctx.correlation_id, error = %hook_err, "onerror_response failed");
        }
        io::Error::other(err.to_string())
    }
}
