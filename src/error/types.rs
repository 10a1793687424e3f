//! # 错误类型定义

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

/// 网关主要错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 配置相关错误
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 客户端请求格式错误
    #[error("{message}")]
    BadRequest { message: String },

    /// 凭证缺失或被拒绝
    #[error("{message}")]
    Unauthorized {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 没有匹配请求路径的路由
    #[error("{message}")]
    NotFound { message: String },

    /// 达到并发交换上限
    #[error("{message}")]
    TooManyConnections { message: String },

    /// 插件依赖（令牌端点、密钥材料）失败
    #[error("{message}")]
    UpstreamUnavailable {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 无法连接被代理服务
    #[error("{message}")]
    BadGateway {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 其他错误，包括插件 panic
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 交换之外的文件或套接字错误
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// 映射为状态码和稳定的错误码字符串。
    #[must_use]
    pub const fn to_http_response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "ROUTE_NOT_FOUND"),
            Self::TooManyConnections { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_CONNECTIONS")
            }
            Self::UpstreamUnavailable { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_UNAVAILABLE")
            }
            Self::BadGateway { .. } => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }

    /// 客户端收到的状态码。
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.to_http_response_parts().0
    }

    /// 返回给客户端的 JSON：`{"error": <status>, "error_description": <message>}`。
    #[must_use]
    pub fn json_body(&self) -> Bytes {
        let body = json!({
            "error": self.status().as_u16(),
            "error_description": self.to_string(),
        });
        Bytes::from(body.to_string())
    }

    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized {
            message: message.into(),
            source: None,
        }
    }

    pub fn unauthorized_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Unauthorized {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn too_many_connections<T: Into<String>>(message: T) -> Self {
        Self::TooManyConnections {
            message: message.into(),
        }
    }

    pub fn upstream_unavailable<T: Into<String>>(message: T) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn upstream_unavailable_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn bad_gateway<T: Into<String>>(message: T) -> Self {
        Self::BadGateway {
            message: message.into(),
            source: None,
        }
    }

    pub fn bad_gateway_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::BadGateway {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.json_body().into());
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("Failed to parse configuration", err)
    }
}
