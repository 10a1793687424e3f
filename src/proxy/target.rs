//! # 上游目标
//!
//! 入站路径前缀到上游基础地址的路由表，以及上游地址构造：
//! 目标的基础路径加上去掉匹配前缀的入站路径，合并重复斜杠。

use axum::http::Uri;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{GatewayError, Result};

/// 单个上游的只读描述，由路由到它的所有交换共享。
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    /// 匹配的入站前缀，不含结尾斜杠（根路径为 `""`）
    pub base_path: String,
    /// 转发前去掉的入站路径前导字节数
    pub base_path_len: usize,
    pub url: Url,
    pub tls: bool,
    /// 跨交换复用的连接池
    pub client: Client,
}

impl ProxyTarget {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let url = Url::parse(&config.url).map_err(|e| {
            GatewayError::config_with_source(format!("invalid proxy url: {}", config.url), e)
        })?;

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::config_with_source("Failed to build upstream client", e))?;

        let base_path = config.base_path.trim_end_matches('/').to_string();

        Ok(Self {
            base_path_len: base_path.len(),
            base_path,
            tls: url.scheme() == "https",
            url,
            client,
        })
    }

    /// 按路径段匹配前缀：`/api` 匹配 `/api` 和 `/api/x`，不匹配 `/apix`。
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.base_path.is_empty()
            || path
                .strip_prefix(&self.base_path)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// 所有已配置目标，最长前缀优先。
#[derive(Debug, Clone)]
pub struct RouteTable {
    targets: Vec<ProxyTarget>,
    double_slash: Regex,
}

impl RouteTable {
    pub fn new(configs: &[ProxyConfig]) -> Result<Self> {
        let mut targets = configs
            .iter()
            .map(ProxyTarget::new)
            .collect::<Result<Vec<_>>>()?;
        targets.sort_by(|a, b| b.base_path_len.cmp(&a.base_path_len));

        let double_slash = Regex::new("//+")
            .map_err(|e| GatewayError::internal_with_source("invalid path pattern", e))?;

        Ok(Self {
            targets,
            double_slash,
        })
    }

    /// 负责 `path` 的目标（如有）。
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&ProxyTarget> {
        self.targets.iter().find(|target| target.matches(path))
    }

    /// 路由到 `target` 的入站请求对应的上游地址。
    #[must_use]
    pub fn upstream_url(&self, target: &ProxyTarget, uri: &Uri) -> Url {
        let rest = uri.path().get(target.base_path_len..).unwrap_or_default();
        let joined = if rest.is_empty() {
            target.url.path().to_string()
        } else {
            format!("{}/{rest}", target.url.path())
        };
        let path = self.double_slash.replace_all(&joined, "/");

        let mut url = target.url.clone();
        url.set_path(&path);
        url.set_query(uri.query());
        url
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn table(entries: &[(&str, &str)]) -> RouteTable {
        let configs: Vec<_> = entries
            .iter()
            .map(|(base_path, url)| ProxyConfig {
                base_path: (*base_path).to_string(),
                url: (*url).to_string(),
            })
            .collect();
        RouteTable::new(&configs).unwrap()
    }

    #[rstest]
    #[case("/", "http://up:8080", "/secured?foo=bar", "http://up:8080/secured?foo=bar")]
    #[case("/", "http://up:8080/", "/", "http://up:8080/")]
    #[case("/api", "http://up:8080/v1", "/api/users", "http://up:8080/v1/users")]
    #[case("/api", "http://up:8080/v1/", "/api//users//42", "http://up:8080/v1/users/42")]
    #[case("/api/", "http://up:8080/v1", "/api/users", "http://up:8080/v1/users")]
    #[case("/api", "http://up:8080/v1", "/api", "http://up:8080/v1")]
    fn test_upstream_url(
        #[case] base_path: &str,
        #[case] target: &str,
        #[case] inbound: &str,
        #[case] expected: &str,
    ) {
        let routes = table(&[(base_path, target)]);
        let uri: Uri = inbound.parse().unwrap();
        let target = routes.resolve(uri.path()).unwrap();

        assert_eq!(routes.upstream_url(target, &uri).as_str(), expected);
    }

    #[test]
    fn test_query_keeps_double_slashes() {
        let routes = table(&[("/", "http://up:8080")]);
        let uri: Uri = "/a?next=http://x//y".parse().unwrap();
        let target = routes.resolve(uri.path()).unwrap();

        assert_eq!(
            routes.upstream_url(target, &uri).as_str(),
            "http://up:8080/a?next=http://x//y"
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let routes = table(&[("/", "http://root:1"), ("/api", "http://api:2")]);

        assert_eq!(routes.resolve("/api/x").unwrap().url.host_str(), Some("api"));
        assert_eq!(routes.resolve("/apix").unwrap().url.host_str(), Some("root"));
        assert_eq!(routes.resolve("/").unwrap().url.host_str(), Some("root"));
    }

    #[test]
    fn test_no_match() {
        let routes = table(&[("/api", "https://api:443")]);
        assert!(routes.resolve("/other").is_none());
        assert!(routes.resolve("/api").unwrap().tls);
    }
}
