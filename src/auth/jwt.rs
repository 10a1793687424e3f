//! # JWT 校验
//!
//! 按配置的公钥和算法白名单校验访问令牌；
//! 只关心 cookie 有效期时，不校验签名直接读取过期声明。

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::{Error as JwtError, ErrorKind},
};
use std::str::FromStr;
use thiserror::Error;

use crate::config::JwtOptions;
use crate::error::{GatewayError, Result};

/// 解码后的令牌载荷。声明不做结构约束，网关只读取 `exp`。
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// 令牌校验结果
#[derive(Debug, Error)]
pub enum TokenError {
    /// 签名有效但 `exp` 已过期
    #[error("jwt expired")]
    Expired,
    /// 其他情况：签名错误、算法不符、声明不匹配或无法解析
    #[error("{0}")]
    Invalid(#[source] JwtError),
}

impl TokenError {
    /// 仅过期检查失败时为 `true`。
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl From<JwtError> for TokenError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err),
        }
    }
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        Self::unauthorized_with_source(format!("JWT Token error: {err}"), err)
    }
}

/// 绑定单个校验密钥的令牌编解码器
pub struct TokenCodec {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// 由 PEM（HS* 则为共享密钥）密钥材料构建编解码器。
    pub fn new(public_key: &str, options: &JwtOptions) -> Result<Self> {
        let algorithms = parse_algorithms(&options.algorithms)?;
        let decoding_key = decoding_key(public_key, algorithms[0])?;

        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms;
        validation.leeway = options.leeway_secs;
        validation.validate_exp = !options.ignore_expiration;
        validation.validate_nbf = true;
        validation.set_required_spec_claims::<&str>(&[]);

        match &options.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &options.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// 校验签名、算法和注册声明。
    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// 不校验签名与声明直接解码。只读取载荷段，适用于所有算法。
    #[must_use]
    pub fn decode_unverified(token: &str) -> Option<Claims> {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return None;
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// 未经校验的 `exp` 声明，单位为 Unix 秒。
    #[must_use]
    pub fn expiry(token: &str) -> Option<i64> {
        let claims = Self::decode_unverified(token)?;
        let exp = claims.get("exp")?;
        #[allow(clippy::cast_possible_truncation)]
        exp.as_i64().or_else(|| exp.as_f64().map(|secs| secs as i64))
    }

    /// 签发 `claims`。网关自身不签发令牌，供认证服务和测试夹具使用。
    pub fn encode(
        claims: &Claims,
        algorithm: Algorithm,
        key: &EncodingKey,
    ) -> std::result::Result<String, TokenError> {
        Ok(encode(&Header::new(algorithm), claims, key)?)
    }
}

fn parse_algorithms(names: &[String]) -> Result<Vec<Algorithm>> {
    if names.is_empty() {
        return Err(GatewayError::config("jwt.algorithms must not be empty"));
    }

    let algorithms = names
        .iter()
        .map(|name| {
            Algorithm::from_str(name).map_err(|e| {
                GatewayError::config_with_source(format!("unknown jwt algorithm: {name}"), e)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let family = key_family(algorithms[0]);
    if algorithms.iter().any(|alg| key_family(*alg) != family) {
        return Err(GatewayError::config(
            "jwt.algorithms must all use the same key type",
        ));
    }

    Ok(algorithms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

const fn key_family(algorithm: Algorithm) -> KeyFamily {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
        Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
        Algorithm::EdDSA => KeyFamily::Ed,
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => KeyFamily::Rsa,
    }
}

fn decoding_key(material: &str, algorithm: Algorithm) -> Result<DecodingKey> {
    let pem = material.as_bytes();
    let key = match key_family(algorithm) {
        KeyFamily::Hmac => Ok(DecodingKey::from_secret(pem)),
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
        KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
        KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
    };
    key.map_err(|e| GatewayError::config_with_source("invalid public_key", e))
}
