//! # AWS KMS 署名者
//!
//! AWS KMS の JSON プロトコル（`TrentService.Sign` / `TrentService.GetPublicKey`）を
//! `reqwest` で直接呼び出す。リクエストは SigV4 で署名する。
//!
//! ## 動作
//! - KMSはDER形式のECDSA署名を返すため、[`RawSignature`] に変換して返す
//! - RAWメッセージがKMSの上限（4096バイト）を超える場合はローカルでハッシュし、
//!   DIGESTとして送る（得られる署名は同一）
//! - KMSのエラー種別（`__type`）を [`SignerError`] に対応付ける

pub mod sigv4;

use std::time::Duration;

use base64::Engine;
use provenance_crypto::RawSignature;
use provenance_types::{KeyId, KeySpec, KeyUsage, MessageType, PublicKeyInfo, SigningAlgorithm};
use serde::{Deserialize, Serialize};

use crate::local::digest_message;
use crate::{RemoteSigner, SignatureOutput, SignerError};

/// KMSがRAWメッセージとして受け付ける最大バイト数。
pub const KMS_MAX_RAW_MESSAGE: usize = 4096;

/// HTTPリクエストのデフォルトタイムアウト。
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// AWS認証情報。
#[derive(Clone)]
pub struct AwsCredentials {
    /// アクセスキーID
    pub access_key_id: String,
    /// シークレットアクセスキー
    pub secret_access_key: String,
    /// セッショントークン（一時認証情報の場合）
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AwsCredentials {
    /// 環境変数 `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN` から読み込む。
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

/// KMSクライアントの設定。
#[derive(Debug, Clone)]
pub struct KmsConfig {
    /// リージョン
    pub region: String,
    /// エンドポイントURL（`None` の場合 `https://kms.{region}.amazonaws.com/`）
    pub endpoint: Option<String>,
    /// 認証情報
    pub credentials: AwsCredentials,
    /// HTTPリクエストのタイムアウト
    pub http_timeout: Duration,
}

impl KmsConfig {
    /// リージョンと認証情報から設定を作成する。
    pub fn new(region: impl Into<String>, credentials: AwsCredentials) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            credentials,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// エンドポイントを上書きする（LocalStack・テスト用）。
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// AWS KMS署名者。
pub struct KmsSigner {
    client: reqwest::Client,
    url: reqwest::Url,
    host: String,
    region: String,
    credentials: AwsCredentials,
}

// ---------------------------------------------------------------------------
// KMS JSONプロトコル
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SignRequest<'a> {
    key_id: &'a str,
    message: String,
    message_type: &'static str,
    signing_algorithm: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignResponse {
    key_id: Option<String>,
    signature: String,
    signing_algorithm: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetPublicKeyRequest<'a> {
    key_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetPublicKeyResponse {
    key_id: Option<String>,
    public_key: String,
    key_spec: Option<KeySpec>,
    key_usage: Option<KeyUsage>,
    #[serde(default)]
    signing_algorithms: Vec<String>,
}

#[derive(Deserialize, Default)]
struct KmsErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// KMSのエラー応答を [`SignerError`] に対応付ける。
pub fn map_kms_error(status: u16, error_type: &str, message: &str, key_id: &KeyId) -> SignerError {
    // "com.amazonaws.kms#NotFoundException" → "NotFoundException"
    let kind = error_type.rsplit('#').next().unwrap_or(error_type);
    let detail = if message.is_empty() {
        format!("{kind} (HTTP {status})")
    } else {
        format!("{kind}: {message}")
    };
    match kind {
        "NotFoundException" => SignerError::KeyNotFound(key_id.clone()),
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "ExpiredTokenException"
        | "IncompleteSignature"
        | "MissingAuthenticationToken" => SignerError::Unauthorized(detail),
        "InvalidKeyUsageException" | "UnsupportedOperationException" | "KMSInvalidStateException"
        | "DisabledException" => SignerError::AlgorithmMismatch {
            key_id: key_id.clone(),
            reason: detail,
        },
        "ThrottlingException" | "KMSInternalException" | "DependencyTimeoutException"
        | "KeyUnavailableException" => SignerError::Transient(detail),
        _ if status == 429 || status >= 500 => SignerError::Transient(detail),
        _ if status == 401 || status == 403 => SignerError::Unauthorized(detail),
        _ => SignerError::InvalidResponse(detail),
    }
}

impl KmsSigner {
    /// 設定からクライアントを作成する。
    pub fn new(config: KmsConfig) -> Result<Self, SignerError> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kms.{}.amazonaws.com/", config.region));
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| SignerError::InvalidResponse(format!("KMSエンドポイントが不正です: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SignerError::InvalidResponse(format!(
                    "KMSエンドポイントにホストがありません: {endpoint}"
                )))
            }
        };
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| SignerError::InvalidResponse(format!("HTTPクライアントの作成に失敗: {e}")))?;

        tracing::info!(region = %config.region, endpoint = %url, "KMS署名者を初期化しました");

        Ok(Self {
            client,
            url,
            host,
            region: config.region,
            credentials: config.credentials,
        })
    }

    /// KMS APIを呼び出し、成功時のJSONボディを返す。
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        target: &str,
        body: &impl Serialize,
        key_id: &KeyId,
    ) -> Result<T, SignerError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| SignerError::InvalidResponse(format!("リクエストのシリアライズに失敗: {e}")))?;

        let params = sigv4::SigningParams {
            access_key_id: &self.credentials.access_key_id,
            secret_access_key: &self.credentials.secret_access_key,
            region: &self.region,
            service: "kms",
            time: chrono::Utc::now(),
        };
        let amz_date = params.amz_date();
        let target_header = format!("TrentService.{target}");

        let mut signed_headers: Vec<(&str, &str)> = vec![
            ("content-type", CONTENT_TYPE),
            ("host", self.host.as_str()),
            ("x-amz-date", amz_date.as_str()),
            ("x-amz-target", target_header.as_str()),
        ];
        if let Some(token) = &self.credentials.session_token {
            signed_headers.push(("x-amz-security-token", token.as_str()));
        }
        let authorization = sigv4::authorization_header("POST", "/", &signed_headers, &payload, &params);

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Date", &amz_date)
            .header("X-Amz-Target", &target_header)
            .header("Authorization", authorization);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| SignerError::Transient(format!("KMSへの接続に失敗: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SignerError::Transient(format!("KMS応答の受信に失敗: {e}")))?;

        if !status.is_success() {
            let error: KmsErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
            let mapped = map_kms_error(status.as_u16(), &error.error_type, &error.message, key_id);
            tracing::warn!(
                target = %target_header,
                key_id = %key_id,
                status = status.as_u16(),
                error = %mapped,
                "KMS呼び出しが失敗しました"
            );
            return Err(mapped);
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| SignerError::InvalidResponse(format!("{target} 応答のパースに失敗: {e}")))
    }
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, SignerError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| SignerError::InvalidResponse(format!("{field} のBase64デコードに失敗: {e}")))
}

#[async_trait::async_trait]
impl RemoteSigner for KmsSigner {
    fn signer_type(&self) -> &str {
        "aws_kms"
    }

    async fn sign(
        &self,
        key_id: &KeyId,
        message: &[u8],
        algorithm: SigningAlgorithm,
        message_type: MessageType,
    ) -> Result<SignatureOutput, SignerError> {
        let (message, message_type) = match message_type {
            MessageType::Raw if message.len() > KMS_MAX_RAW_MESSAGE => {
                tracing::debug!(
                    key_id = %key_id,
                    len = message.len(),
                    "メッセージがKMSの上限を超えるためローカルでハッシュします"
                );
                (digest_message(algorithm, message), MessageType::Digest)
            }
            other => (message.to_vec(), other),
        };

        let request = SignRequest {
            key_id: key_id.as_str(),
            message: base64::engine::general_purpose::STANDARD.encode(&message),
            message_type: message_type.as_str(),
            signing_algorithm: algorithm.as_str(),
        };
        let response: SignResponse = self.call("Sign", &request, key_id).await?;

        let reported = match response.signing_algorithm.as_deref() {
            Some(name) => SigningAlgorithm::from_name(name).ok_or_else(|| {
                SignerError::InvalidResponse(format!("未知の署名アルゴリズム: {name}"))
            })?,
            None => algorithm,
        };
        let der = decode_b64("Signature", &response.signature)?;
        let raw = RawSignature::from_der(&der, reported)
            .map_err(|e| SignerError::InvalidResponse(format!("KMS署名のデコードに失敗: {e}")))?;

        tracing::debug!(key_id = %key_id, algorithm = %reported, "KMSで署名しました");

        Ok(SignatureOutput {
            key_id: response.key_id.map(KeyId::from).unwrap_or_else(|| key_id.clone()),
            algorithm: reported,
            raw,
        })
    }

    async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError> {
        let request = GetPublicKeyRequest {
            key_id: key_id.as_str(),
        };
        let response: GetPublicKeyResponse = self.call("GetPublicKey", &request, key_id).await?;

        Ok(PublicKeyInfo {
            key_id: response.key_id.map(KeyId::from).unwrap_or_else(|| key_id.clone()),
            key_spec: response.key_spec.unwrap_or(KeySpec::Unsupported),
            key_usage: response.key_usage.unwrap_or(KeyUsage::Other),
            signing_algorithms: response
                .signing_algorithms
                .iter()
                .filter_map(|name| SigningAlgorithm::from_name(name))
                .collect(),
            public_key_der: decode_b64("PublicKey", &response.public_key)?,
        })
    }
}
