//! # サーバー設定・共有状態
//!
//! 環境変数からの設定読み込みと、起動時に一度だけ構築する共有状態の定義。
//!
//! | 環境変数 | 内容 |
//! |---------|------|
//! | `ROOT_CA_CERTIFICATE` | 信頼済みルート証明書（PEM）のパス（必須） |
//! | `SIGNING_BUNDLE` | 署名者の証明書バンドル（PEM）のパス（必須） |
//! | `KMS_KEY_ID` | KMS鍵ID（設定時はKMSで署名） |
//! | `AWS_REGION` / `AWS_DEFAULT_REGION` | KMSのリージョン |
//! | `KMS_ENDPOINT` | KMSエンドポイントの上書き |
//! | `SIGNING_KEY` | ローカル秘密鍵（PEM）のパス（KMSを使わない場合） |
//! | `SIGNING_ALGORITHM` | `ECDSA_SHA_256`（デフォルト）/ `ECDSA_SHA_384` |
//! | `SCHEME_URI` / `TRUST_FRAMEWORK_URL` | スキーム・トラストフレームワークのURL |
//! | `SIGNER_ROLES` | 署名ブロックに記録する署名者のロール（カンマ区切り） |
//! | `SIGN_TIMEOUT_MS` | リモート署名1回のタイムアウト |
//! | `BIND_ADDR` | 待ち受けアドレス（デフォルト `0.0.0.0:8000`） |
//!
//! 署名者のメンバーURLは設定せず、リーフ証明書の SubjectAltName のURI
//! （なければSubject）を使う。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use provenance_core::{RecordSigner, SchemeUrls, SignatureAssembler, SigningContext};
use provenance_crypto::{build_chain, ensure_key_match, CertificateBundle, ParsedCertificate};
use provenance_signer::{InMemorySigner, RemoteSigner, RetryPolicy, RetryingSigner};
use provenance_types::{KeyId, SigningAlgorithm};

use crate::error::ServerError;

/// ローカル鍵を使う場合の鍵識別子。
pub const LOCAL_KEY_ID: &str = "local";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// 設定読み込みのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 必須の環境変数が未設定
    #[error("{0} is not set")]
    Missing(&'static str),
    /// 値が不正
    #[error("{name} の値が不正です: {reason}")]
    Invalid {
        /// 環境変数名
        name: &'static str,
        /// 理由
        reason: String,
    },
}

/// 署名鍵の取得元。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerSource {
    /// AWS KMS。`fallback_key` はKMSクライアントを作成できない場合に使うローカル鍵
    Kms {
        /// KMS鍵ID
        key_id: String,
        /// リージョン
        region: String,
        /// エンドポイントの上書き
        endpoint: Option<String>,
        /// フォールバック用ローカル鍵
        fallback_key: Option<PathBuf>,
    },
    /// ローカルのPEM秘密鍵
    LocalKey(PathBuf),
}

/// サービス設定。
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// 信頼済みルート証明書のパス
    pub root_ca_certificate: PathBuf,
    /// 署名者の証明書バンドルのパス
    pub signing_bundle: PathBuf,
    /// 署名鍵の取得元
    pub signer: SignerSource,
    /// 署名アルゴリズム
    pub algorithm: SigningAlgorithm,
    /// スキームURL
    pub scheme: SchemeUrls,
    /// 署名者のロール
    pub signer_roles: Vec<String>,
    /// 再試行ポリシー
    pub retry: RetryPolicy,
    /// 待ち受けアドレス
    pub bind_addr: String,
}

impl ServiceConfig {
    /// 環境変数から読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む。空文字列は未設定とみなす。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let root_ca_certificate = get("ROOT_CA_CERTIFICATE")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("ROOT_CA_CERTIFICATE"))?;
        let signing_bundle = get("SIGNING_BUNDLE")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("SIGNING_BUNDLE"))?;

        let local_key = get("SIGNING_KEY").map(PathBuf::from);
        let signer = match get("KMS_KEY_ID") {
            Some(key_id) => SignerSource::Kms {
                key_id,
                region: get("AWS_REGION")
                    .or_else(|| get("AWS_DEFAULT_REGION"))
                    .ok_or(ConfigError::Missing("AWS_REGION"))?,
                endpoint: get("KMS_ENDPOINT"),
                fallback_key: local_key,
            },
            None => SignerSource::LocalKey(local_key.ok_or(ConfigError::Missing("SIGNING_KEY"))?),
        };

        let algorithm = match get("SIGNING_ALGORITHM") {
            Some(name) => SigningAlgorithm::from_name(&name).ok_or_else(|| ConfigError::Invalid {
                name: "SIGNING_ALGORITHM",
                reason: format!("未対応のアルゴリズム: {name}"),
            })?,
            None => SigningAlgorithm::default(),
        };

        let defaults = SchemeUrls::default();
        let scheme = SchemeUrls {
            scheme: get("SCHEME_URI").unwrap_or(defaults.scheme),
            trust_framework: get("TRUST_FRAMEWORK_URL").unwrap_or(defaults.trust_framework),
        };

        let mut retry = RetryPolicy::default();
        if let Some(ms) = get("SIGN_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|e| ConfigError::Invalid {
                name: "SIGN_TIMEOUT_MS",
                reason: format!("{e}"),
            })?;
            retry.call_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            root_ca_certificate,
            signing_bundle,
            signer,
            algorithm,
            scheme,
            signer_roles: get("SIGNER_ROLES")
                .map(|roles| {
                    roles
                        .split(',')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            retry,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

/// サーバーの共有状態。起動後は読み取り専用。
pub struct AppState {
    /// 来歴レコードの署名者
    pub record_signer: RecordSigner,
    /// 信頼済みルート証明書
    pub trusted_root: ParsedCertificate,
    /// 署名者のリーフ証明書
    pub signer_certificate: ParsedCertificate,
    /// スキームURL
    pub scheme: SchemeUrls,
}

impl AppState {
    /// 署名アセンブラ。
    pub fn assembler(&self) -> &SignatureAssembler {
        self.record_signer.assembler()
    }

    /// 署名コンテキスト。
    pub fn context(&self) -> &SigningContext {
        self.record_signer.context()
    }

    /// 署名者・証明書から状態を構築する。
    ///
    /// 署名者のバンドルは `trusted_root` まで検証され、リーフ → 中間CA の順に並べ替えられる。
    pub fn new(
        signer: Arc<dyn RemoteSigner>,
        context: SigningContext,
        trusted_root: ParsedCertificate,
        bundle: &CertificateBundle,
        scheme: SchemeUrls,
        roles: Vec<String>,
    ) -> Result<Self, ServerError> {
        let chain = build_chain(bundle, &trusted_root, SystemTime::now()).map_err(|e| {
            ServerError::Configuration(format!("署名者の証明書チェーンを検証できません: {e}"))
        })?;
        let signer_certificate = chain.leaf().clone();

        // ルートは検証側が持つため、レコードにはリーフと中間CAだけを添付する
        let mut certificates = chain.to_der_list();
        if certificates.len() > 1 {
            certificates.pop();
        }

        let record_signer = RecordSigner::new(
            SignatureAssembler::new(signer),
            context,
            roles,
            certificates,
        )
        .map_err(|e| ServerError::Configuration(e.to_string()))?;

        Ok(Self {
            record_signer,
            trusted_root,
            signer_certificate,
            scheme,
        })
    }

    /// 設定ファイル・鍵を読み込んで状態を構築する。
    pub async fn load(config: &ServiceConfig) -> Result<Self, ServerError> {
        let root_pem = read_file(&config.root_ca_certificate)?;
        let trusted_root = ParsedCertificate::from_pem(&root_pem)
            .map_err(|e| ServerError::Configuration(format!("ROOT_CA_CERTIFICATE: {e}")))?;
        let bundle = CertificateBundle::from_pem(&read_file(&config.signing_bundle)?)
            .map_err(|e| ServerError::Configuration(format!("SIGNING_BUNDLE: {e}")))?;

        let (signer, key_id) = build_signer(config)?;
        let context = SigningContext::new(key_id).with_algorithm(config.algorithm);
        let state = Self::new(
            signer,
            context,
            trusted_root,
            &bundle,
            config.scheme.clone(),
            config.signer_roles.clone(),
        )?;

        tracing::info!(
            signer = state.assembler().signer().signer_type(),
            key_id = %state.context().key_id,
            subject = %state.signer_certificate.subject(),
            member = %state.record_signer.identity().member,
            "署名者を初期化しました"
        );
        Ok(state)
    }

    /// リモート鍵が署名者証明書の鍵と一致することを確認する。
    ///
    /// 不一致は設定エラー。リモート署名者に到達できない場合は警告のみ。
    pub async fn check_key_match(&self) -> Result<(), ServerError> {
        let signer = self.assembler().signer();
        match signer.get_public_key(&self.context().key_id).await {
            Ok(info) => ensure_key_match(&self.signer_certificate, &info.public_key_der)
                .map_err(|e| ServerError::Configuration(e.to_string())),
            Err(e) if e.is_transient() || matches!(e, provenance_signer::SignerError::SigningUnavailable { .. }) => {
                tracing::warn!(error = %e, "起動時の鍵一致確認をスキップしました");
                Ok(())
            }
            Err(e) => Err(ServerError::Configuration(e.to_string())),
        }
    }
}

fn read_file(path: &std::path::Path) -> Result<String, ServerError> {
    std::fs::read_to_string(path)
        .map_err(|e| ServerError::Configuration(format!("{} を読み込めません: {e}", path.display())))
}

fn local_signer(path: &std::path::Path) -> Result<(Arc<dyn RemoteSigner>, KeyId), ServerError> {
    let pem = read_file(path)?;
    let signer = InMemorySigner::from_pem(LOCAL_KEY_ID, &pem)
        .map_err(|e| ServerError::Configuration(format!("SIGNING_KEY: {e}")))?;
    tracing::info!(path = %path.display(), "ローカル鍵で署名します");
    Ok((Arc::new(signer), KeyId::new(LOCAL_KEY_ID)))
}

/// 設定に従ってリモート署名者を作成し、再試行付きで包む。
fn build_signer(config: &ServiceConfig) -> Result<(Arc<dyn RemoteSigner>, KeyId), ServerError> {
    let (inner, key_id) = match &config.signer {
        SignerSource::LocalKey(path) => local_signer(path)?,
        SignerSource::Kms {
            key_id,
            region,
            endpoint,
            fallback_key,
        } => match kms_signer(region, endpoint.as_deref()) {
            Ok(signer) => (signer, KeyId::new(key_id.as_str())),
            Err(e) => match fallback_key {
                Some(path) => {
                    tracing::warn!(error = %e, "KMSを利用できないためローカル鍵にフォールバックします");
                    local_signer(path)?
                }
                None => return Err(e),
            },
        },
    };
    Ok((Arc::new(RetryingSigner::new(inner, config.retry)), key_id))
}

#[cfg(feature = "vendor-aws")]
fn kms_signer(region: &str, endpoint: Option<&str>) -> Result<Arc<dyn RemoteSigner>, ServerError> {
    use provenance_signer::{AwsCredentials, KmsConfig, KmsSigner};

    let credentials = AwsCredentials::from_env().ok_or_else(|| {
        ServerError::Configuration("AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY が未設定です".into())
    })?;
    let mut kms_config = KmsConfig::new(region, credentials);
    if let Some(endpoint) = endpoint {
        kms_config = kms_config.with_endpoint(endpoint);
    }
    let signer =
        KmsSigner::new(kms_config).map_err(|e| ServerError::Configuration(e.to_string()))?;
    Ok(Arc::new(signer))
}

#[cfg(not(feature = "vendor-aws"))]
fn kms_signer(_region: &str, _endpoint: Option<&str>) -> Result<Arc<dyn RemoteSigner>, ServerError> {
    Err(ServerError::Configuration(
        "vendor-aws フィーチャなしでビルドされているためKMSは利用できません".into(),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_local_key_config() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("ROOT_CA_CERTIFICATE", "/etc/provenance/root.pem"),
            ("SIGNING_BUNDLE", "/etc/provenance/bundle.pem"),
            ("SIGNING_KEY", "/etc/provenance/key.pem"),
            ("SIGNER_ROLES", "https://a.example/role/x, https://a.example/role/y,"),
            ("SIGN_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.signer, SignerSource::LocalKey("/etc/provenance/key.pem".into()));
        assert_eq!(config.algorithm, SigningAlgorithm::EcdsaSha256);
        assert_eq!(config.scheme, SchemeUrls::default());
        assert_eq!(config.signer_roles.len(), 2);
        assert_eq!(config.retry.call_timeout, Duration::from_millis(2500));
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_kms_config() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("ROOT_CA_CERTIFICATE", "root.pem"),
            ("SIGNING_BUNDLE", "bundle.pem"),
            ("KMS_KEY_ID", "alias/provenance"),
            ("AWS_DEFAULT_REGION", "eu-west-2"),
            ("SIGNING_ALGORITHM", "ECDSA_SHA_384"),
            ("SCHEME_URI", "https://registry.example/scheme/perseus"),
        ]))
        .unwrap();

        assert_eq!(
            config.signer,
            SignerSource::Kms {
                key_id: "alias/provenance".into(),
                region: "eu-west-2".into(),
                endpoint: None,
                fallback_key: None,
            }
        );
        assert_eq!(config.algorithm, SigningAlgorithm::EcdsaSha384);
        assert_eq!(config.scheme.scheme, "https://registry.example/scheme/perseus");
    }

    #[test]
    fn test_missing_values() {
        let err = ServiceConfig::from_lookup(lookup(&[("SIGNING_BUNDLE", "b.pem")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ROOT_CA_CERTIFICATE")));

        let err = ServiceConfig::from_lookup(lookup(&[
            ("ROOT_CA_CERTIFICATE", "r.pem"),
            ("SIGNING_BUNDLE", "b.pem"),
            ("SIGNING_KEY", ""),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SIGNING_KEY")));

        let err = ServiceConfig::from_lookup(lookup(&[
            ("ROOT_CA_CERTIFICATE", "r.pem"),
            ("SIGNING_BUNDLE", "b.pem"),
            ("SIGNING_KEY", "k.pem"),
            ("SIGNING_ALGORITHM", "RSASSA_PSS_SHA_256"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SIGNING_ALGORITHM", .. }));
    }
}
