//! # 署名者の選択
//!
//! `--key-id` が指定されればKMS、`--local-key` が指定されればPEM鍵を使う。
//! いずれも [`RetryingSigner`] で包む。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Args;
use provenance_core::SigningContext;
use provenance_signer::{InMemorySigner, RemoteSigner, RetryPolicy, RetryingSigner};
use provenance_types::SigningAlgorithm;

/// ローカル鍵に割り当てる鍵識別子。
const LOCAL_KEY_ID: &str = "local";

/// 署名者の指定。
#[derive(Debug, Clone, Args)]
pub struct SignerArgs {
    /// KMS鍵ID / ARN / エイリアス
    #[arg(long, env = "KMS_KEY_ID", conflicts_with = "local_key")]
    pub key_id: Option<String>,

    /// AWSリージョン
    #[arg(long, env = "AWS_REGION", default_value = "eu-west-2")]
    pub region: String,

    /// KMSエンドポイントの上書き（LocalStack等）
    #[arg(long, env = "KMS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// ローカルのEC秘密鍵PEM（PKCS#8 / SEC1）
    #[arg(long, env = "SIGNING_KEY")]
    pub local_key: Option<PathBuf>,

    /// 署名アルゴリズム（ECDSA_SHA_256 / ECDSA_SHA_384）
    #[arg(long, default_value = "ECDSA_SHA_256", value_parser = parse_algorithm)]
    pub algorithm: SigningAlgorithm,
}

fn parse_algorithm(value: &str) -> Result<SigningAlgorithm, String> {
    SigningAlgorithm::from_name(value)
        .ok_or_else(|| format!("対応していない署名アルゴリズムです: {value}"))
}

impl SignerArgs {
    /// 署名者と署名コンテキストを作成する。
    pub fn build(&self) -> anyhow::Result<(Arc<dyn RemoteSigner>, SigningContext)> {
        let (inner, key_id): (Arc<dyn RemoteSigner>, String) =
            match (&self.key_id, &self.local_key) {
                (Some(key_id), _) => (self.kms_signer()?, key_id.clone()),
                (None, Some(path)) => {
                    let pem = std::fs::read_to_string(path)
                        .with_context(|| format!("秘密鍵を読み込めません: {}", path.display()))?;
                    let signer = InMemorySigner::from_pem(LOCAL_KEY_ID, &pem)?;
                    (Arc::new(signer), LOCAL_KEY_ID.to_string())
                }
                (None, None) => bail!("--key-id または --local-key のいずれかを指定してください"),
            };

        tracing::debug!(signer = inner.signer_type(), key_id = %key_id, "署名者を作成しました");
        let signer = Arc::new(RetryingSigner::new(inner, RetryPolicy::default()));
        let context = SigningContext::new(key_id).with_algorithm(self.algorithm);
        Ok((signer, context))
    }

    #[cfg(feature = "vendor-aws")]
    fn kms_signer(&self) -> anyhow::Result<Arc<dyn RemoteSigner>> {
        use provenance_signer::{AwsCredentials, KmsConfig, KmsSigner};

        let credentials = AwsCredentials::from_env()
            .context("AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY が未設定です")?;
        let mut config = KmsConfig::new(&self.region, credentials);
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        Ok(Arc::new(KmsSigner::new(config)?))
    }

    #[cfg(not(feature = "vendor-aws"))]
    fn kms_signer(&self) -> anyhow::Result<Arc<dyn RemoteSigner>> {
        bail!("vendor-aws フィーチャなしでビルドされているためKMSは利用できません")
    }
}
