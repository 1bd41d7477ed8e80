//! # リモート署名クライアント
//!
//! 秘密鍵を取り出せないリモート署名者（KMS等）への署名要求を抽象化するトレイト。
//! 呼び出し側はメッセージをそのまま渡し、ハッシュは署名者側で行う。
//!
//! 現在の実装:
//! - [`KmsSigner`] — AWS KMS（JSONプロトコル + SigV4）
//! - [`InMemorySigner`] — ローカル開発・テスト用（メモリ内のP-256/P-384鍵）
//! - [`RetryingSigner`] — 任意の実装を包み、呼び出しごとのタイムアウトと一時的失敗の再試行を行う

#[cfg(feature = "vendor-aws")]
pub mod kms;
pub mod local;
pub mod retry;

#[cfg(feature = "vendor-aws")]
pub use kms::{AwsCredentials, KmsConfig, KmsSigner};
pub use local::InMemorySigner;
pub use retry::{RetryPolicy, RetryingSigner};

use std::sync::Arc;

use provenance_crypto::RawSignature;
use provenance_types::{KeyId, MessageType, PublicKeyInfo, SigningAlgorithm};

/// リモート署名のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// 鍵が存在しない
    #[error("鍵が見つかりません: {0}")]
    KeyNotFound(KeyId),
    /// 認証・認可に失敗
    #[error("リモート署名者への認証に失敗: {0}")]
    Unauthorized(String),
    /// 鍵仕様・鍵用途が要求されたアルゴリズムと合わない
    #[error("鍵 {key_id} は要求されたアルゴリズムで使用できません: {reason}")]
    AlgorithmMismatch {
        /// 鍵識別子
        key_id: KeyId,
        /// 理由
        reason: String,
    },
    /// 一時的な失敗（再試行可能）
    #[error("リモート署名者の一時的な失敗: {0}")]
    Transient(String),
    /// 一時的な失敗が再試行上限に達した
    #[error("リモート署名者が利用できません ({attempts} 回試行): {last}")]
    SigningUnavailable {
        /// 試行回数
        attempts: u32,
        /// 最後のエラー
        last: String,
    },
    /// リモート署名者の応答が不正
    #[error("リモート署名者の応答が不正です: {0}")]
    InvalidResponse(String),
}

impl SignerError {
    /// 再試行で回復し得るエラーの場合 true。
    pub fn is_transient(&self) -> bool {
        matches!(self, SignerError::Transient(_))
    }
}

/// 署名結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutput {
    /// 署名に使われた鍵（KMSの場合はARN）
    pub key_id: KeyId,
    /// リモート署名者が報告した署名アルゴリズム
    pub algorithm: SigningAlgorithm,
    /// 署名値
    pub raw: RawSignature,
}

/// リモート署名者の抽象インターフェース。
///
/// 同じ鍵・同じメッセージでも呼び出しごとに異なる `(r, s)` が返り得る。
/// 同じ鍵への並行呼び出しは許可される。
#[async_trait::async_trait]
pub trait RemoteSigner: Send + Sync {
    /// 署名者の種別（ログ用、`"aws_kms"` / `"in_memory"` 等）。
    fn signer_type(&self) -> &str;

    /// `message` に署名する。
    ///
    /// `message_type` が [`MessageType::Raw`] の場合、`message` は署名対象のバイト列そのもので、
    /// 署名者がアルゴリズムに従ってハッシュする。
    async fn sign(
        &self,
        key_id: &KeyId,
        message: &[u8],
        algorithm: SigningAlgorithm,
        message_type: MessageType,
    ) -> Result<SignatureOutput, SignerError>;

    /// 鍵の公開情報を取得する。
    async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError>;
}

#[async_trait::async_trait]
impl<T: RemoteSigner + ?Sized> RemoteSigner for Arc<T> {
    fn signer_type(&self) -> &str {
        (**self).signer_type()
    }

    async fn sign(
        &self,
        key_id: &KeyId,
        message: &[u8],
        algorithm: SigningAlgorithm,
        message_type: MessageType,
    ) -> Result<SignatureOutput, SignerError> {
        (**self).sign(key_id, message, algorithm, message_type).await
    }

    async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError> {
        (**self).get_public_key(key_id).await
    }
}
