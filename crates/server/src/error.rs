//! # サーバーエラー型
//!
//! 全エンドポイントで共通のエラー型。ドメインのエラーをHTTPステータスに変換する。
//!
//! | 分類 | ステータス |
//! |------|-----------|
//! | 入力不正・検証失敗・チェーン不正 | 400 |
//! | 設定不備・リモート署名者を利用できない | 503 |
//! | その他 | 500 |

use axum::http::StatusCode;
use axum::Json;
use provenance_core::{AssemblerError, RecordError};
use provenance_signer::SignerError;

/// サーバーエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// 不正なリクエスト
    #[error("{0}")]
    BadRequest(String),
    /// サービスの設定不備
    #[error("署名サービスの設定に問題があります: {0}")]
    Configuration(String),
    /// リモート署名者を利用できない
    #[error("リモート署名者を利用できません: {0}")]
    SigningUnavailable(String),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTPステータス。
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Configuration(_) | ServerError::SigningUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SignerError> for ServerError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Transient(_) | SignerError::SigningUnavailable { .. } => {
                ServerError::SigningUnavailable(e.to_string())
            }
            SignerError::KeyNotFound(_)
            | SignerError::Unauthorized(_)
            | SignerError::AlgorithmMismatch { .. } => ServerError::Configuration(e.to_string()),
            SignerError::InvalidResponse(_) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<AssemblerError> for ServerError {
    fn from(e: AssemblerError) -> Self {
        match e {
            AssemblerError::Signer(e) => e.into(),
            AssemblerError::Der(_)
            | AssemblerError::PublicKey(_)
            | AssemblerError::Request(_)
            | AssemblerError::KeyMismatch { .. } => ServerError::BadRequest(e.to_string()),
            AssemblerError::AlgorithmInconsistency(_) | AssemblerError::Signature(_) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl From<RecordError> for ServerError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Assembler(e) => e.into(),
            RecordError::NoCertificates | RecordError::SignerCertificate(_) => {
                ServerError::Configuration(e.to_string())
            }
            RecordError::Json(_) => ServerError::Internal(e.to_string()),
            RecordError::InvalidStep(_)
            | RecordError::Malformed(_)
            | RecordError::TrustFrameworkMismatch { .. }
            | RecordError::PendingSteps(_)
            | RecordError::NothingToSign
            | RecordError::Chain { .. }
            | RecordError::InvalidSignature { .. }
            | RecordError::IdentityMismatch { .. }
            | RecordError::StepNotFound(_)
            | RecordError::AmbiguousStep(_)
            | RecordError::Validation(_) => ServerError::BadRequest(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "リクエストの処理に失敗しました");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "不正なリクエスト");
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}
