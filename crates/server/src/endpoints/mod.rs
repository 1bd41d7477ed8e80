//! # エンドポイント
//!
//! - `GET /` — サービス情報
//! - `POST /api/v1/sign/edp` — EDPレコードの作成・署名
//! - `POST /api/v1/sign/cap` — CAPレコードの作成・署名
//! - `POST /api/v1/decode` — レコードの検証・デコード
//! - `POST /api/v1/csr/sign` — CSRへのリモート鍵署名
//! - `GET /api/v1/signer/key-match` — リモート鍵と署名者証明書の一致確認

pub mod csr;
pub mod decode;
pub mod index;
pub mod key_match;
pub mod sign;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use axum::routing::{get, post};

use crate::config::AppState;

/// ルーターを構築する。
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/", get(index::handle_index))
        .route("/api/v1/sign/edp", post(sign::handle_sign_edp))
        .route("/api/v1/sign/cap", post(sign::handle_sign_cap))
        .route("/api/v1/decode", post(decode::handle_decode))
        .route("/api/v1/csr/sign", post(csr::handle_sign_csr))
        .route("/api/v1/signer/key-match", get(key_match::handle_key_match))
        .with_state(state)
}
