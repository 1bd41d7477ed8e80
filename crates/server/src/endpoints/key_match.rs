//! # GET /api/v1/signer/key-match
//!
//! 診断用。リモート鍵と署名者のリーフ証明書の鍵を比較する。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use provenance_crypto::keymatch;
use provenance_signer::RemoteSigner;
use provenance_types::KeyMatchReport;

use crate::config::AppState;
use crate::error::ServerError;

/// GET /api/v1/signer/key-match — 鍵の一致状況を返す。不一致でも200を返す。
pub async fn handle_key_match(
    State(state): State<Arc<AppState>>,
) -> Result<Json<KeyMatchReport>, ServerError> {
    let ctx = state.context();
    let info = state.assembler().signer().get_public_key(&ctx.key_id).await?;
    let comparison = keymatch::compare(&state.signer_certificate, &info.public_key_der)
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(Json(KeyMatchReport {
        key_id: info.key_id.to_string(),
        certificate_subject: comparison.subject,
        certificate_key_fingerprint: comparison.certificate_fingerprint,
        signer_key_fingerprint: comparison.signer_fingerprint,
        key_mismatch: !comparison.matches,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::test_helpers::test_state;

    #[tokio::test]
    async fn test_key_match_report() {
        let (state, _pki) = test_state();
        let Json(report) = handle_key_match(State(state)).await.unwrap();
        assert!(!report.key_mismatch);
        assert_eq!(report.certificate_subject, "CN=Test Leaf");
        assert_eq!(report.certificate_key_fingerprint, report.signer_key_fingerprint);
    }
}
