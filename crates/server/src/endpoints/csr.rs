//! # POST /api/v1/csr/sign
//!
//! PEMのCSRを受け取り、CertificationRequestInfoをそのままにリモート鍵で署名し直したCSRを返す。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use provenance_crypto::asn1;
use provenance_types::{CsrSignRequest, CsrSignResponse};

use crate::config::AppState;
use crate::error::ServerError;

/// POST /api/v1/csr/sign — CSRにリモート鍵で署名する。
pub async fn handle_sign_csr(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CsrSignRequest>,
) -> Result<Json<CsrSignResponse>, ServerError> {
    let csr_der = asn1::csr_from_pem(&request.csr_pem)
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let ctx = state.context();
    let signed = state.assembler().sign_csr(ctx, &csr_der).await?;
    let csr_pem = asn1::csr_to_pem(&signed).map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(Json(CsrSignResponse {
        csr_pem,
        signature_algorithm: ctx.algorithm.as_str().to_string(),
    }))
}
