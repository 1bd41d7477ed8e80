//! # POST /api/v1/sign/edp, POST /api/v1/sign/cap
//!
//! リクエストから来歴レコードを組み立て、リモート鍵で署名したエンコード済みレコードを返す。

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::Json;
use provenance_core::{create_cap_provenance_record, create_edp_provenance_record};
use provenance_types::{CapProvenanceRecordRequest, EdpProvenanceRecordRequest};
use serde_json::Value;

use crate::config::AppState;
use crate::error::ServerError;

/// POST /api/v1/sign/edp — EDPレコードを作成・署名する。
pub async fn handle_sign_edp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EdpProvenanceRecordRequest>,
) -> Result<Json<Value>, ServerError> {
    let record =
        create_edp_provenance_record(&state.record_signer, &state.scheme, &request).await?;
    Ok(Json(record))
}

/// POST /api/v1/sign/cap — 添付のEDPレコードを検証し、CAPレコードを作成・署名する。
pub async fn handle_sign_cap(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CapProvenanceRecordRequest>,
) -> Result<Json<Value>, ServerError> {
    let record = create_cap_provenance_record(
        &state.record_signer,
        &state.scheme,
        &state.trusted_root,
        &request,
        SystemTime::now(),
    )
    .await?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::test_helpers::{edp_request_json, test_state, MEMBER};
    use axum::http::StatusCode;
    use serde_json::json;

    fn edp_request() -> EdpProvenanceRecordRequest {
        serde_json::from_value(edp_request_json()).unwrap()
    }

    fn cap_request(edp_record: Value) -> CapProvenanceRecordRequest {
        serde_json::from_value(json!({
            "edp_data_attachment": edp_record,
            "cap_member_id": MEMBER,
            "bank_member_id": "https://directory.example/member/bank",
            "cap_account": "cap-account",
            "cap_permission_granted": "2024-01-01T00:00:00",
            "cap_permission_expires": "2024-06-01T00:00:00",
            "grid_intensity_origin": "https://api.carbonintensity.example/",
            "grid_intensity_license": "https://creativecommons.org/licenses/by/4.0/",
            "postcode": "AB1 2CD",
            "edp_service_url": "https://example.com/service",
            "edp_member_id": MEMBER,
            "bank_service_url": "https://bank.example/",
            "from_date": "2024-01-01T00:00:00Z",
            "to_date": "2024-01-02T00:00:00Z",
        }))
        .unwrap()
    }

    /// EDPレコード → CAPレコード
    #[tokio::test]
    async fn test_sign_edp_then_cap() {
        let (state, _pki) = test_state();

        let Json(edp_record) = handle_sign_edp(State(state.clone()), Json(edp_request()))
            .await
            .unwrap();
        assert_eq!(edp_record["ib1:provenance"], state.scheme.trust_framework);
        assert_eq!(edp_record["blocks"][0]["signed"]["member"], MEMBER);
        assert_eq!(edp_record["blocks"][0]["steps"].as_array().unwrap().len(), 3);

        let Json(cap_record) = handle_sign_cap(State(state), Json(cap_request(edp_record)))
            .await
            .unwrap();
        let blocks = cap_record["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["steps"].as_array().unwrap().len(), 5);
    }

    /// 期間が逆転したリクエストは400
    #[tokio::test]
    async fn test_invalid_range_is_bad_request() {
        let (state, _pki) = test_state();
        let mut request = edp_request();
        std::mem::swap(&mut request.from_date, &mut request.to_date);

        let err = handle_sign_edp(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("to_date"));
    }

    /// 改ざんされたEDPレコードからはCAPレコードを作れない
    #[tokio::test]
    async fn test_tampered_edp_record_rejected() {
        let (state, _pki) = test_state();
        let Json(mut edp_record) = handle_sign_edp(State(state.clone()), Json(edp_request()))
            .await
            .unwrap();
        edp_record["blocks"][0]["steps"][0]["account"] = json!("someone-else");

        let err = handle_sign_cap(State(state), Json(cap_request(edp_record)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    /// 証明書と異なる署名者を名乗るEDPレコードからはCAPレコードを作れない
    #[tokio::test]
    async fn test_edp_record_with_other_member_rejected() {
        let (state, _pki) = test_state();
        let Json(mut edp_record) = handle_sign_edp(State(state.clone()), Json(edp_request()))
            .await
            .unwrap();
        let victim = "https://directory.example/member/victim";
        edp_record["blocks"][0]["signed"]["member"] = json!(victim);
        let mut request = cap_request(edp_record);
        request.edp_member_id = victim.into();

        let err = handle_sign_cap(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("victim"), "{err}");
    }
}
