//! # POST /api/v1/decode

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::Json;
use provenance_core::Record;
use serde_json::Value;

use crate::config::AppState;
use crate::error::ServerError;

/// POST /api/v1/decode — レコードを検証し、署名者情報付きのステップ一覧を返す。
///
/// トラストフレームワークはレコード自身の `ib1:provenance` に従う。
pub async fn handle_decode(
    State(state): State<Arc<AppState>>,
    Json(encoded): Json<Value>,
) -> Result<Json<Vec<Value>>, ServerError> {
    let record = Record::from_self_described(&encoded)?;
    record.verify(&state.trusted_root, SystemTime::now())?;
    Ok(Json(record.decoded()))
}
