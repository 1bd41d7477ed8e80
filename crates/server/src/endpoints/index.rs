//! # GET /

use axum::Json;
use provenance_types::ServiceIndex;

/// GET / — サービス名と利用可能なエンドポイント。
pub async fn handle_index() -> Json<ServiceIndex> {
    Json(ServiceIndex {
        service: "provenance-signer".to_string(),
        urls: [
            "/api/v1/sign/edp",
            "/api/v1/sign/cap",
            "/api/v1/decode",
            "/api/v1/csr/sign",
            "/api/v1/signer/key-match",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let Json(index) = handle_index().await;
        assert_eq!(index.service, "provenance-signer");
        assert!(index.urls.contains(&"/api/v1/sign/edp".to_string()));
        assert_eq!(index.urls.len(), 5);
    }
}
