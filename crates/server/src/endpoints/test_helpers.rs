//! # エンドポイントテスト用共通ヘルパー

use std::sync::Arc;

use provenance_core::{SchemeUrls, SigningContext};
use provenance_crypto::test_support::{random_p256_key, TestPki};
use provenance_crypto::{CertificateBundle, ParsedCertificate};
use provenance_signer::InMemorySigner;
use serde_json::{json, Value};

use crate::config::AppState;

/// 署名者のメンバーURL（リーフ証明書の SubjectAltName）
pub const MEMBER: &str = "https://directory.example/member/provider";

/// リーフ鍵をインメモリ署名者に登録した状態と、そのPKIを返す。
pub fn test_state() -> (Arc<AppState>, TestPki) {
    let key = random_p256_key();
    let signer = InMemorySigner::new();
    signer.insert_p256("local", key.clone());
    let pki = TestPki::with_member(key, MEMBER);

    let urls = SchemeUrls::default();
    let state = AppState::new(
        Arc::new(signer),
        SigningContext::new("local"),
        ParsedCertificate::from_der(&pki.root).unwrap(),
        &CertificateBundle::from_pem(&pki.bundle_pem()).unwrap(),
        urls.clone(),
        vec![urls.cap_role()],
    )
    .unwrap();
    (Arc::new(state), pki)
}

/// EDPレコード作成リクエストのJSON。
pub fn edp_request_json() -> Value {
    json!({
        "from_date": "2024-01-01T00:00:00Z",
        "to_date": "2024-01-02T00:00:00Z",
        "permission_granted": "2024-01-01T00:00:00Z",
        "permission_expires": "2024-02-01T00:00:00Z",
        "service_url": "https://example.com/service",
        "account": "acc-123",
        "fapi_id": "fapi-456",
        "cap_member": MEMBER,
        "origin_url": "https://example.com/origin",
        "origin_license_url": "https://example.com/license",
    })
}
