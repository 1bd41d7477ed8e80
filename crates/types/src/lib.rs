//! # Provenance Signer 共有型定義
//!
//! リモート署名（KMS）・CSR署名・来歴レコード発行で共通に使用する
//! データ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - Base64: バイナリデータ（署名、DER証明書、公開鍵等）
//! - RFC 3339: タイムスタンプ（タイムゾーンなしの入力はUTCとして扱う）

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 来歴スキームURLのデフォルト値。
pub const DEFAULT_SCHEME_URL: &str = "https://registry.core.sandbox.trust.ib1.org/scheme/perseus";

/// トラストフレームワークURLのデフォルト値。
pub const DEFAULT_TRUST_FRAMEWORK_URL: &str =
    "https://registry.core.sandbox.trust.ib1.org/trust-framework";

// ---------------------------------------------------------------------------
// 鍵・アルゴリズム
// ---------------------------------------------------------------------------

/// リモート署名者が保持する鍵への参照。
///
/// 秘密鍵そのものには決して解決されない不透明な識別子（KMSのKey ID、ARN、エイリアス等）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// 文字列から鍵識別子を作成する。
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 識別子の文字列表現を返す。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for KeyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 楕円曲線の種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    /// NIST P-256 (secp256r1)
    P256,
    /// NIST P-384 (secp384r1)
    P384,
}

impl EcCurve {
    /// 曲線の位数のバイト長（署名成分r, sの固定長）。
    pub fn scalar_len(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcCurve::P256 => f.write_str("P-256"),
            EcCurve::P384 => f.write_str("P-384"),
        }
    }
}

/// リモート署名アルゴリズム。
///
/// 文字列表現はKMSの `SigningAlgorithm` と同一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA over P-256 with SHA-256
    #[serde(rename = "ECDSA_SHA_256")]
    EcdsaSha256,
    /// ECDSA over P-384 with SHA-384
    #[serde(rename = "ECDSA_SHA_384")]
    EcdsaSha384,
}

impl SigningAlgorithm {
    /// KMS APIで使用する名前。
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlgorithm::EcdsaSha256 => "ECDSA_SHA_256",
            SigningAlgorithm::EcdsaSha384 => "ECDSA_SHA_384",
        }
    }

    /// KMS APIの名前からアルゴリズムを解決する。
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ECDSA_SHA_256" => Some(SigningAlgorithm::EcdsaSha256),
            "ECDSA_SHA_384" => Some(SigningAlgorithm::EcdsaSha384),
            _ => None,
        }
    }

    /// このアルゴリズムに必要な鍵の曲線。
    pub fn curve(self) -> EcCurve {
        match self {
            SigningAlgorithm::EcdsaSha256 => EcCurve::P256,
            SigningAlgorithm::EcdsaSha384 => EcCurve::P384,
        }
    }

    /// 署名成分（r, s）それぞれのバイト長。
    pub fn component_len(self) -> usize {
        self.curve().scalar_len()
    }

    /// ダイジェスト長（バイト）。`MessageType::Digest` 送信時の入力長。
    pub fn digest_len(self) -> usize {
        match self {
            SigningAlgorithm::EcdsaSha256 => 32,
            SigningAlgorithm::EcdsaSha384 => 48,
        }
    }

    /// X.509/PKCS#10に埋め込む署名アルゴリズムOID（ドット表記）。
    pub fn signature_oid(self) -> &'static str {
        match self {
            SigningAlgorithm::EcdsaSha256 => "1.2.840.10045.4.3.2",
            SigningAlgorithm::EcdsaSha384 => "1.2.840.10045.4.3.3",
        }
    }

    /// 来歴レコードの署名ブロックに記録するJOSE形式の名前。
    pub fn jose_name(self) -> &'static str {
        match self {
            SigningAlgorithm::EcdsaSha256 => "ES256",
            SigningAlgorithm::EcdsaSha384 => "ES384",
        }
    }

    /// JOSE形式の名前からアルゴリズムを解決する。
    pub fn from_jose_name(name: &str) -> Option<Self> {
        match name {
            "ES256" => Some(SigningAlgorithm::EcdsaSha256),
            "ES384" => Some(SigningAlgorithm::EcdsaSha384),
            _ => None,
        }
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::EcdsaSha256
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 署名対象メッセージの種別。
///
/// `Raw` の場合はリモート署名者が内部でハッシュする。呼び出し側は事前にハッシュしない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    /// 生のメッセージ
    #[default]
    #[serde(rename = "RAW")]
    Raw,
    /// ハッシュ済みダイジェスト
    #[serde(rename = "DIGEST")]
    Digest,
}

impl MessageType {
    /// KMS APIで使用する名前。
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Raw => "RAW",
            MessageType::Digest => "DIGEST",
        }
    }
}

/// リモート鍵の仕様（KMSの `KeySpec`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySpec {
    /// ECC NIST P-256
    #[serde(rename = "ECC_NIST_P256")]
    EccNistP256,
    /// ECC NIST P-384
    #[serde(rename = "ECC_NIST_P384")]
    EccNistP384,
    /// 本システムが扱わない鍵仕様（RSA、対称鍵等）
    #[serde(other)]
    Unsupported,
}

impl KeySpec {
    /// 鍵仕様に対応する曲線。未対応の鍵仕様は `None`。
    pub fn curve(self) -> Option<EcCurve> {
        match self {
            KeySpec::EccNistP256 => Some(EcCurve::P256),
            KeySpec::EccNistP384 => Some(EcCurve::P384),
            KeySpec::Unsupported => None,
        }
    }

    /// 曲線から鍵仕様を得る。
    pub fn from_curve(curve: EcCurve) -> Self {
        match curve {
            EcCurve::P256 => KeySpec::EccNistP256,
            EcCurve::P384 => KeySpec::EccNistP384,
        }
    }
}

/// リモート鍵の用途（KMSの `KeyUsage`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyUsage {
    /// 署名・検証
    #[serde(rename = "SIGN_VERIFY")]
    SignVerify,
    /// 暗号化・復号
    #[serde(rename = "ENCRYPT_DECRYPT")]
    EncryptDecrypt,
    /// その他の用途
    #[serde(other)]
    Other,
}

/// リモート署名者が報告する公開鍵情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyInfo {
    /// 鍵識別子
    pub key_id: KeyId,
    /// 鍵仕様
    pub key_spec: KeySpec,
    /// 鍵用途
    pub key_usage: KeyUsage,
    /// この鍵で利用可能な署名アルゴリズム
    pub signing_algorithms: Vec<SigningAlgorithm>,
    /// SubjectPublicKeyInfo（DER）
    pub public_key_der: Vec<u8>,
}

impl PublicKeyInfo {
    /// 指定アルゴリズムでの署名に使用できる鍵かどうか。
    ///
    /// `KeyUsage=SIGN_VERIFY` かつ鍵の曲線がアルゴリズムと一致し、
    /// 利用可能アルゴリズムに含まれている必要がある。
    pub fn supports(&self, algorithm: SigningAlgorithm) -> bool {
        self.key_usage == KeyUsage::SignVerify
            && self.key_spec.curve() == Some(algorithm.curve())
            && self.signing_algorithms.contains(&algorithm)
    }
}

/// 署名ブロックに記録される署名者の識別情報。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerIdentity {
    /// トラストフレームワーク上のメンバーURL
    pub member: String,
    /// メンバーのロールURL一覧
    pub roles: Vec<String>,
}

// ---------------------------------------------------------------------------
// 来歴レコード リクエスト
// ---------------------------------------------------------------------------

/// リクエストの入力検証エラー。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// 期間の終了が開始以前
    #[error("{end} must be after {start}")]
    InvalidRange {
        /// 開始側フィールド名
        start: &'static str,
        /// 終了側フィールド名
        end: &'static str,
    },
    /// 必須フィールドが空
    #[error("field '{0}' must not be empty")]
    Empty(&'static str),
}

fn ensure_after(
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    start_name: &'static str,
    end_name: &'static str,
) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::InvalidRange {
            start: start_name,
            end: end_name,
        });
    }
    Ok(())
}

fn ensure_not_empty(value: &str, name: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(name));
    }
    Ok(())
}

/// EDP（エネルギーデータ提供者）来歴レコードの作成リクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdpProvenanceRecordRequest {
    /// データ期間の開始
    #[serde(with = "flexible_datetime")]
    pub from_date: DateTime<Utc>,
    /// データ期間の終了
    #[serde(with = "flexible_datetime")]
    pub to_date: DateTime<Utc>,
    /// 許諾の付与日時
    #[serde(with = "flexible_datetime")]
    pub permission_granted: DateTime<Utc>,
    /// 許諾の失効日時
    #[serde(with = "flexible_datetime")]
    pub permission_expires: DateTime<Utc>,
    /// データアクセス用サービスURL
    pub service_url: String,
    /// アカウント識別子
    pub account: String,
    /// FAPIトランザクションID
    pub fapi_id: String,
    /// 転送先CAPメンバー
    pub cap_member: String,
    /// データのオリジンURL
    pub origin_url: String,
    /// オリジンのライセンスURL
    pub origin_license_url: String,
}

impl EdpProvenanceRecordRequest {
    /// 期間・必須フィールドの整合性を検証する。
    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_after(&self.from_date, &self.to_date, "from_date", "to_date")?;
        ensure_after(
            &self.permission_granted,
            &self.permission_expires,
            "permission_granted",
            "permission_expires",
        )?;
        ensure_not_empty(&self.account, "account")?;
        ensure_not_empty(&self.cap_member, "cap_member")?;
        ensure_not_empty(&self.fapi_id, "fapi_id")?;
        Ok(())
    }
}

/// CAP（カーボン会計プロバイダ）来歴レコードの作成リクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapProvenanceRecordRequest {
    /// EDPが発行した来歴レコード（エンコード済み）
    pub edp_data_attachment: serde_json::Value,
    /// CAPメンバー識別子
    pub cap_member_id: String,
    /// 銀行メンバー識別子
    pub bank_member_id: String,
    /// CAPアカウント識別子
    pub cap_account: String,
    /// CAPへの許諾の付与日時
    #[serde(with = "flexible_datetime")]
    pub cap_permission_granted: DateTime<Utc>,
    /// CAPへの許諾の失効日時
    #[serde(with = "flexible_datetime")]
    pub cap_permission_expires: DateTime<Utc>,
    /// グリッド炭素強度データのオリジンURL
    pub grid_intensity_origin: String,
    /// グリッド炭素強度データのライセンスURL
    pub grid_intensity_license: String,
    /// グリッド炭素強度データの郵便番号
    pub postcode: String,
    /// EDPのメーター読み取りサービスURL
    pub edp_service_url: String,
    /// EDPメンバー識別子
    pub edp_member_id: String,
    /// 銀行の排出量レポート受付サービスURL
    pub bank_service_url: String,
    /// データ期間の開始
    #[serde(with = "flexible_datetime")]
    pub from_date: DateTime<Utc>,
    /// データ期間の終了
    #[serde(with = "flexible_datetime")]
    pub to_date: DateTime<Utc>,
}

impl CapProvenanceRecordRequest {
    /// 期間・必須フィールドの整合性を検証する。
    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_after(&self.from_date, &self.to_date, "from_date", "to_date")?;
        ensure_after(
            &self.cap_permission_granted,
            &self.cap_permission_expires,
            "cap_permission_granted",
            "cap_permission_expires",
        )?;
        ensure_not_empty(&self.cap_member_id, "cap_member_id")?;
        ensure_not_empty(&self.bank_member_id, "bank_member_id")?;
        ensure_not_empty(&self.edp_member_id, "edp_member_id")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

/// GET / レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIndex {
    /// サービス名
    pub service: String,
    /// 公開エンドポイント
    pub urls: Vec<String>,
}

/// POST /api/v1/csr/sign リクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrSignRequest {
    /// PEMエンコードされたCSR（署名済み・未署名テンプレートいずれも可）
    pub csr_pem: String,
}

/// POST /api/v1/csr/sign レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrSignResponse {
    /// PEMエンコードされた署名済みCSR
    pub csr_pem: String,
    /// 埋め込まれた署名アルゴリズムOID
    pub signature_algorithm: String,
}

/// GET /api/v1/signer/key-match レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMatchReport {
    /// 鍵識別子
    pub key_id: String,
    /// 署名者証明書のSubject
    pub certificate_subject: String,
    /// 証明書公開鍵のSHA-256フィンガープリント（hex）
    pub certificate_key_fingerprint: String,
    /// リモート鍵公開鍵のSHA-256フィンガープリント（hex）
    pub signer_key_fingerprint: String,
    /// 証明書と鍵が一致しない場合 true
    pub key_mismatch: bool,
}

// ---------------------------------------------------------------------------
// タイムスタンプ
// ---------------------------------------------------------------------------

/// RFC 3339 とタイムゾーンなしISO-8601の両方を受け付けるserdeヘルパー。
///
/// タイムゾーンなしの値はUTCとして解釈する。出力は常にRFC 3339（UTC）。
pub mod flexible_datetime {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// 文字列をUTC日時に変換する。
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("timestamp must be in ISO format: {raw}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edp_json() -> serde_json::Value {
        serde_json::json!({
            "from_date": "2025-09-20T10:00:00",
            "to_date": "2025-10-19T10:00:00Z",
            "permission_granted": "2025-09-19T10:00:00+00:00",
            "permission_expires": "2025-11-19T10:00:00",
            "service_url": "https://api.example.com",
            "account": "test-account-123",
            "fapi_id": "fapi-transaction-456",
            "cap_member": "cap-member-789",
            "origin_url": "https://www.smartdcc.co.uk/",
            "origin_license_url": "https://example.com/licence",
        })
    }

    /// タイムゾーンあり・なしの混在した日時を受け付けることを確認
    #[test]
    fn test_edp_request_accepts_naive_and_rfc3339() {
        let req: EdpProvenanceRecordRequest = serde_json::from_value(edp_json()).unwrap();
        assert_eq!(
            req.from_date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2025-09-20T10:00:00Z"
        );
        assert!(req.validate().is_ok());
    }

    /// 期間の逆転が検証エラーになることを確認
    #[test]
    fn test_edp_request_rejects_inverted_range() {
        let mut value = edp_json();
        value["to_date"] = serde_json::json!("2025-09-01T00:00:00Z");
        let req: EdpProvenanceRecordRequest = serde_json::from_value(value).unwrap();
        assert_eq!(
            req.validate(),
            Err(ValidationError::InvalidRange {
                start: "from_date",
                end: "to_date"
            })
        );
    }

    /// ISO形式でない日時はデシリアライズに失敗する
    #[test]
    fn test_rejects_non_iso_timestamp() {
        let mut value = edp_json();
        value["from_date"] = serde_json::json!("20/09/2025");
        assert!(serde_json::from_value::<EdpProvenanceRecordRequest>(value).is_err());
    }

    /// KMSの名前との相互変換
    #[test]
    fn test_signing_algorithm_names() {
        let alg: SigningAlgorithm = serde_json::from_str("\"ECDSA_SHA_256\"").unwrap();
        assert_eq!(alg, SigningAlgorithm::EcdsaSha256);
        assert_eq!(alg.component_len(), 32);
        assert_eq!(alg.signature_oid(), "1.2.840.10045.4.3.2");
        assert_eq!(SigningAlgorithm::from_name("ECDSA_SHA_384"), Some(SigningAlgorithm::EcdsaSha384));
        assert_eq!(SigningAlgorithm::from_name("RSASSA_PSS_SHA_256"), None);
    }

    /// 未知のKeySpecはUnsupportedとして読み込まれる
    #[test]
    fn test_unknown_key_spec_is_unsupported() {
        let spec: KeySpec = serde_json::from_str("\"RSA_2048\"").unwrap();
        assert_eq!(spec, KeySpec::Unsupported);
        assert_eq!(spec.curve(), None);
    }

    /// 鍵用途・曲線・アルゴリズムが揃った場合のみ署名可能と判定する
    #[test]
    fn test_public_key_info_supports() {
        let info = PublicKeyInfo {
            key_id: KeyId::new("alias/test"),
            key_spec: KeySpec::EccNistP256,
            key_usage: KeyUsage::SignVerify,
            signing_algorithms: vec![SigningAlgorithm::EcdsaSha256],
            public_key_der: vec![],
        };
        assert!(info.supports(SigningAlgorithm::EcdsaSha256));
        assert!(!info.supports(SigningAlgorithm::EcdsaSha384));

        let encrypt_only = PublicKeyInfo {
            key_usage: KeyUsage::EncryptDecrypt,
            ..info
        };
        assert!(!encrypt_only.supports(SigningAlgorithm::EcdsaSha256));
    }
}
