//! # スキームのレコード生成
//!
//! Perseusスキームの来歴レコードを組み立てて署名する。
//!
//! - EDP（エネルギーデータ提供者）: 同意 → 計測データの発生 → CAPへの転送
//! - CAP（炭素会計提供者）: EDPレコードを検証し、EDPからの転送を受領 →
//!   同意 → 系統炭素強度データの発生 → 排出量計算 → 銀行への転送
//!
//! ライセンス・標準・プロセスのURLはスキームURLから導出する。

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use provenance_crypto::ParsedCertificate;
use provenance_types::{
    CapProvenanceRecordRequest, EdpProvenanceRecordRequest, DEFAULT_SCHEME_URL,
    DEFAULT_TRUST_FRAMEWORK_URL,
};
use serde_json::{json, Value};

use crate::record::{Record, RecordError, RecordSigner, SIGNATURE_KEY};

/// スキームとトラストフレームワークのURL。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeUrls {
    /// スキームURL（例: `https://registry.core.sandbox.trust.ib1.org/scheme/perseus`）
    pub scheme: String,
    /// トラストフレームワークURL
    pub trust_framework: String,
}

impl Default for SchemeUrls {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME_URL.to_string(),
            trust_framework: DEFAULT_TRUST_FRAMEWORK_URL.to_string(),
        }
    }
}

impl SchemeUrls {
    fn energy_consumption_licence(&self) -> String {
        format!("{}/licence/energy-consumption-data/2024-12-05", self.scheme)
    }

    fn energy_consumption_standard(&self) -> String {
        format!("{}/standard/energy-consumption-data/2024-12-05", self.scheme)
    }

    fn emissions_process(&self) -> String {
        format!("{}/process/emissions-calculations/2024-12-05", self.scheme)
    }

    /// CAPのロールURL。
    pub fn cap_role(&self) -> String {
        format!("{}/role/carbon-accounting-provider", self.scheme)
    }
}

/// ステップに記録する時刻（秒精度、UTC）。
fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// EDPの来歴レコードを作成・署名し、エンコード済みレコードを返す。
pub async fn create_edp_provenance_record(
    signer: &RecordSigner,
    urls: &SchemeUrls,
    request: &EdpProvenanceRecordRequest,
) -> Result<Value, RecordError> {
    request.validate()?;
    let scheme = &urls.scheme;
    let from = timestamp(&request.from_date);
    let to = timestamp(&request.to_date);

    let mut record = Record::new(&urls.trust_framework);

    // エンドユーザーの同意
    let permission_id = record.add_step(json!({
        "type": "permission",
        "scheme": scheme,
        "timestamp": timestamp(&request.permission_granted),
        "account": request.account,
        "allows": { "licences": [urls.energy_consumption_licence()] },
        "expires": timestamp(&request.permission_expires),
    }))?;

    let origin_id = record.add_step(json!({
        "type": "origin",
        "scheme": scheme,
        "sourceType": format!("{scheme}/source-type/Meter"),
        "origin": request.origin_url,
        "originLicence": request.origin_license_url,
        "external": true,
        "permissions": [permission_id],
        "perseus:scheme": { "meteringPeriod": { "from": from, "to": to } },
        "perseus:assurance": {
            "dataSource": format!("{scheme}/assurance/data-source/SmartMeter"),
        },
    }))?;

    // CAPへの転送
    record.add_step(json!({
        "type": "transfer",
        "scheme": scheme,
        "of": origin_id,
        "to": request.cap_member,
        "standard": urls.energy_consumption_standard(),
        "licence": urls.energy_consumption_licence(),
        "service": request.service_url,
        "path": "/readings",
        "parameters": { "measure": "import", "from": from, "to": to },
        "permissions": [permission_id],
        "transaction": request.fapi_id,
    }))?;

    let signed = record.sign(signer).await?;
    tracing::info!(account = %request.account, cap = %request.cap_member, "EDPレコードを作成しました");
    signed.encoded()
}

/// EDPレコードを検証し、CAPの処理ステップを追加・署名したレコードを返す。
pub async fn create_cap_provenance_record(
    signer: &RecordSigner,
    urls: &SchemeUrls,
    trusted_root: &ParsedCertificate,
    request: &CapProvenanceRecordRequest,
    at: SystemTime,
) -> Result<Value, RecordError> {
    request.validate()?;
    let scheme = &urls.scheme;
    let from = timestamp(&request.from_date);
    let to = timestamp(&request.to_date);

    let mut record = Record::from_encoded(&urls.trust_framework, &request.edp_data_attachment)?;
    tracing::debug!(blocks = record.blocks().len(), "EDPレコードを読み込みました");
    record.verify(trusted_root, at)?;

    let transfer = record.find_step(&json!({
        "type": "transfer",
        "scheme": scheme,
        "to": request.cap_member_id,
        "standard": urls.energy_consumption_standard(),
        "licence": urls.energy_consumption_licence(),
        "service": request.edp_service_url,
        "path": "/readings",
        "parameters": { "measure": "import", "from": from, "to": to },
        SIGNATURE_KEY: {
            "signed": { "member": request.edp_member_id, "roles": [urls.cap_role()] },
        },
    }))?;
    let transfer_id = transfer
        .get("id")
        .cloned()
        .ok_or_else(|| RecordError::InvalidStep("転送ステップにIDがありません".into()))?;

    let receipt_id = record.add_step(json!({ "type": "receipt", "transfer": transfer_id }))?;

    let permission_id = record.add_step(json!({
        "type": "permission",
        "scheme": scheme,
        "timestamp": timestamp(&request.cap_permission_granted),
        "account": request.cap_account,
        "allows": {
            "licenses": [format!("{scheme}/license/emissions-report/2024-12-05")],
            "processes": [urls.emissions_process()],
        },
        "expires": timestamp(&request.cap_permission_expires),
    }))?;

    let intensity_id = record.add_step(json!({
        "type": "origin",
        "scheme": scheme,
        "sourceType": format!("{scheme}/source-type/GridCarbonIntensity"),
        "origin": request.grid_intensity_origin,
        "originLicense": request.grid_intensity_license,
        "external": true,
        "perseus:scheme": {
            "meteringPeriod": { "from": from, "to": to },
            "postcode": request.postcode,
        },
        "perseus:assurance": {
            "missingData": format!("{scheme}/assurance/missing-data/Complete"),
        },
    }))?;

    let process_id = record.add_step(json!({
        "type": "process",
        "scheme": scheme,
        "inputs": [receipt_id, intensity_id],
        "process": urls.emissions_process(),
        "permissions": [permission_id],
        "perseus:assurance": {
            "missingData": format!("{scheme}/assurance/missing-data/Substituted"),
        },
    }))?;

    // 銀行への転送
    record.add_step(json!({
        "type": "transfer",
        "scheme": scheme,
        "of": process_id,
        "to": request.bank_member_id,
        "standard": format!("{scheme}/standard/emissions-report/2024-12-05"),
        "licence": format!("{scheme}/licence/emissions-report/2024-12-05"),
        "service": request.bank_service_url,
        "path": "/emissions",
        "parameters": { "from": from, "to": to },
        "permissions": [permission_id],
    }))?;

    let signed = record.sign(signer).await?;
    tracing::info!(
        cap = %request.cap_member_id,
        bank = %request.bank_member_id,
        "CAPレコードを作成しました"
    );
    signed.encoded()
}
