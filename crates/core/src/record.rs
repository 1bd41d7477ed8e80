//! # 来歴レコード
//!
//! トラストフレームワークURLと署名ブロックの列からなるレコード。
//! 各ブロックは前回の署名以降に追加されたステップ、署名者の識別情報、
//! 署名者の証明書チェーン（Base64 DER、リーフが先頭）、署名アルゴリズム（JOSE名）と
//! 署名値を持つ。
//!
//! 署名者の `member` はリーフ証明書から決まる（SubjectAltName のURI、なければSubject）。
//! 検証時もリーフ証明書と照合するため、他者の `member` を名乗ったブロックは拒否される。
//!
//! ## 署名対象
//! ブロックの署名対象は次のオブジェクトをキー順に並べたコンパクトなJSONである。
//! ```text
//! { "ib1:provenance": <url>, "previous": <直前ブロックの署名 | null>,
//!   "signed": <署名者>, "steps": [...] }
//! ```
//! `previous` により、ブロックの並び替え・削除は検証で検出される。

use std::time::SystemTime;

use base64::Engine;
use provenance_crypto::{build_chain, CertificateBundle, ChainError, KeyError, ParsedCertificate};
use provenance_types::{SignerIdentity, SigningAlgorithm};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assembler::{AssemblerError, SignatureAssembler, SigningContext};

/// トラストフレームワークURLを格納するキー。
pub const TRUST_FRAMEWORK_KEY: &str = "ib1:provenance";

/// デコード結果で各ステップに付与される署名情報のキー。
pub const SIGNATURE_KEY: &str = "_signature";

/// 来歴レコードのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// ステップが不正
    #[error("ステップが不正です: {0}")]
    InvalidStep(String),
    /// エンコード済みレコードの構造が不正
    #[error("レコードの形式が不正です: {0}")]
    Malformed(String),
    /// トラストフレームワークが一致しない
    #[error("トラストフレームワークが一致しません: 期待値 {expected}, 実際 {actual}")]
    TrustFrameworkMismatch {
        /// 期待したURL
        expected: String,
        /// レコードのURL
        actual: String,
    },
    /// 未署名のステップが残っている
    #[error("未署名のステップが {0} 件あります")]
    PendingSteps(usize),
    /// 署名するステップがない
    #[error("署名するステップがありません")]
    NothingToSign,
    /// 署名者の証明書がない
    #[error("署名者の証明書チェーンが空です")]
    NoCertificates,
    /// 署名者のリーフ証明書を読み取れない
    #[error("署名者の証明書を読み取れません: {0}")]
    SignerCertificate(#[source] ChainError),
    /// ブロックの署名者がリーフ証明書の識別子と一致しない
    #[error("ブロック {block} の署名者 {claimed} は証明書の識別子 {certificate} と一致しません")]
    IdentityMismatch {
        /// ブロック番号
        block: usize,
        /// ブロックに記録された署名者
        claimed: String,
        /// リーフ証明書の識別子
        certificate: String,
    },
    /// 署名者の証明書チェーンが不正
    #[error("ブロック {block} の証明書チェーンが不正です: {source}")]
    Chain {
        /// ブロック番号
        block: usize,
        /// 原因
        #[source]
        source: ChainError,
    },
    /// ブロックの署名が不正
    #[error("ブロック {block} の署名を {subject} の鍵で検証できません: {reason}")]
    InvalidSignature {
        /// ブロック番号
        block: usize,
        /// 署名者証明書のSubject
        subject: String,
        /// 詳細
        reason: String,
    },
    /// 条件に一致するステップがない
    #[error("条件に一致するステップがありません: {0}")]
    StepNotFound(String),
    /// 条件に一致するステップが複数ある
    #[error("条件に一致するステップが {0} 件あります")]
    AmbiguousStep(usize),
    /// 署名の失敗
    #[error(transparent)]
    Assembler(#[from] AssemblerError),
    /// JSONの処理に失敗
    #[error("JSONの処理に失敗: {0}")]
    Json(#[from] serde_json::Error),
    /// リクエストの入力検証エラー
    #[error(transparent)]
    Validation(#[from] provenance_types::ValidationError),
}

/// 署名済みブロック。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBlock {
    /// このブロックで追加されたステップ
    pub steps: Vec<Value>,
    /// 署名者
    pub signed: SignerIdentity,
    /// 署名者の証明書チェーン（Base64 DER、リーフが先頭）
    pub certificates: Vec<String>,
    /// 署名アルゴリズム（`ES256` / `ES384`）
    pub alg: String,
    /// 署名値（Base64 DER）
    pub signature: String,
}

/// エンコード済みレコード（JSON表現）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRecord {
    /// トラストフレームワークURL
    #[serde(rename = "ib1:provenance")]
    pub trust_framework: String,
    /// 署名済みブロック
    pub blocks: Vec<SignedBlock>,
}

/// レコードに署名するための鍵・署名者情報・証明書チェーン。
#[derive(Clone)]
pub struct RecordSigner {
    assembler: SignatureAssembler,
    context: SigningContext,
    identity: SignerIdentity,
    certificates: Vec<Vec<u8>>,
}

impl RecordSigner {
    /// 署名者を作成する。`certificates` はリーフを先頭とするDERの列。
    ///
    /// 署名者の `member` はリーフ証明書の識別子（[`ParsedCertificate::member_id`]）になる。
    pub fn new(
        assembler: SignatureAssembler,
        context: SigningContext,
        roles: Vec<String>,
        certificates: Vec<Vec<u8>>,
    ) -> Result<Self, RecordError> {
        let leaf = certificates.first().ok_or(RecordError::NoCertificates)?;
        let member = ParsedCertificate::from_der(leaf)
            .and_then(|leaf| leaf.member_id())
            .map_err(RecordError::SignerCertificate)?;
        let identity = SignerIdentity { member, roles };
        Ok(Self {
            assembler,
            context,
            identity,
            certificates,
        })
    }

    /// 署名アセンブラ。
    pub fn assembler(&self) -> &SignatureAssembler {
        &self.assembler
    }

    /// 署名コンテキスト。
    pub fn context(&self) -> &SigningContext {
        &self.context
    }

    /// 署名者の識別情報。
    pub fn identity(&self) -> &SignerIdentity {
        &self.identity
    }
}

/// 来歴レコード。
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    trust_framework: String,
    blocks: Vec<SignedBlock>,
    pending: Vec<Value>,
}

impl Record {
    /// 空のレコードを作成する。
    pub fn new(trust_framework: impl Into<String>) -> Self {
        Self {
            trust_framework: trust_framework.into(),
            blocks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// エンコード済みレコードから作成する。トラストフレームワークが異なる場合はエラー。
    pub fn from_encoded(trust_framework: &str, encoded: &Value) -> Result<Self, RecordError> {
        let encoded: EncodedRecord = serde_json::from_value(encoded.clone())
            .map_err(|e| RecordError::Malformed(e.to_string()))?;
        if encoded.trust_framework != trust_framework {
            return Err(RecordError::TrustFrameworkMismatch {
                expected: trust_framework.to_string(),
                actual: encoded.trust_framework,
            });
        }
        Ok(Self {
            trust_framework: encoded.trust_framework,
            blocks: encoded.blocks,
            pending: Vec::new(),
        })
    }

    /// エンコード済みレコード自身が宣言するトラストフレームワークで作成する。
    pub fn from_self_described(encoded: &Value) -> Result<Self, RecordError> {
        let trust_framework = encoded
            .get(TRUST_FRAMEWORK_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| RecordError::Malformed(format!("'{TRUST_FRAMEWORK_KEY}' がありません")))?
            .to_string();
        Self::from_encoded(&trust_framework, encoded)
    }

    /// トラストフレームワークURL。
    pub fn trust_framework(&self) -> &str {
        &self.trust_framework
    }

    /// 署名済みブロック。
    pub fn blocks(&self) -> &[SignedBlock] {
        &self.blocks
    }

    /// 未署名のステップ。
    pub fn pending_steps(&self) -> &[Value] {
        &self.pending
    }

    /// ステップを追加し、生成したIDを返す。
    ///
    /// ステップは文字列の `type` を持つJSONオブジェクトでなければならない。
    pub fn add_step(&mut self, step: Value) -> Result<String, RecordError> {
        let Value::Object(mut step) = step else {
            return Err(RecordError::InvalidStep("ステップはオブジェクトである必要があります".into()));
        };
        match step.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => {}
            _ => return Err(RecordError::InvalidStep("'type' がありません".into())),
        }
        let id = uuid::Uuid::new_v4().to_string();
        step.insert("id".into(), Value::String(id.clone()));
        self.pending.push(Value::Object(step));
        Ok(id)
    }

    /// 未署名のステップを新しい署名ブロックにまとめたレコードを返す。
    pub async fn sign(&self, signer: &RecordSigner) -> Result<Record, RecordError> {
        if self.pending.is_empty() {
            return Err(RecordError::NothingToSign);
        }

        let previous = self.blocks.last().map(|b| b.signature.as_str());
        let input = signing_input(&self.trust_framework, previous, &signer.identity, &self.pending);
        let signature = signer
            .assembler
            .sign_payload(&signer.context, input.as_bytes())
            .await?;

        let b64 = base64::engine::general_purpose::STANDARD;
        let block = SignedBlock {
            steps: self.pending.clone(),
            signed: signer.identity.clone(),
            certificates: signer.certificates.iter().map(|c| b64.encode(c)).collect(),
            alg: signature.algorithm.jose_name().to_string(),
            signature: b64.encode(&signature.der),
        };

        tracing::info!(
            member = %signer.identity.member,
            steps = block.steps.len(),
            block = self.blocks.len(),
            "来歴レコードに署名しました"
        );

        let mut blocks = self.blocks.clone();
        blocks.push(block);
        Ok(Record {
            trust_framework: self.trust_framework.clone(),
            blocks,
            pending: Vec::new(),
        })
    }

    /// すべてのブロックについて、証明書チェーンを `trusted_root` まで検証し、
    /// 署名者がリーフ証明書の識別子と一致することを確認してから、
    /// 記録されたアルゴリズムとリーフ証明書の鍵で署名を検証する。
    pub fn verify(&self, trusted_root: &ParsedCertificate, at: SystemTime) -> Result<(), RecordError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let mut previous: Option<&str> = None;

        for (index, block) in self.blocks.iter().enumerate() {
            let ders = block
                .certificates
                .iter()
                .map(|c| b64.decode(c))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RecordError::Malformed(format!("ブロック {index} の証明書: {e}")))?;
            let bundle = CertificateBundle::from_der_list(ders)
                .map_err(|source| RecordError::Chain { block: index, source })?;
            let chain = build_chain(&bundle, trusted_root, at)
                .map_err(|source| RecordError::Chain { block: index, source })?;

            let leaf = chain.leaf();
            let certified = leaf
                .member_id()
                .map_err(|source| RecordError::Chain { block: index, source })?;
            if block.signed.member != certified {
                tracing::warn!(
                    block = index,
                    claimed = %block.signed.member,
                    certificate = %certified,
                    "署名者が証明書と一致しません"
                );
                return Err(RecordError::IdentityMismatch {
                    block: index,
                    claimed: block.signed.member.clone(),
                    certificate: certified,
                });
            }

            let invalid = |reason: String| RecordError::InvalidSignature {
                block: index,
                subject: leaf.subject().to_string(),
                reason,
            };
            let key = leaf
                .public_key()
                .map_err(|source| RecordError::Chain { block: index, source })?;
            let algorithm = SigningAlgorithm::from_jose_name(&block.alg)
                .ok_or_else(|| invalid(format!("対応していない署名アルゴリズムです: {}", block.alg)))?;
            key.ensure_algorithm(algorithm)
                .map_err(|e: KeyError| invalid(e.to_string()))?;
            let signature = b64
                .decode(&block.signature)
                .map_err(|e| invalid(format!("署名のBase64デコードに失敗: {e}")))?;
            let input = signing_input(&self.trust_framework, previous, &block.signed, &block.steps);
            key.verify(algorithm, input.as_bytes(), &signature)
                .map_err(|e: KeyError| invalid(e.to_string()))?;

            tracing::debug!(block = index, subject = %leaf.subject(), "ブロックの署名を検証しました");
            previous = Some(block.signature.as_str());
        }
        Ok(())
    }

    /// 全ステップを、署名ブロックの情報（`_signature`）を付けて返す。
    ///
    /// 未署名のステップには `_signature` が付かない。
    pub fn decoded(&self) -> Vec<Value> {
        let mut steps = Vec::new();
        for block in &self.blocks {
            let signature = serde_json::json!({ "signed": block.signed });
            for step in &block.steps {
                let mut step = step.clone();
                if let Value::Object(map) = &mut step {
                    map.insert(SIGNATURE_KEY.into(), signature.clone());
                }
                steps.push(step);
            }
        }
        steps.extend(self.pending.iter().cloned());
        steps
    }

    /// 条件に部分一致するステップを1件だけ探す。
    ///
    /// 条件のオブジェクトは含まれるキーだけを比較し、配列は条件の各要素が
    /// 対象配列のいずれかの要素に一致すればよい。`_signature` を条件に含めると
    /// ステップを含むブロックの署名者で絞り込める。
    pub fn find_step(&self, criteria: &Value) -> Result<Value, RecordError> {
        let mut found: Vec<Value> = self
            .decoded()
            .into_iter()
            .filter(|step| partial_match(criteria, step))
            .collect();
        match found.len() {
            0 => Err(RecordError::StepNotFound(criteria.to_string())),
            1 => Ok(found.remove(0)),
            n => Err(RecordError::AmbiguousStep(n)),
        }
    }

    /// JSON表現に変換する。未署名のステップがある場合はエラー。
    pub fn encoded(&self) -> Result<Value, RecordError> {
        if !self.pending.is_empty() {
            return Err(RecordError::PendingSteps(self.pending.len()));
        }
        Ok(serde_json::to_value(EncodedRecord {
            trust_framework: self.trust_framework.clone(),
            blocks: self.blocks.clone(),
        })?)
    }
}

/// ブロックの署名対象（正規化JSON）。
fn signing_input(
    trust_framework: &str,
    previous: Option<&str>,
    signed: &SignerIdentity,
    steps: &[Value],
) -> String {
    let mut object = Map::new();
    object.insert(TRUST_FRAMEWORK_KEY.into(), Value::String(trust_framework.into()));
    object.insert(
        "previous".into(),
        previous.map_or(Value::Null, |p| Value::String(p.into())),
    );
    object.insert(
        "signed".into(),
        serde_json::json!({ "member": signed.member, "roles": signed.roles }),
    );
    object.insert("steps".into(), Value::Array(steps.to_vec()));

    let mut out = String::new();
    write_canonical(&Value::Object(object), &mut out);
    out
}

/// キーを辞書順に並べ、空白を入れずに書き出す。
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn partial_match(criteria: &Value, candidate: &Value) -> bool {
    match (criteria, candidate) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|h| partial_match(v, h))),
        (Value::Array(want), Value::Array(have)) => want
            .iter()
            .all(|w| have.iter().any(|h| partial_match(w, h))),
        (want, have) => want == have,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use provenance_crypto::test_support::{random_p256_key, TestPki};
    use provenance_signer::InMemorySigner;
    use serde_json::json;

    const FRAMEWORK: &str = "https://registry.example/trust-framework";
    const MEMBER: &str = "https://registry.example/member/edp";
    const ROLE: &str = "https://registry.example/scheme/role/edp";

    fn signer_for(pki: &TestPki) -> RecordSigner {
        let signer = InMemorySigner::new();
        signer.insert_p256("leaf", pki.leaf_key.clone());
        RecordSigner::new(
            SignatureAssembler::new(Arc::new(signer)),
            SigningContext::new("leaf"),
            vec![ROLE.into()],
            vec![pki.leaf.clone(), pki.intermediate.clone()],
        )
        .unwrap()
    }

    /// リーフ鍵をリモート鍵とし、リーフのSubjectAltNameが `MEMBER` のPKIと署名者
    fn fixture() -> (TestPki, RecordSigner) {
        let pki = TestPki::with_member(random_p256_key(), MEMBER);
        let signer = signer_for(&pki);
        (pki, signer)
    }

    fn root(pki: &TestPki) -> ParsedCertificate {
        ParsedCertificate::from_der(&pki.root).unwrap()
    }

    #[tokio::test]
    async fn test_sign_verify_decode() {
        let (pki, signer) = fixture();
        let mut record = Record::new(FRAMEWORK);
        let origin = record.add_step(json!({ "type": "origin", "origin": "meter" })).unwrap();
        record
            .add_step(json!({ "type": "transfer", "of": origin, "to": "cap" }))
            .unwrap();

        let signed = record.sign(&signer).await.unwrap();
        assert_eq!(signed.blocks()[0].alg, "ES256");
        signed.verify(&root(&pki), SystemTime::now()).unwrap();

        let decoded = signed.decoded();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0]["id"], origin);
        assert_eq!(decoded[1][SIGNATURE_KEY]["signed"]["member"], MEMBER);

        let encoded = signed.encoded().unwrap();
        assert_eq!(encoded[TRUST_FRAMEWORK_KEY], FRAMEWORK);
        let reloaded = Record::from_encoded(FRAMEWORK, &encoded).unwrap();
        reloaded.verify(&root(&pki), SystemTime::now()).unwrap();
    }

    /// 署名者の `member` はリーフ証明書のURI、URIがなければSubject
    #[test]
    fn test_signer_member_comes_from_certificate() {
        let (_, signer) = fixture();
        assert_eq!(signer.identity().member, MEMBER);
        assert_eq!(signer.identity().roles, vec![ROLE.to_string()]);

        let plain = signer_for(&TestPki::generate());
        assert_eq!(plain.identity().member, "CN=Test Leaf");
    }

    #[test]
    fn test_signer_requires_readable_certificate() {
        let assembler = SignatureAssembler::new(Arc::new(InMemorySigner::new()));
        assert!(matches!(
            RecordSigner::new(assembler.clone(), SigningContext::new("leaf"), vec![], vec![]),
            Err(RecordError::NoCertificates)
        ));
        assert!(matches!(
            RecordSigner::new(assembler, SigningContext::new("leaf"), vec![], vec![vec![0x30, 0x00]]),
            Err(RecordError::SignerCertificate(_))
        ));
    }

    /// 正しく署名されていても、証明書と異なる `member` を名乗るブロックは拒否される
    #[tokio::test]
    async fn test_claimed_member_must_match_certificate() {
        let (pki, signer) = fixture();
        let steps = vec![json!({ "type": "transfer", "to": "cap", "id": "t1" })];
        let claimed = SignerIdentity {
            member: "https://registry.example/member/victim".into(),
            roles: vec![ROLE.into()],
        };
        let input = signing_input(FRAMEWORK, None, &claimed, &steps);
        let signature = signer
            .assembler()
            .sign_payload(signer.context(), input.as_bytes())
            .await
            .unwrap();

        let b64 = base64::engine::general_purpose::STANDARD;
        let forged = Record {
            trust_framework: FRAMEWORK.into(),
            blocks: vec![SignedBlock {
                steps,
                signed: claimed,
                certificates: vec![b64.encode(&pki.leaf), b64.encode(&pki.intermediate)],
                alg: "ES256".into(),
                signature: b64.encode(&signature.der),
            }],
            pending: Vec::new(),
        };

        match forged.verify(&root(&pki), SystemTime::now()) {
            Err(RecordError::IdentityMismatch { block, claimed, certificate }) => {
                assert_eq!(block, 0);
                assert_eq!(claimed, "https://registry.example/member/victim");
                assert_eq!(certificate, MEMBER);
            }
            other => panic!("IdentityMismatchを期待しました: {other:?}"),
        }
    }

    /// 記録されたアルゴリズムが鍵と合わない・未知の場合は署名エラー
    #[tokio::test]
    async fn test_recorded_algorithm_is_checked() {
        let (pki, signer) = fixture();
        let mut record = Record::new(FRAMEWORK);
        record.add_step(json!({ "type": "origin" })).unwrap();
        let encoded = record.sign(&signer).await.unwrap().encoded().unwrap();

        for alg in ["ES384", "none"] {
            let mut altered = encoded.clone();
            altered["blocks"][0]["alg"] = json!(alg);
            let altered = Record::from_encoded(FRAMEWORK, &altered).unwrap();
            let err = altered.verify(&root(&pki), SystemTime::now()).unwrap_err();
            assert!(matches!(err, RecordError::InvalidSignature { block: 0, .. }), "{alg}: {err:?}");
        }
    }

    /// 署名後にステップを書き換えると検証に失敗する
    #[tokio::test]
    async fn test_tampered_record_fails() {
        let (pki, signer) = fixture();
        let mut record = Record::new(FRAMEWORK);
        record.add_step(json!({ "type": "origin", "origin": "meter" })).unwrap();
        let mut encoded = record.sign(&signer).await.unwrap().encoded().unwrap();

        encoded["blocks"][0]["steps"][0]["origin"] = json!("forged");
        let tampered = Record::from_encoded(FRAMEWORK, &encoded).unwrap();
        let err = tampered.verify(&root(&pki), SystemTime::now()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidSignature { block: 0, .. }), "{err:?}");
    }

    /// 2つ目のブロックは1つ目の署名に連鎖する。ブロックを削除すると検証に失敗する
    #[tokio::test]
    async fn test_blocks_are_chained() {
        let (pki, edp) = fixture();
        let mut record = Record::new(FRAMEWORK);
        record.add_step(json!({ "type": "origin" })).unwrap();
        let first = record.sign(&edp).await.unwrap();

        let mut second = Record::from_encoded(FRAMEWORK, &first.encoded().unwrap()).unwrap();
        second.add_step(json!({ "type": "receipt" })).unwrap();
        let second = second.sign(&edp).await.unwrap();
        assert_eq!(second.blocks().len(), 2);
        second.verify(&root(&pki), SystemTime::now()).unwrap();

        let mut encoded = second.encoded().unwrap();
        encoded["blocks"].as_array_mut().unwrap().remove(0);
        let truncated = Record::from_encoded(FRAMEWORK, &encoded).unwrap();
        assert!(truncated.verify(&root(&pki), SystemTime::now()).is_err());
    }

    /// 別のルートに連なる署名者はチェーンエラー
    #[tokio::test]
    async fn test_untrusted_signer() {
        let (_, signer) = fixture();
        let other = TestPki::generate();
        let mut record = Record::new(FRAMEWORK);
        record.add_step(json!({ "type": "origin" })).unwrap();
        let signed = record.sign(&signer).await.unwrap();

        let err = signed.verify(&root(&other), SystemTime::now()).unwrap_err();
        assert!(matches!(err, RecordError::Chain { block: 0, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_find_step() {
        let (_, signer) = fixture();
        let mut record = Record::new(FRAMEWORK);
        record
            .add_step(json!({ "type": "transfer", "to": "cap", "parameters": { "measure": "import", "from": "a" } }))
            .unwrap();
        record.add_step(json!({ "type": "transfer", "to": "bank" })).unwrap();
        let signed = record.sign(&signer).await.unwrap();

        let step = signed
            .find_step(&json!({
                "type": "transfer",
                "parameters": { "measure": "import" },
                "_signature": { "signed": { "member": MEMBER, "roles": [ROLE] } },
            }))
            .unwrap();
        assert_eq!(step["to"], "cap");

        assert!(matches!(
            signed.find_step(&json!({ "type": "transfer" })),
            Err(RecordError::AmbiguousStep(2))
        ));
        assert!(matches!(
            signed.find_step(&json!({ "type": "transfer", "_signature": { "signed": { "member": "other" } } })),
            Err(RecordError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_add_step_requires_type() {
        let mut record = Record::new(FRAMEWORK);
        assert!(matches!(record.add_step(json!({ "origin": "x" })), Err(RecordError::InvalidStep(_))));
        assert!(matches!(record.add_step(json!("origin")), Err(RecordError::InvalidStep(_))));
        let id = record.add_step(json!({ "type": "origin" })).unwrap();
        assert_eq!(record.pending_steps()[0]["id"], id);
        assert!(matches!(record.encoded(), Err(RecordError::PendingSteps(1))));
    }

    #[test]
    fn test_trust_framework_mismatch() {
        let encoded = json!({ "ib1:provenance": "https://other.example/tf", "blocks": [] });
        assert!(matches!(
            Record::from_encoded(FRAMEWORK, &encoded),
            Err(RecordError::TrustFrameworkMismatch { .. })
        ));
        let record = Record::from_self_described(&encoded).unwrap();
        assert_eq!(record.trust_framework(), "https://other.example/tf");
        assert!(matches!(
            Record::from_self_described(&json!({ "blocks": [] })),
            Err(RecordError::Malformed(_))
        ));
    }

    #[test]
    fn test_canonical_signing_input_is_sorted() {
        let input = signing_input(
            "tf",
            None,
            &SignerIdentity { member: "m".into(), roles: vec![] },
            &[json!({ "type": "origin", "b": 1, "a": { "z": true, "y": null } })],
        );
        assert_eq!(
            input,
            r#"{"ib1:provenance":"tf","previous":null,"signed":{"member":"m","roles":[]},"steps":[{"a":{"y":null,"z":true},"b":1,"type":"origin"}]}"#
        );
    }
}
