//! # 署名アセンブラ
//!
//! 署名対象バイト列をリモート署名者に渡し、返された `(r, s)` から署名済み成果物を組み立てる。
//!
//! ## CSR
//! 1. CSRからCertificationRequestInfo（CRI）のバイト範囲をそのまま切り出す
//! 2. リモート署名者がCRIに署名する（ハッシュは署名者側）
//! 3. 署名値をDERにエンコードし、`[AlgorithmIdentifier, BIT STRING]` を付けて組み立てる
//! 4. CSRに埋め込まれた公開鍵で検証できない場合は出力しない
//!
//! ## 来歴レコード
//! 正規化済みのJSONバイト列に同じ手順で署名し、DER署名値を返す。
//!
//! 埋め込むOIDは、リモート署名者が実際に使用したアルゴリズムと一致しなければならない。

use std::str::FromStr;
use std::sync::Arc;

use der::{Decode, Encode};
use provenance_crypto::asn1::{self, DerError};
use provenance_crypto::{EcPublicKey, KeyError, SignatureError};
use provenance_signer::{RemoteSigner, SignerError};
use provenance_types::{KeyId, MessageType, SigningAlgorithm};
use x509_cert::name::Name;
use x509_cert::request::CertReqInfo;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

/// アセンブラのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    /// 入力のDER構造が不正
    #[error("DER構造エラー: {0}")]
    Der(#[from] DerError),
    /// リモート署名者のエラー
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// 要求したアルゴリズムと実際の署名が一致しない
    #[error("署名アルゴリズムの不整合: {0}")]
    AlgorithmInconsistency(String),
    /// CSRの公開鍵がリモート鍵ではない
    #[error("CSRの公開鍵がリモート鍵 {key_id} と一致しません: {reason}")]
    KeyMismatch {
        /// 鍵識別子
        key_id: KeyId,
        /// 詳細
        reason: String,
    },
    /// CSRの公開鍵を読み込めない
    #[error("CSRの公開鍵を読み込めません: {0}")]
    PublicKey(#[from] KeyError),
    /// 署名値の変換に失敗
    #[error("署名値の変換に失敗: {0}")]
    Signature(#[from] SignatureError),
    /// CRIの構築・解析に失敗
    #[error("CertificationRequestInfoの処理に失敗: {0}")]
    Request(String),
}

/// 署名に使う鍵とアルゴリズム。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    /// リモート鍵の識別子
    pub key_id: KeyId,
    /// 署名アルゴリズム
    pub algorithm: SigningAlgorithm,
}

impl SigningContext {
    /// ECDSA_SHA_256 のコンテキストを作成する。
    pub fn new(key_id: impl Into<KeyId>) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm: SigningAlgorithm::default(),
        }
    }

    /// アルゴリズムを指定する。
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// 任意ペイロードへの署名結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSignature {
    /// 使用したアルゴリズム
    pub algorithm: SigningAlgorithm,
    /// 署名値（`SEQUENCE { INTEGER r, INTEGER s }`）
    pub der: Vec<u8>,
}

/// 署名アセンブラ。
#[derive(Clone)]
pub struct SignatureAssembler {
    signer: Arc<dyn RemoteSigner>,
}

impl SignatureAssembler {
    /// リモート署名者を使うアセンブラを作成する。
    pub fn new(signer: Arc<dyn RemoteSigner>) -> Self {
        Self { signer }
    }

    /// リモート署名者。
    pub fn signer(&self) -> &Arc<dyn RemoteSigner> {
        &self.signer
    }

    /// リモート署名を行い、アルゴリズムを確認したうえでDER署名値を返す。
    async fn remote_sign(
        &self,
        ctx: &SigningContext,
        message: &[u8],
    ) -> Result<Vec<u8>, AssemblerError> {
        let output = self
            .signer
            .sign(&ctx.key_id, message, ctx.algorithm, MessageType::Raw)
            .await?;

        if output.algorithm != ctx.algorithm {
            return Err(AssemblerError::AlgorithmInconsistency(format!(
                "{} を要求しましたが、署名者は {} で署名しました",
                ctx.algorithm, output.algorithm
            )));
        }
        let raw = &output.raw;
        if raw.algorithm() != ctx.algorithm
            || raw.r().len() != ctx.algorithm.component_len()
            || raw.s().len() != ctx.algorithm.component_len()
        {
            return Err(AssemblerError::AlgorithmInconsistency(format!(
                "{} の署名成分は {} バイトです",
                ctx.algorithm,
                ctx.algorithm.component_len()
            )));
        }
        Ok(raw.to_der()?)
    }

    /// PKCS#10 CSR（DER）のCRIにリモート鍵で署名し直し、署名済みCSR（DER）を返す。
    ///
    /// 入力CSRの既存の署名は使わない。
    pub async fn sign_csr(
        &self,
        ctx: &SigningContext,
        csr_der: &[u8],
    ) -> Result<Vec<u8>, AssemblerError> {
        let cri = asn1::extract_signing_input(csr_der)?;
        self.sign_certification_request_info(ctx, cri).await
    }

    /// 未署名のCRI（DER）に署名し、署名済みCSR（DER）を返す。
    pub async fn sign_certification_request_info(
        &self,
        ctx: &SigningContext,
        cri_der: &[u8],
    ) -> Result<Vec<u8>, AssemblerError> {
        let public_key = request_public_key(cri_der)?;
        public_key
            .ensure_algorithm(ctx.algorithm)
            .map_err(|e| AssemblerError::AlgorithmInconsistency(e.to_string()))?;

        let signature = self.remote_sign(ctx, cri_der).await?;

        if let Err(e) = public_key.verify(ctx.algorithm, cri_der, &signature) {
            tracing::warn!(
                key_id = %ctx.key_id,
                csr_key = %public_key.fingerprint(),
                "CSRの公開鍵でリモート署名を検証できません"
            );
            return Err(AssemblerError::KeyMismatch {
                key_id: ctx.key_id.clone(),
                reason: e.to_string(),
            });
        }

        let csr = asn1::splice_signed_artifact(cri_der, ctx.algorithm.signature_oid(), &signature)?;
        tracing::info!(
            key_id = %ctx.key_id,
            algorithm = %ctx.algorithm,
            len = csr.len(),
            "CSRに署名しました"
        );
        Ok(csr)
    }

    /// Subject名とリモート鍵の公開鍵から新しいCSR（DER）を作成する。
    pub async fn create_csr(
        &self,
        ctx: &SigningContext,
        subject: &str,
    ) -> Result<Vec<u8>, AssemblerError> {
        let info = self.signer.get_public_key(&ctx.key_id).await?;
        if !info.supports(ctx.algorithm) {
            return Err(AssemblerError::AlgorithmInconsistency(format!(
                "鍵 {} ({:?}) は {} に対応していません",
                ctx.key_id, info.key_spec, ctx.algorithm
            )));
        }
        let cri = build_certification_request_info(subject, &info.public_key_der)?;
        self.sign_certification_request_info(ctx, &cri).await
    }

    /// 任意のバイト列に署名する。
    pub async fn sign_payload(
        &self,
        ctx: &SigningContext,
        payload: &[u8],
    ) -> Result<PayloadSignature, AssemblerError> {
        let der = self.remote_sign(ctx, payload).await?;
        tracing::debug!(key_id = %ctx.key_id, len = payload.len(), "ペイロードに署名しました");
        Ok(PayloadSignature {
            algorithm: ctx.algorithm,
            der,
        })
    }
}

/// Subject名（RFC 4514形式、例: `CN=example,O=Org`）と公開鍵からCRI（DER）を構築する。
pub fn build_certification_request_info(
    subject: &str,
    spki_der: &[u8],
) -> Result<Vec<u8>, AssemblerError> {
    let subject = Name::from_str(subject)
        .map_err(|e| AssemblerError::Request(format!("Subject名が不正です: {e}")))?;
    let public_key = SubjectPublicKeyInfoOwned::from_der(spki_der)
        .map_err(|e| AssemblerError::Request(format!("公開鍵が不正です: {e}")))?;
    CertReqInfo {
        version: x509_cert::request::Version::V1,
        subject,
        public_key,
        attributes: Default::default(),
    }
    .to_der()
    .map_err(|e| AssemblerError::Request(e.to_string()))
}

/// CRIに埋め込まれた公開鍵。
fn request_public_key(cri_der: &[u8]) -> Result<EcPublicKey, AssemblerError> {
    let info = CertReqInfo::from_der(cri_der)
        .map_err(|e| AssemblerError::Request(format!("CRIを解析できません: {e}")))?;
    let spki = info
        .public_key
        .to_der()
        .map_err(|e| AssemblerError::Request(e.to_string()))?;
    Ok(EcPublicKey::from_spki_der(&spki)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use provenance_crypto::test_support::{csr_der, random_p256_key, spki_der};
    use provenance_signer::{InMemorySigner, SignatureOutput};
    use provenance_types::PublicKeyInfo;

    fn assembler_with(key: SigningKey) -> SignatureAssembler {
        let signer = InMemorySigner::new();
        signer.insert_p256("remote", key);
        SignatureAssembler::new(Arc::new(signer))
    }

    /// 署名済みCSRがCSR自身の公開鍵で検証できることを確認
    fn assert_csr_verifies(csr: &[u8]) {
        let parsed = x509_cert::request::CertReq::from_der(csr).unwrap();
        assert_eq!(parsed.algorithm.oid.to_string(), asn1::ECDSA_WITH_SHA256);
        let cri = asn1::extract_signing_input(csr).unwrap();
        let key = request_public_key(cri).unwrap();
        key.verify(
            SigningAlgorithm::EcdsaSha256,
            cri,
            parsed.signature.raw_bytes(),
        )
        .unwrap();
    }

    /// 固定鍵で固定CSRのCRIに署名し直すと、検証可能なCSRが得られる
    #[tokio::test]
    async fn test_sign_csr_with_fixed_key() {
        let key = SigningKey::from_slice(&[0x11u8; 32]).unwrap();
        let original = csr_der(&key, "CN=fixed.example,O=Provenance");
        let assembler = assembler_with(key);

        let signed = assembler
            .sign_csr(&SigningContext::new("remote"), &original)
            .await
            .unwrap();

        assert_csr_verifies(&signed);
        // CRIはバイト単位で保持される
        assert_eq!(
            asn1::extract_signing_input(&signed).unwrap(),
            asn1::extract_signing_input(&original).unwrap()
        );
    }

    /// Subjectとリモート鍵から新しいCSRを作成する
    #[tokio::test]
    async fn test_create_csr() {
        let key = random_p256_key();
        let expected_spki = spki_der(key.verifying_key());
        let assembler = assembler_with(key);

        let csr = assembler
            .create_csr(&SigningContext::new("remote"), "CN=signer.example")
            .await
            .unwrap();
        assert_csr_verifies(&csr);

        let parsed = x509_cert::request::CertReq::from_der(&csr).unwrap();
        assert_eq!(parsed.info.subject.to_string(), "CN=signer.example");
        assert_eq!(parsed.info.public_key.to_der().unwrap(), expected_spki);
    }

    /// CSRの公開鍵がリモート鍵と異なる場合は出力しない
    #[tokio::test]
    async fn test_csr_key_mismatch() {
        let original = csr_der(&random_p256_key(), "CN=other");
        let assembler = assembler_with(random_p256_key());

        let err = assembler
            .sign_csr(&SigningContext::new("remote"), &original)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblerError::KeyMismatch { .. }), "{err:?}");
    }

    /// P-256鍵のCSRにECDSA_SHA_384を要求すると不整合
    #[tokio::test]
    async fn test_csr_curve_inconsistency() {
        let key = random_p256_key();
        let original = csr_der(&key, "CN=curve");
        let assembler = assembler_with(key);

        let ctx = SigningContext::new("remote").with_algorithm(SigningAlgorithm::EcdsaSha384);
        let err = assembler.sign_csr(&ctx, &original).await.unwrap_err();
        assert!(matches!(err, AssemblerError::AlgorithmInconsistency(_)), "{err:?}");
    }

    /// 壊れたCSRはMalformedStructure
    #[tokio::test]
    async fn test_malformed_csr() {
        let assembler = assembler_with(random_p256_key());
        let err = assembler
            .sign_csr(&SigningContext::new("remote"), &[0x30, 0x05, 0x30])
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblerError::Der(DerError::MalformedStructure { .. })));
    }

    /// 要求と異なるアルゴリズムを報告する署名者
    struct MislabelledSigner(InMemorySigner);

    #[async_trait::async_trait]
    impl RemoteSigner for MislabelledSigner {
        fn signer_type(&self) -> &str {
            "mislabelled"
        }

        async fn sign(
            &self,
            key_id: &KeyId,
            message: &[u8],
            algorithm: SigningAlgorithm,
            message_type: MessageType,
        ) -> Result<SignatureOutput, SignerError> {
            let mut output = self.0.sign(key_id, message, algorithm, message_type).await?;
            output.algorithm = SigningAlgorithm::EcdsaSha384;
            Ok(output)
        }

        async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError> {
            self.0.get_public_key(key_id).await
        }
    }

    #[tokio::test]
    async fn test_reported_algorithm_must_match() {
        let inner = InMemorySigner::new();
        inner.insert_p256("remote", random_p256_key());
        let assembler = SignatureAssembler::new(Arc::new(MislabelledSigner(inner)));

        let err = assembler
            .sign_payload(&SigningContext::new("remote"), b"payload")
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblerError::AlgorithmInconsistency(_)), "{err:?}");
    }

    /// ペイロード署名は公開鍵で検証できるDER署名値を返す
    #[tokio::test]
    async fn test_sign_payload() {
        let key = random_p256_key();
        let public = EcPublicKey::from_spki_der(&spki_der(key.verifying_key())).unwrap();
        let assembler = assembler_with(key);

        let signature = assembler
            .sign_payload(&SigningContext::new("remote"), b"{\"steps\":[]}")
            .await
            .unwrap();
        assert_eq!(signature.algorithm, SigningAlgorithm::EcdsaSha256);
        assert!(public
            .verify(SigningAlgorithm::EcdsaSha256, b"{\"steps\":[]}", &signature.der)
            .is_ok());
    }

    /// 存在しない鍵のエラーはそのまま返る
    #[tokio::test]
    async fn test_unknown_key() {
        let assembler = assembler_with(random_p256_key());
        let err = assembler
            .sign_payload(&SigningContext::new("missing"), b"payload")
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblerError::Signer(SignerError::KeyNotFound(_))));
    }
}
