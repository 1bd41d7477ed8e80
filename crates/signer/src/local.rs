//! # ローカル開発用インメモリ署名者
//!
//! KMSが利用できない環境（ローカル開発・テスト、`SIGNING_KEY` によるPEM鍵）で使用する実装。
//! リモート署名者と同じ契約（RAWはハッシュしてから署名、DIGESTはそのまま署名）に従う。

use std::collections::HashMap;
use std::sync::RwLock;

use ecdsa::signature::hazmat::PrehashSigner;
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use provenance_crypto::RawSignature;
use provenance_types::{
    EcCurve, KeyId, KeySpec, KeyUsage, MessageType, PublicKeyInfo, SigningAlgorithm,
};
use sha2::{Digest, Sha256, Sha384};

use crate::{RemoteSigner, SignatureOutput, SignerError};

/// メモリ内に保持する署名鍵。
enum LocalKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl LocalKey {
    fn curve(&self) -> EcCurve {
        match self {
            LocalKey::P256(_) => EcCurve::P256,
            LocalKey::P384(_) => EcCurve::P384,
        }
    }

    fn spki_der(&self) -> Result<Vec<u8>, SignerError> {
        let doc = match self {
            LocalKey::P256(key) => key.verifying_key().to_public_key_der(),
            LocalKey::P384(key) => key.verifying_key().to_public_key_der(),
        }
        .map_err(|e| SignerError::InvalidResponse(format!("公開鍵のエンコードに失敗: {e}")))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// ダイジェストに署名し、固定長 `r || s` を返す。
    fn sign_prehash(&self, digest: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            LocalKey::P256(key) => {
                let signature: p256::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(|e| e.to_string())?;
                Ok(signature.to_bytes().to_vec())
            }
            LocalKey::P384(key) => {
                let signature: p384::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(|e| e.to_string())?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    /// PKCS#8 または SEC1 のPEMから読み込む。
    fn from_pem(pem: &str) -> Option<Self> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Some(LocalKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Some(LocalKey::P384(key));
        }
        if let Ok(secret) = p256::SecretKey::from_sec1_pem(pem) {
            return Some(LocalKey::P256(secret.into()));
        }
        p384::SecretKey::from_sec1_pem(pem)
            .ok()
            .map(|secret| LocalKey::P384(secret.into()))
    }
}

/// インメモリ署名者。鍵識別子ごとにP-256/P-384鍵を保持する。
pub struct InMemorySigner {
    keys: RwLock<HashMap<KeyId, LocalKey>>,
}

impl Default for InMemorySigner {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySigner {
    /// 鍵を持たない署名者を作成する。
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// PEM（PKCS#8 / SEC1）の秘密鍵1つを持つ署名者を作成する。
    pub fn from_pem(key_id: impl Into<KeyId>, pem: &str) -> Result<Self, SignerError> {
        let signer = Self::new();
        signer.insert_pem(key_id, pem)?;
        Ok(signer)
    }

    /// PEM（PKCS#8 / SEC1）の秘密鍵を追加する。
    pub fn insert_pem(&self, key_id: impl Into<KeyId>, pem: &str) -> Result<(), SignerError> {
        let key_id = key_id.into();
        let key = LocalKey::from_pem(pem).ok_or_else(|| SignerError::AlgorithmMismatch {
            key_id: key_id.clone(),
            reason: "P-256/P-384のEC秘密鍵PEMではありません".into(),
        })?;
        self.insert(key_id, key);
        Ok(())
    }

    /// P-256鍵を追加する。
    pub fn insert_p256(&self, key_id: impl Into<KeyId>, key: p256::ecdsa::SigningKey) {
        self.insert(key_id.into(), LocalKey::P256(key));
    }

    /// P-384鍵を追加する。
    pub fn insert_p384(&self, key_id: impl Into<KeyId>, key: p384::ecdsa::SigningKey) {
        self.insert(key_id.into(), LocalKey::P384(key));
    }

    fn insert(&self, key_id: KeyId, key: LocalKey) {
        let mut guard = self.keys.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key_id, key);
    }
}

/// アルゴリズムに従ってメッセージをハッシュする。
pub(crate) fn digest_message(algorithm: SigningAlgorithm, message: &[u8]) -> Vec<u8> {
    match algorithm {
        SigningAlgorithm::EcdsaSha256 => Sha256::digest(message).to_vec(),
        SigningAlgorithm::EcdsaSha384 => Sha384::digest(message).to_vec(),
    }
}

#[async_trait::async_trait]
impl RemoteSigner for InMemorySigner {
    fn signer_type(&self) -> &str {
        "in_memory"
    }

    async fn sign(
        &self,
        key_id: &KeyId,
        message: &[u8],
        algorithm: SigningAlgorithm,
        message_type: MessageType,
    ) -> Result<SignatureOutput, SignerError> {
        let digest = match message_type {
            MessageType::Raw => digest_message(algorithm, message),
            MessageType::Digest => {
                if message.len() != algorithm.digest_len() {
                    return Err(SignerError::AlgorithmMismatch {
                        key_id: key_id.clone(),
                        reason: format!(
                            "{algorithm} のダイジェストは {} バイトです（{} バイトが渡されました）",
                            algorithm.digest_len(),
                            message.len()
                        ),
                    });
                }
                message.to_vec()
            }
        };

        let fixed = {
            let guard = self.keys.read().unwrap_or_else(|e| e.into_inner());
            let key = guard
                .get(key_id)
                .ok_or_else(|| SignerError::KeyNotFound(key_id.clone()))?;
            if key.curve() != algorithm.curve() {
                return Err(SignerError::AlgorithmMismatch {
                    key_id: key_id.clone(),
                    reason: format!("{} の鍵で {algorithm} は使用できません", key.curve()),
                });
            }
            key.sign_prehash(&digest).map_err(SignerError::InvalidResponse)?
        };

        let raw = RawSignature::from_fixed(&fixed, algorithm)
            .map_err(|e| SignerError::InvalidResponse(e.to_string()))?;
        Ok(SignatureOutput {
            key_id: key_id.clone(),
            algorithm,
            raw,
        })
    }

    async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError> {
        let guard = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let key = guard
            .get(key_id)
            .ok_or_else(|| SignerError::KeyNotFound(key_id.clone()))?;
        let signing_algorithms = match key.curve() {
            EcCurve::P256 => vec![SigningAlgorithm::EcdsaSha256],
            EcCurve::P384 => vec![SigningAlgorithm::EcdsaSha384],
        };
        Ok(PublicKeyInfo {
            key_id: key_id.clone(),
            key_spec: KeySpec::from_curve(key.curve()),
            key_usage: KeyUsage::SignVerify,
            signing_algorithms,
            public_key_der: key.spki_der()?,
        })
    }
}
