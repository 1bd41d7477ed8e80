//! # ECDSA 公開鍵
//!
//! SubjectPublicKeyInfo（DER）からP-256/P-384の公開鍵を読み込み、
//! 正規化（非圧縮点）と署名検証を行う。

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use provenance_types::{EcCurve, SigningAlgorithm};
use sha2::{Digest, Sha256, Sha384};

/// 公開鍵処理のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// P-256/P-384以外の鍵、または不正なSubjectPublicKeyInfo
    #[error("対応していない公開鍵です: {0}")]
    UnsupportedKey(String),
    /// 署名アルゴリズムと鍵の曲線が一致しない
    #[error("署名アルゴリズム {algorithm} は {curve} の鍵では使用できません")]
    CurveMismatch {
        /// 署名アルゴリズム
        algorithm: SigningAlgorithm,
        /// 鍵の曲線
        curve: EcCurve,
    },
    /// 署名のDERが不正
    #[error("ECDSA署名のデコードに失敗: {0}")]
    SignatureEncoding(String),
    /// 署名が一致しない
    #[error("署名検証に失敗しました")]
    VerificationFailed,
}

/// P-256またはP-384の公開鍵。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    /// NIST P-256
    P256(p256::PublicKey),
    /// NIST P-384
    P384(p384::PublicKey),
}

impl EcPublicKey {
    /// SubjectPublicKeyInfo（DER）から読み込む。圧縮点も受け付ける。
    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self, KeyError> {
        if let Ok(key) = p256::PublicKey::from_public_key_der(spki_der) {
            return Ok(EcPublicKey::P256(key));
        }
        p384::PublicKey::from_public_key_der(spki_der)
            .map(EcPublicKey::P384)
            .map_err(|e| KeyError::UnsupportedKey(e.to_string()))
    }

    /// 鍵の曲線。
    pub fn curve(&self) -> EcCurve {
        match self {
            EcPublicKey::P256(_) => EcCurve::P256,
            EcPublicKey::P384(_) => EcCurve::P384,
        }
    }

    /// 非圧縮SEC1形式の点（`0x04 || X || Y`）。
    pub fn to_uncompressed_point(&self) -> Vec<u8> {
        match self {
            EcPublicKey::P256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            EcPublicKey::P384(key) => key.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// 非圧縮点によるSubjectPublicKeyInfo（DER）。
    pub fn to_spki_der(&self) -> Result<Vec<u8>, KeyError> {
        let doc = match self {
            EcPublicKey::P256(key) => key.to_public_key_der(),
            EcPublicKey::P384(key) => key.to_public_key_der(),
        }
        .map_err(|e| KeyError::UnsupportedKey(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// 非圧縮点のSHA-256フィンガープリント（hex）。
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.to_uncompressed_point()))
    }

    /// `message` に対するDER形式のECDSA署名を検証する。
    ///
    /// ダイジェストは `algorithm` に従って計算する。X.509では親の鍵と
    /// 子の署名アルゴリズムが異なる曲線・ハッシュの組み合わせになり得るため、
    /// 曲線とハッシュの一致は要求しない。
    pub fn verify(
        &self,
        algorithm: SigningAlgorithm,
        message: &[u8],
        signature_der: &[u8],
    ) -> Result<(), KeyError> {
        use ecdsa::signature::hazmat::PrehashVerifier;

        let digest: Vec<u8> = match algorithm {
            SigningAlgorithm::EcdsaSha256 => Sha256::digest(message).to_vec(),
            SigningAlgorithm::EcdsaSha384 => Sha384::digest(message).to_vec(),
        };

        match self {
            EcPublicKey::P256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| KeyError::SignatureEncoding(e.to_string()))?;
                p256::ecdsa::VerifyingKey::from(key)
                    .verify_prehash(&digest, &signature)
                    .map_err(|_| KeyError::VerificationFailed)
            }
            EcPublicKey::P384(key) => {
                let signature = p384::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| KeyError::SignatureEncoding(e.to_string()))?;
                p384::ecdsa::VerifyingKey::from(key)
                    .verify_prehash(&digest, &signature)
                    .map_err(|_| KeyError::VerificationFailed)
            }
        }
    }

    /// 署名アルゴリズムが鍵の曲線と一致することを確認する（署名生成側の整合性検査）。
    pub fn ensure_algorithm(&self, algorithm: SigningAlgorithm) -> Result<(), KeyError> {
        if algorithm.curve() != self.curve() {
            return Err(KeyError::CurveMismatch {
                algorithm,
                curve: self.curve(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;

    /// P-256鍵のSPKIを読み込み、署名を検証できることを確認
    #[test]
    fn test_p256_roundtrip_and_verify() {
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let spki = key.verifying_key().to_public_key_der().unwrap();
        let public = EcPublicKey::from_spki_der(spki.as_bytes()).unwrap();
        assert_eq!(public.curve(), EcCurve::P256);
        assert_eq!(public.to_spki_der().unwrap(), spki.as_bytes().to_vec());

        let sig: p256::ecdsa::DerSignature = key.sign(b"message");
        assert!(public
            .verify(SigningAlgorithm::EcdsaSha256, b"message", sig.as_bytes())
            .is_ok());
        assert_eq!(
            public.verify(SigningAlgorithm::EcdsaSha256, b"other", sig.as_bytes()),
            Err(KeyError::VerificationFailed)
        );
    }

    /// P-384鍵とSHA-384の組み合わせ
    #[test]
    fn test_p384_verify() {
        let key = p384::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let spki = key.verifying_key().to_public_key_der().unwrap();
        let public = EcPublicKey::from_spki_der(spki.as_bytes()).unwrap();
        assert_eq!(public.curve(), EcCurve::P384);

        let sig: p384::ecdsa::DerSignature = key.sign(b"message");
        assert!(public
            .verify(SigningAlgorithm::EcdsaSha384, b"message", sig.as_bytes())
            .is_ok());
        assert!(public.ensure_algorithm(SigningAlgorithm::EcdsaSha256).is_err());
    }

    /// 不正なSPKIは拒否する
    #[test]
    fn test_rejects_garbage_spki() {
        assert!(matches!(
            EcPublicKey::from_spki_der(&[0x30, 0x03, 0x02, 0x01, 0x00]),
            Err(KeyError::UnsupportedKey(_))
        ));
    }
}
