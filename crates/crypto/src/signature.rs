//! # ECDSA 署名値
//!
//! リモート署名者が返す署名を、曲線の位数に合わせた固定長の `(r, s)` として保持する。
//! 固定長 `r || s` とDER `SEQUENCE { INTEGER r, INTEGER s }` の双方から構築できる。

use provenance_types::SigningAlgorithm;

use crate::asn1::{self, DerError};

/// 署名値のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// 成分の長さがアルゴリズムと一致しない
    #[error("署名長がアルゴリズム {algorithm} と一致しません: 期待 {expected} バイト, 実際 {actual} バイト")]
    WidthMismatch {
        /// 署名アルゴリズム
        algorithm: SigningAlgorithm,
        /// 期待した長さ
        expected: usize,
        /// 実際の長さ
        actual: usize,
    },
    /// DERの処理に失敗
    #[error(transparent)]
    Der(#[from] DerError),
}

/// ECDSA署名の `(r, s)`。各成分は曲線の位数のバイト長に左詰め0埋めされる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    algorithm: SigningAlgorithm,
    r: Vec<u8>,
    s: Vec<u8>,
}

impl RawSignature {
    /// 固定長 `r || s` から構築する。
    pub fn from_fixed(bytes: &[u8], algorithm: SigningAlgorithm) -> Result<Self, SignatureError> {
        let n = algorithm.component_len();
        if bytes.len() != 2 * n {
            return Err(SignatureError::WidthMismatch {
                algorithm,
                expected: 2 * n,
                actual: bytes.len(),
            });
        }
        let (r, s) = bytes.split_at(n);
        Self::from_components(r, s, algorithm)
    }

    /// 符号なし整数の `r`, `s` から構築する。
    pub fn from_components(
        r: &[u8],
        s: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<Self, SignatureError> {
        let r = pad_component(r, algorithm)?;
        let s = pad_component(s, algorithm)?;
        Ok(Self { algorithm, r, s })
    }

    /// DERの署名値から構築する（AWS KMS等の出力形式）。
    pub fn from_der(der: &[u8], algorithm: SigningAlgorithm) -> Result<Self, SignatureError> {
        let (r, s) = asn1::decode_signature_value(der)?;
        Self::from_components(&r, &s, algorithm)
    }

    /// 署名アルゴリズム。
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// 成分 r（固定長）。
    pub fn r(&self) -> &[u8] {
        &self.r
    }

    /// 成分 s（固定長）。
    pub fn s(&self) -> &[u8] {
        &self.s
    }

    /// 固定長 `r || s`。
    pub fn to_fixed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.r.len() + self.s.len());
        out.extend_from_slice(&self.r);
        out.extend_from_slice(&self.s);
        out
    }

    /// 最小長INTEGERによるDER署名値。
    pub fn to_der(&self) -> Result<Vec<u8>, SignatureError> {
        Ok(asn1::encode_signature_value(&self.r, &self.s)?)
    }
}

/// 先頭の0を除いた成分を固定長に0埋めする。位数より長い成分は拒否する。
fn pad_component(value: &[u8], algorithm: SigningAlgorithm) -> Result<Vec<u8>, SignatureError> {
    let n = algorithm.component_len();
    let skip = value.iter().take_while(|b| **b == 0).count();
    let trimmed = &value[skip..];
    if trimmed.is_empty() {
        return Err(DerError::InvalidComponent("値が0です").into());
    }
    if trimmed.len() > n {
        return Err(SignatureError::WidthMismatch {
            algorithm,
            expected: n,
            actual: trimmed.len(),
        });
    }
    let mut out = vec![0u8; n - trimmed.len()];
    out.extend_from_slice(trimmed);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 短い成分は固定長に0埋めされ、DERでは最小長になる
    #[test]
    fn test_short_components_are_padded() {
        let sig = RawSignature::from_components(&[0x01], &[0x80, 0x00], SigningAlgorithm::EcdsaSha256)
            .unwrap();
        assert_eq!(sig.r().len(), 32);
        assert_eq!(sig.r()[31], 0x01);
        assert_eq!(&sig.s()[30..], &[0x80, 0x00]);

        let der = sig.to_der().unwrap();
        assert_eq!(
            der,
            vec![0x30, 0x08, 0x02, 0x01, 0x01, 0x02, 0x03, 0x00, 0x80, 0x00]
        );
        assert_eq!(RawSignature::from_der(&der, SigningAlgorithm::EcdsaSha256).unwrap(), sig);
    }

    /// 固定長入力の長さ検証
    #[test]
    fn test_from_fixed_width_checked() {
        let mut bytes = vec![0xaa; 96];
        assert!(RawSignature::from_fixed(&bytes, SigningAlgorithm::EcdsaSha384).is_ok());
        assert!(matches!(
            RawSignature::from_fixed(&bytes, SigningAlgorithm::EcdsaSha256),
            Err(SignatureError::WidthMismatch { expected: 64, actual: 96, .. })
        ));
        bytes.truncate(64);
        let sig = RawSignature::from_fixed(&bytes, SigningAlgorithm::EcdsaSha256).unwrap();
        assert_eq!(sig.to_fixed(), bytes);
    }

    /// P-384幅の署名をP-256として解釈すると幅エラーになる
    #[test]
    fn test_der_component_too_wide() {
        let der = asn1::encode_signature_value(&[0x7f; 48], &[0x7f; 48]).unwrap();
        assert!(matches!(
            RawSignature::from_der(&der, SigningAlgorithm::EcdsaSha256),
            Err(SignatureError::WidthMismatch { expected: 32, actual: 48, .. })
        ));
        assert!(RawSignature::from_der(&der, SigningAlgorithm::EcdsaSha384).is_ok());
    }

    /// p256が生成したDER署名との相互運用
    #[test]
    fn test_interop_with_p256_der_signature() {
        use p256::ecdsa::signature::Signer;

        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let der_sig: p256::ecdsa::DerSignature = key.sign(b"interop");
        let raw = RawSignature::from_der(der_sig.as_bytes(), SigningAlgorithm::EcdsaSha256).unwrap();
        assert_eq!(raw.to_der().unwrap(), der_sig.as_bytes().to_vec());

        let fixed: p256::ecdsa::Signature = der_sig.try_into().unwrap();
        assert_eq!(raw.to_fixed(), fixed.to_bytes().to_vec());
    }
}
