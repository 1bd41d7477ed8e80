//! # 鍵一致確認
//!
//! 署名者証明書に埋め込まれた公開鍵と、リモート署名者が報告する公開鍵が
//! 同じ鍵であるかを確認する。比較は正規化した鍵（同じ曲線・非圧縮点）で行う。

use crate::chain::{ChainError, ParsedCertificate};
use crate::keys::{EcPublicKey, KeyError};

/// 鍵一致確認のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyMatchError {
    /// 証明書の鍵とリモート鍵が異なる
    #[error("証明書 {subject} の公開鍵 (sha256:{certificate_fingerprint}) がリモート鍵 (sha256:{signer_fingerprint}) と一致しません")]
    KeyMismatch {
        /// 証明書のSubject
        subject: String,
        /// 証明書の公開鍵フィンガープリント
        certificate_fingerprint: String,
        /// リモート鍵の公開鍵フィンガープリント
        signer_fingerprint: String,
    },
    /// 証明書の鍵を読み込めない
    #[error(transparent)]
    Certificate(#[from] ChainError),
    /// リモート鍵を読み込めない
    #[error("リモート鍵の公開鍵を読み込めません: {0}")]
    SignerKey(#[from] KeyError),
}

/// 2つの鍵の比較結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComparison {
    /// 証明書のSubject
    pub subject: String,
    /// 証明書の公開鍵フィンガープリント（hex）
    pub certificate_fingerprint: String,
    /// リモート鍵の公開鍵フィンガープリント（hex）
    pub signer_fingerprint: String,
    /// 一致する場合 true
    pub matches: bool,
}

/// 2つのSubjectPublicKeyInfoが同じ鍵を表す場合 true。
///
/// いずれかが読み込めない場合は false。
pub fn public_keys_equal(cert_spki: &[u8], signer_spki: &[u8]) -> bool {
    match (
        EcPublicKey::from_spki_der(cert_spki),
        EcPublicKey::from_spki_der(signer_spki),
    ) {
        (Ok(a), Ok(b)) => a.curve() == b.curve() && a.to_uncompressed_point() == b.to_uncompressed_point(),
        _ => false,
    }
}

/// 証明書の鍵とリモート鍵を比較し、フィンガープリント付きの結果を返す。
pub fn compare(
    certificate: &ParsedCertificate,
    signer_spki: &[u8],
) -> Result<KeyComparison, KeyMatchError> {
    let cert_key = certificate.public_key()?;
    let signer_key = EcPublicKey::from_spki_der(signer_spki)?;
    let matches = cert_key.curve() == signer_key.curve()
        && cert_key.to_uncompressed_point() == signer_key.to_uncompressed_point();
    Ok(KeyComparison {
        subject: certificate.subject().to_string(),
        certificate_fingerprint: cert_key.fingerprint(),
        signer_fingerprint: signer_key.fingerprint(),
        matches,
    })
}

/// 証明書の鍵がリモート鍵と異なる場合 true。読み込めない鍵も不一致とみなす。
pub fn key_mismatch(certificate: &ParsedCertificate, signer_spki: &[u8]) -> bool {
    compare(certificate, signer_spki).map_or(true, |c| !c.matches)
}

/// 証明書の鍵がリモート鍵と一致することを確認する。
pub fn ensure_key_match(
    certificate: &ParsedCertificate,
    signer_spki: &[u8],
) -> Result<(), KeyMatchError> {
    let comparison = compare(certificate, signer_spki)?;
    if !comparison.matches {
        tracing::warn!(
            subject = %comparison.subject,
            certificate_key = %comparison.certificate_fingerprint,
            signer_key = %comparison.signer_fingerprint,
            "証明書とリモート鍵が一致しません"
        );
        return Err(KeyMatchError::KeyMismatch {
            subject: comparison.subject,
            certificate_fingerprint: comparison.certificate_fingerprint,
            signer_fingerprint: comparison.signer_fingerprint,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{random_p256_key, spki_der, TestPki};
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    /// 鍵Aの証明書と鍵Bのリモート鍵は不一致、鍵Aなら一致
    #[test]
    fn test_key_mismatch_detection() {
        let pki = TestPki::generate();
        let leaf = ParsedCertificate::from_der(&pki.leaf).unwrap();

        let key_a = spki_der(pki.leaf_key.verifying_key());
        let key_b = spki_der(random_p256_key().verifying_key());

        assert!(!key_mismatch(&leaf, &key_a));
        assert!(key_mismatch(&leaf, &key_b));
        assert!(ensure_key_match(&leaf, &key_a).is_ok());
        match ensure_key_match(&leaf, &key_b) {
            Err(KeyMatchError::KeyMismatch {
                subject,
                certificate_fingerprint,
                signer_fingerprint,
            }) => {
                assert_eq!(subject, "CN=Test Leaf");
                assert_ne!(certificate_fingerprint, signer_fingerprint);
            }
            other => panic!("KeyMismatchを期待しました: {other:?}"),
        }
    }

    /// 圧縮点で表現された同じ鍵は一致とみなす
    #[test]
    fn test_compressed_point_normalised() {
        let key = random_p256_key();
        let uncompressed = spki_der(key.verifying_key());

        let public = p256::PublicKey::from(key.verifying_key());
        let compressed = compressed_spki(
            &algorithm_identifier(&uncompressed),
            public.to_encoded_point(true).as_bytes(),
        );

        assert!(public_keys_equal(&uncompressed, &compressed));
        assert!(!public_keys_equal(&uncompressed, &spki_der(random_p256_key().verifying_key())));
        assert!(!public_keys_equal(&uncompressed, b"not a key"));
    }

    /// SPKIからAlgorithmIdentifier要素を取り出す
    fn algorithm_identifier(spki: &[u8]) -> Vec<u8> {
        let outer = crate::asn1::read_tlv(spki, 0).unwrap();
        crate::asn1::read_tlv(spki, outer.value_offset())
            .unwrap()
            .raw
            .to_vec()
    }

    fn compressed_spki(algorithm: &[u8], point: &[u8]) -> Vec<u8> {
        use crate::asn1::{encode_tlv, TAG_BIT_STRING, TAG_SEQUENCE};
        let mut bits = vec![0x00];
        bits.extend_from_slice(point);
        let mut body = algorithm.to_vec();
        body.extend(encode_tlv(TAG_BIT_STRING, &bits));
        encode_tlv(TAG_SEQUENCE, &body)
    }
}
