//! # テスト用フィクスチャ
//!
//! P-256鍵で ルート → 中間CA → リーフ の証明書と、署名済みCSRを実行時に生成する。
//! ルートと中間CAは basicConstraints (cA=true) を持ち、リーフには署名者URIを
//! SubjectAltName として付けられる。
//! `test-utils` フィーチャで他クレートのテストからも利用できる。

use std::str::FromStr;

use der::asn1::{BitString, Ia5String, OctetString, UtcTime};
use der::oid::AssociatedOid;
use der::{Decode, Encode};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::CertReqInfo;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate};

use crate::asn1;

/// 新しいP-256署名鍵を生成する。
pub fn random_p256_key() -> SigningKey {
    SigningKey::random(&mut rand::rngs::OsRng)
}

/// 公開鍵のSubjectPublicKeyInfo（DER）。
pub fn spki_der(key: &VerifyingKey) -> Vec<u8> {
    key.to_public_key_der().unwrap().as_bytes().to_vec()
}

/// 秘密鍵のPKCS#8 PEM。
pub fn private_key_pem(key: &SigningKey) -> String {
    key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
}

/// `from` 年1月1日から `to` 年12月31日までの有効期間。
pub fn validity(from: u16, to: u16) -> (der::DateTime, der::DateTime) {
    (
        der::DateTime::new(from, 1, 1, 0, 0, 0).unwrap(),
        der::DateTime::new(to, 12, 31, 23, 59, 59).unwrap(),
    )
}

fn ecdsa_with_sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: der::asn1::ObjectIdentifier::new_unwrap(asn1::ECDSA_WITH_SHA256),
        parameters: None,
    }
}

fn extension<T: AssociatedOid + Encode>(value: &T, critical: bool) -> Extension {
    Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(value.to_der().unwrap()).unwrap(),
    }
}

/// CA証明書の拡張（basicConstraints cA=true）。
pub fn ca_extensions() -> Vec<Extension> {
    vec![extension(
        &BasicConstraints {
            ca: true,
            path_len_constraint: None,
        },
        true,
    )]
}

/// 署名者URIを SubjectAltName に持つリーフの拡張。
pub fn member_extensions(member: &str) -> Vec<Extension> {
    let uri = GeneralName::UniformResourceIdentifier(Ia5String::new(member).unwrap());
    vec![extension(&SubjectAltName(vec![uri]), false)]
}

/// `issuer_key` で署名した、拡張のない証明書を発行する。
pub fn issue_certificate(
    subject: &str,
    subject_key: &VerifyingKey,
    issuer: &str,
    issuer_key: &SigningKey,
    not_before: der::DateTime,
    not_after: der::DateTime,
    serial: u8,
) -> Vec<u8> {
    issue_certificate_with_extensions(
        subject,
        subject_key,
        issuer,
        issuer_key,
        not_before,
        not_after,
        serial,
        Vec::new(),
    )
}

/// `issuer_key` で署名した、`extensions` 付きの証明書を発行する。
#[allow(clippy::too_many_arguments)]
pub fn issue_certificate_with_extensions(
    subject: &str,
    subject_key: &VerifyingKey,
    issuer: &str,
    issuer_key: &SigningKey,
    not_before: der::DateTime,
    not_after: der::DateTime,
    serial: u8,
    extensions: Vec<Extension>,
) -> Vec<u8> {
    let tbs = TbsCertificate {
        version: x509_cert::certificate::Version::V3,
        serial_number: SerialNumber::new(&[serial]).unwrap(),
        signature: ecdsa_with_sha256(),
        issuer: Name::from_str(issuer).unwrap(),
        validity: Validity {
            not_before: Time::UtcTime(UtcTime::from_date_time(not_before).unwrap()),
            not_after: Time::UtcTime(UtcTime::from_date_time(not_after).unwrap()),
        },
        subject: Name::from_str(subject).unwrap(),
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(&spki_der(subject_key))
            .unwrap(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: (!extensions.is_empty()).then_some(extensions),
    };

    let tbs_der = tbs.to_der().unwrap();
    let signature: DerSignature = issuer_key.sign(&tbs_der);
    Certificate {
        tbs_certificate: tbs,
        signature_algorithm: ecdsa_with_sha256(),
        signature: BitString::from_bytes(signature.as_bytes()).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// 自己署名のCA証明書を発行する。
pub fn self_signed(
    subject: &str,
    key: &SigningKey,
    not_before: der::DateTime,
    not_after: der::DateTime,
) -> Vec<u8> {
    issue_certificate_with_extensions(
        subject,
        key.verifying_key(),
        subject,
        key,
        not_before,
        not_after,
        1,
        ca_extensions(),
    )
}

/// DER証明書のPEM。
pub fn certificate_pem(der: &[u8]) -> String {
    der::pem::encode_string("CERTIFICATE", LineEnding::LF, der).unwrap()
}

/// 未署名のCertificationRequestInfo（DER）。
pub fn certification_request_info(key: &VerifyingKey, subject: &str) -> Vec<u8> {
    CertReqInfo {
        version: x509_cert::request::Version::V1,
        subject: Name::from_str(subject).unwrap(),
        public_key: SubjectPublicKeyInfoOwned::from_der(&spki_der(key)).unwrap(),
        attributes: Default::default(),
    }
    .to_der()
    .unwrap()
}

/// ローカル鍵で署名したCSR（DER）。
pub fn csr_der(key: &SigningKey, subject: &str) -> Vec<u8> {
    let cri = certification_request_info(key.verifying_key(), subject);
    let signature: DerSignature = key.sign(&cri);
    asn1::splice_signed_artifact(&cri, asn1::ECDSA_WITH_SHA256, signature.as_bytes()).unwrap()
}

/// ルート → 中間CA → リーフ の3段PKI。有効期間は2020年〜2049年。
pub struct TestPki {
    /// ルートの署名鍵
    pub root_key: SigningKey,
    /// ルート証明書（DER）
    pub root: Vec<u8>,
    /// 中間CAの署名鍵
    pub intermediate_key: SigningKey,
    /// 中間CA証明書（DER）
    pub intermediate: Vec<u8>,
    /// リーフの署名鍵
    pub leaf_key: SigningKey,
    /// リーフ証明書（DER）
    pub leaf: Vec<u8>,
}

impl TestPki {
    /// 新しい鍵でPKIを生成する。
    pub fn generate() -> Self {
        Self::with_leaf_key(random_p256_key())
    }

    /// 指定したリーフ鍵でPKIを生成する。リーフは SubjectAltName を持たない。
    pub fn with_leaf_key(leaf_key: SigningKey) -> Self {
        Self::build(leaf_key, Vec::new())
    }

    /// 署名者URI `member` を SubjectAltName に持つリーフでPKIを生成する。
    pub fn with_member(leaf_key: SigningKey, member: &str) -> Self {
        Self::build(leaf_key, member_extensions(member))
    }

    fn build(leaf_key: SigningKey, leaf_extensions: Vec<Extension>) -> Self {
        let (nb, na) = validity(2020, 2049);
        let root_key = random_p256_key();
        let intermediate_key = random_p256_key();
        let root = self_signed("CN=Test Root", &root_key, nb, na);
        let intermediate = issue_certificate_with_extensions(
            "CN=Test Intermediate",
            intermediate_key.verifying_key(),
            "CN=Test Root",
            &root_key,
            nb,
            na,
            2,
            ca_extensions(),
        );
        let leaf = issue_certificate_with_extensions(
            "CN=Test Leaf",
            leaf_key.verifying_key(),
            "CN=Test Intermediate",
            &intermediate_key,
            nb,
            na,
            3,
            leaf_extensions,
        );
        Self {
            root_key,
            root,
            intermediate_key,
            intermediate,
            leaf_key,
            leaf,
        }
    }

    /// 同じ中間CAの下に、署名者URI `member` を持つ別のリーフを発行する。
    pub fn issue_member_leaf(
        &self,
        subject: &str,
        key: &VerifyingKey,
        member: &str,
        serial: u8,
    ) -> Vec<u8> {
        let (nb, na) = validity(2020, 2049);
        issue_certificate_with_extensions(
            subject,
            key,
            "CN=Test Intermediate",
            &self.intermediate_key,
            nb,
            na,
            serial,
            member_extensions(member),
        )
    }

    /// ルート証明書のPEM。
    pub fn root_pem(&self) -> String {
        certificate_pem(&self.root)
    }

    /// 署名者バンドル（リーフ + 中間CA）のPEM。
    pub fn bundle_pem(&self) -> String {
        format!(
            "{}{}",
            certificate_pem(&self.leaf),
            certificate_pem(&self.intermediate)
        )
    }
}
