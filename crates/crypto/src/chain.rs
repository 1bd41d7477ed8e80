//! # 証明書チェーン検証
//!
//! 順序を問わない証明書バンドルから リーフ → 中間CA群 → ルート の順序付きチェーンを構築し、
//! 有効期間と各リンクの署名を検証する。
//!
//! ## 手順
//! 1. Subjectで索引を作り、同一Subjectの異なる証明書があれば曖昧として拒否する
//! 2. 他のどの証明書のIssuerにもなっていない証明書をリーフとする
//! 3. Issuer → Subject をたどり、信頼済みルートに到達するまで辿る
//! 4. チェーン全体の有効期間を確認する（署名検証より先）
//! 5. 隣接する各ペアの署名を子の署名アルゴリズムで検証し、発行者が basicConstraints で
//!    cA=true を宣言していることを確認する。最後にルートの自己署名を検証する
//!
//! 入力の物理的な順序は信用しない。チェーン上の役割（リーフ・中間・ルート）は位置から計算する。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::SystemTime;

use der::oid::AssociatedOid;
use der::{Decode, DecodeOwned, Encode};
use provenance_types::SigningAlgorithm;
use sha2::{Digest, Sha256};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::Certificate;

use crate::asn1;
use crate::keys::{EcPublicKey, KeyError};

/// チェーンの最大長（リーフとルートを含む）。
pub const MAX_CHAIN_DEPTH: usize = 16;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// チェーン検証のエラー型。すべてのバリアントが対象証明書のSubjectを含む。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// バンドルに証明書が含まれていない
    #[error("証明書バンドルが空です")]
    EmptyBundle,
    /// 証明書のパースに失敗
    #[error("証明書のパースに失敗 ({certificate}): {reason}")]
    CertificateParse {
        /// 証明書の位置またはSubject
        certificate: String,
        /// 理由
        reason: String,
    },
    /// チェーンを一意に決定できない
    #[error("証明書チェーンが曖昧です ({subject}): {reason}")]
    AmbiguousChain {
        /// 対象証明書のSubject
        subject: String,
        /// 理由
        reason: String,
    },
    /// 必要な発行者の証明書が見つからない
    #[error("証明書チェーンが途切れています: {subject} の発行者 {issuer} が見つかりません")]
    BrokenChain {
        /// 発行者を探していた証明書のSubject
        subject: String,
        /// 見つからなかった発行者
        issuer: String,
    },
    /// 検証時刻が有効期間外
    #[error("証明書 {subject} は {at} 時点で有効期間外です ({not_before} 〜 {not_after})")]
    ExpiredCertificate {
        /// 対象証明書のSubject
        subject: String,
        /// 有効期間の開始
        not_before: String,
        /// 有効期間の終了
        not_after: String,
        /// 検証時刻
        at: String,
    },
    /// 署名が発行者の鍵で検証できない
    #[error("証明書 {subject} の署名検証に失敗 (発行者 {issuer}): {reason}")]
    InvalidSignature {
        /// 対象証明書のSubject
        subject: String,
        /// 発行者のSubject
        issuer: String,
        /// 理由
        reason: String,
    },
    /// CAではない証明書が他の証明書を発行している
    #[error("証明書 {subject} はCAではないため {issued} の発行者になれません")]
    NotCertificateAuthority {
        /// 発行者側の証明書のSubject
        subject: String,
        /// 発行された証明書のSubject
        issued: String,
    },
    /// 信頼済みルート以外の自己署名証明書で終わっている
    #[error("チェーンが信頼されていないルート {subject} で終わっています")]
    UntrustedRoot {
        /// 終端の自己署名証明書のSubject
        subject: String,
    },
    /// 対応していない署名アルゴリズム
    #[error("証明書 {subject} の署名アルゴリズム {algorithm} には対応していません")]
    UnsupportedAlgorithm {
        /// 対象証明書のSubject
        subject: String,
        /// アルゴリズムOID
        algorithm: String,
    },
}

// ---------------------------------------------------------------------------
// 証明書
// ---------------------------------------------------------------------------

/// パース済みのX.509証明書。元のDERを保持し、パース後は変更しない。
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    der: Vec<u8>,
    certificate: Certificate,
    subject_der: Vec<u8>,
    issuer_der: Vec<u8>,
    subject: String,
    issuer: String,
}

impl PartialEq for ParsedCertificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for ParsedCertificate {}

impl ParsedCertificate {
    /// DERから証明書をパースする。
    pub fn from_der(der: &[u8]) -> Result<Self, ChainError> {
        Self::parse(der, "DER")
    }

    /// PEM（`CERTIFICATE` ラベル1つ）から証明書をパースする。
    pub fn from_pem(pem: &str) -> Result<Self, ChainError> {
        let bundle = CertificateBundle::from_pem(pem)?;
        let mut certificates = bundle.certificates.into_iter();
        match (certificates.next(), certificates.next()) {
            (Some(cert), None) => Ok(cert),
            (Some(_), Some(_)) => Err(ChainError::CertificateParse {
                certificate: "PEM".into(),
                reason: "証明書が複数含まれています".into(),
            }),
            (None, _) => Err(ChainError::EmptyBundle),
        }
    }

    fn parse(der: &[u8], position: &str) -> Result<Self, ChainError> {
        let parse_error = |reason: String| ChainError::CertificateParse {
            certificate: position.to_string(),
            reason,
        };
        let certificate = Certificate::from_der(der).map_err(|e| parse_error(e.to_string()))?;
        let tbs = &certificate.tbs_certificate;
        let subject_der = tbs.subject.to_der().map_err(|e| parse_error(e.to_string()))?;
        let issuer_der = tbs.issuer.to_der().map_err(|e| parse_error(e.to_string()))?;
        let subject = display_name(&tbs.subject);
        let issuer = display_name(&tbs.issuer);
        Ok(Self {
            der: der.to_vec(),
            certificate,
            subject_der,
            issuer_der,
            subject,
            issuer,
        })
    }

    /// 元のDER。
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// x509-certによるパース結果。
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Subject（RFC 4514形式）。
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer（RFC 4514形式）。
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Subject == Issuer の場合 true。
    pub fn is_self_issued(&self) -> bool {
        self.subject_der == self.issuer_der
    }

    /// 有効期間の開始。
    pub fn not_before(&self) -> SystemTime {
        self.certificate.tbs_certificate.validity.not_before.to_system_time()
    }

    /// 有効期間の終了。
    pub fn not_after(&self) -> SystemTime {
        self.certificate.tbs_certificate.validity.not_after.to_system_time()
    }

    /// `at` が有効期間内（両端を含む）の場合 true。
    pub fn is_valid_at(&self, at: SystemTime) -> bool {
        self.not_before() <= at && at <= self.not_after()
    }

    /// シリアル番号（hex）。
    pub fn serial_hex(&self) -> String {
        hex::encode(self.certificate.tbs_certificate.serial_number.as_bytes())
    }

    /// 証明書全体のSHA-256フィンガープリント（hex）。
    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// 署名アルゴリズムのOID（ドット表記）。
    pub fn signature_algorithm_oid(&self) -> String {
        self.certificate.signature_algorithm.oid.to_string()
    }

    /// 署名アルゴリズム。対応外のOIDは [`ChainError::UnsupportedAlgorithm`]。
    pub fn signature_algorithm(&self) -> Result<SigningAlgorithm, ChainError> {
        let oid = self.signature_algorithm_oid();
        match oid.as_str() {
            asn1::ECDSA_WITH_SHA256 => Ok(SigningAlgorithm::EcdsaSha256),
            asn1::ECDSA_WITH_SHA384 => Ok(SigningAlgorithm::EcdsaSha384),
            _ => Err(ChainError::UnsupportedAlgorithm {
                subject: self.subject.clone(),
                algorithm: oid,
            }),
        }
    }

    /// SubjectPublicKeyInfo（DER）。
    pub fn public_key_der(&self) -> Result<Vec<u8>, ChainError> {
        self.certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| ChainError::CertificateParse {
                certificate: self.subject.clone(),
                reason: e.to_string(),
            })
    }

    /// 公開鍵。P-256/P-384以外は [`ChainError::UnsupportedAlgorithm`]。
    pub fn public_key(&self) -> Result<EcPublicKey, ChainError> {
        let spki = self.public_key_der()?;
        EcPublicKey::from_spki_der(&spki).map_err(|_| ChainError::UnsupportedAlgorithm {
            subject: self.subject.clone(),
            algorithm: self
                .certificate
                .tbs_certificate
                .subject_public_key_info
                .algorithm
                .oid
                .to_string(),
        })
    }

    fn extension<T: AssociatedOid + DecodeOwned>(&self) -> Result<Option<T>, ChainError> {
        let Some(extensions) = &self.certificate.tbs_certificate.extensions else {
            return Ok(None);
        };
        let Some(extension) = extensions.iter().find(|e| e.extn_id == T::OID) else {
            return Ok(None);
        };
        T::from_der(extension.extn_value.as_bytes())
            .map(Some)
            .map_err(|e| ChainError::CertificateParse {
                certificate: self.subject.clone(),
                reason: format!("拡張 {}: {e}", T::OID),
            })
    }

    /// basicConstraints で cA=true を宣言している場合 true。
    pub fn is_ca(&self) -> Result<bool, ChainError> {
        Ok(self
            .extension::<BasicConstraints>()?
            .is_some_and(|constraints| constraints.ca))
    }

    /// SubjectAltName の最初のURI。
    pub fn member_uri(&self) -> Result<Option<String>, ChainError> {
        let Some(names) = self.extension::<SubjectAltName>()? else {
            return Ok(None);
        };
        Ok(names.0.into_iter().find_map(|name| match name {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
            _ => None,
        }))
    }

    /// 署名者としての識別子。SubjectAltName のURI、なければSubject。
    pub fn member_id(&self) -> Result<String, ChainError> {
        Ok(self.member_uri()?.unwrap_or_else(|| self.subject.clone()))
    }

    /// この証明書の署名を `issuer` の公開鍵で検証する。
    ///
    /// 署名対象は元のDERから切り出したTBSCertificateで、再エンコードはしない。
    pub fn verify_signed_by(&self, issuer: &ParsedCertificate) -> Result<(), ChainError> {
        let algorithm = self.signature_algorithm()?;
        let issuer_key = issuer.public_key()?;
        let parts = asn1::split_signed_structure(&self.der).map_err(|e| {
            ChainError::CertificateParse {
                certificate: self.subject.clone(),
                reason: e.to_string(),
            }
        })?;

        issuer_key
            .verify(algorithm, parts.tbs, parts.signature)
            .map_err(|e: KeyError| ChainError::InvalidSignature {
                subject: self.subject.clone(),
                issuer: issuer.subject.clone(),
                reason: e.to_string(),
            })
    }

    /// PEMエンコード。
    pub fn to_pem(&self) -> Result<String, ChainError> {
        der::pem::encode_string("CERTIFICATE", der::pem::LineEnding::LF, &self.der).map_err(|e| {
            ChainError::CertificateParse {
                certificate: self.subject.clone(),
                reason: e.to_string(),
            }
        })
    }
}

impl fmt::Display for ParsedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)
    }
}

fn display_name(name: &x509_cert::name::Name) -> String {
    let rendered = name.to_string();
    if rendered.is_empty() {
        "(empty subject)".to_string()
    } else {
        rendered
    }
}

fn display_time(time: SystemTime) -> String {
    der::DateTime::from_system_time(time)
        .map(|dt| dt.to_string())
        .unwrap_or_else(|_| format!("{time:?}"))
}

// ---------------------------------------------------------------------------
// バンドル
// ---------------------------------------------------------------------------

/// 順序を持たない証明書の集合。バイト列が同一の重複は1つにまとめる。
#[derive(Debug, Clone, Default)]
pub struct CertificateBundle {
    certificates: Vec<ParsedCertificate>,
}

impl CertificateBundle {
    /// 連結されたPEM（`CERTIFICATE` ブロック）から読み込む。
    pub fn from_pem(pem: &str) -> Result<Self, ChainError> {
        let mut ders = Vec::new();
        let mut rest = pem;
        while let Some(start) = rest.find(PEM_BEGIN) {
            let block = &rest[start..];
            let end = block.find(PEM_END).ok_or_else(|| ChainError::CertificateParse {
                certificate: format!("PEM block #{}", ders.len()),
                reason: "END行がありません".into(),
            })?;
            let block_len = end + PEM_END.len();
            let (label, der) = der::pem::decode_vec(block[..block_len].as_bytes()).map_err(|e| {
                ChainError::CertificateParse {
                    certificate: format!("PEM block #{}", ders.len()),
                    reason: e.to_string(),
                }
            })?;
            if label != "CERTIFICATE" {
                return Err(ChainError::CertificateParse {
                    certificate: format!("PEM block #{}", ders.len()),
                    reason: format!("想定外のPEMラベル: {label}"),
                });
            }
            ders.push(der);
            rest = &block[block_len..];
        }
        Self::from_der_list(ders)
    }

    /// DERのリストから読み込む。
    pub fn from_der_list<I, B>(ders: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut bundle = Self::default();
        for (index, der) in ders.into_iter().enumerate() {
            let cert = ParsedCertificate::parse(der.as_ref(), &format!("#{index}"))?;
            bundle.push(cert);
        }
        Ok(bundle)
    }

    /// 証明書を追加する。同一のDERが既にあれば何もしない。
    pub fn push(&mut self, certificate: ParsedCertificate) {
        if !self.certificates.contains(&certificate) {
            self.certificates.push(certificate);
        }
    }

    /// 証明書の数。
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// 空の場合 true。
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// 証明書一覧。
    pub fn certificates(&self) -> &[ParsedCertificate] {
        &self.certificates
    }
}

// ---------------------------------------------------------------------------
// 順序付きチェーン
// ---------------------------------------------------------------------------

/// チェーン上の位置から決まる役割。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    /// 末端のエンドエンティティ証明書
    Leaf,
    /// 中間CA
    Intermediate,
    /// 信頼済みルート
    Root,
}

/// 検証済みの リーフ → 中間CA群 → ルート の並び。
#[derive(Debug, Clone)]
pub struct OrderedChain {
    certificates: Vec<ParsedCertificate>,
}

impl OrderedChain {
    /// リーフ証明書。
    pub fn leaf(&self) -> &ParsedCertificate {
        &self.certificates[0]
    }

    /// ルート証明書。
    pub fn root(&self) -> &ParsedCertificate {
        &self.certificates[self.certificates.len() - 1]
    }

    /// 中間CA証明書（リーフ側から順）。
    pub fn intermediates(&self) -> &[ParsedCertificate] {
        if self.certificates.len() <= 2 {
            return &[];
        }
        &self.certificates[1..self.certificates.len() - 1]
    }

    /// `index` 番目の証明書の役割。単独のルートのみのチェーンではルートとする。
    pub fn role_of(&self, index: usize) -> Option<ChainRole> {
        let last = self.certificates.len().checked_sub(1)?;
        match index {
            i if i > last => None,
            i if i == last => Some(ChainRole::Root),
            0 => Some(ChainRole::Leaf),
            _ => Some(ChainRole::Intermediate),
        }
    }

    /// チェーンの長さ。
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// 常に false（空のチェーンは構築されない）。
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// リーフ側からの証明書一覧。
    pub fn certificates(&self) -> &[ParsedCertificate] {
        &self.certificates
    }

    /// リーフ側からのDERリスト。
    pub fn to_der_list(&self) -> Vec<Vec<u8>> {
        self.certificates.iter().map(|c| c.der.clone()).collect()
    }
}

/// バンドルと信頼済みルートから、時刻 `at` で有効なチェーンを構築・検証する。
pub fn build_chain(
    bundle: &CertificateBundle,
    trusted_root: &ParsedCertificate,
    at: SystemTime,
) -> Result<OrderedChain, ChainError> {
    if bundle.is_empty() {
        return Err(ChainError::EmptyBundle);
    }

    // 信頼済みルート自体はSubject索引から除く（同名の別証明書はUntrustedRootとして扱う）
    let candidates: Vec<&ParsedCertificate> = bundle
        .certificates
        .iter()
        .filter(|c| *c != trusted_root)
        .collect();

    let mut by_subject: HashMap<&[u8], &ParsedCertificate> = HashMap::new();
    for cert in candidates.iter().copied() {
        if by_subject.insert(&cert.subject_der, cert).is_some() {
            return Err(ChainError::AmbiguousChain {
                subject: cert.subject.clone(),
                reason: "同じSubjectを持つ異なる証明書が複数あります".into(),
            });
        }
    }

    let leaf = find_leaf(&candidates, trusted_root)?;
    let ordered = walk_to_root(leaf, &by_subject, trusted_root)?;

    // 有効期間は署名より先にチェーン全体を確認する
    for cert in &ordered {
        if !cert.is_valid_at(at) {
            tracing::warn!(subject = %cert.subject, "有効期間外の証明書");
            return Err(ChainError::ExpiredCertificate {
                subject: cert.subject.clone(),
                not_before: display_time(cert.not_before()),
                not_after: display_time(cert.not_after()),
                at: display_time(at),
            });
        }
    }

    for pair in ordered.windows(2) {
        pair[0].verify_signed_by(pair[1])?;
        if !pair[1].is_ca()? {
            return Err(ChainError::NotCertificateAuthority {
                subject: pair[1].subject.clone(),
                issued: pair[0].subject.clone(),
            });
        }
    }
    trusted_root.verify_signed_by(trusted_root)?;

    tracing::debug!(
        leaf = %ordered[0].subject,
        length = ordered.len(),
        "証明書チェーンを検証しました"
    );

    Ok(OrderedChain {
        certificates: ordered.into_iter().cloned().collect(),
    })
}

/// 他の証明書のIssuerになっていない証明書をリーフとして選ぶ。
fn find_leaf<'a>(
    candidates: &[&'a ParsedCertificate],
    trusted_root: &'a ParsedCertificate,
) -> Result<&'a ParsedCertificate, ChainError> {
    if candidates.is_empty() {
        // バンドルが信頼済みルートのみ
        return Ok(trusted_root);
    }

    let issuers: HashSet<&[u8]> = candidates
        .iter()
        .filter(|c| !c.is_self_issued())
        .map(|c| c.issuer_der.as_slice())
        .collect();

    let leaves: Vec<&ParsedCertificate> = candidates
        .iter()
        .copied()
        .filter(|c| !issuers.contains(c.subject_der.as_slice()))
        .collect();

    match leaves.as_slice() {
        [leaf] => Ok(*leaf),
        [] => Err(ChainError::AmbiguousChain {
            subject: candidates[0].subject.clone(),
            reason: "リーフ証明書を特定できません（循環しています）".into(),
        }),
        many => Err(ChainError::AmbiguousChain {
            subject: many
                .iter()
                .map(|c| c.subject.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
            reason: "リーフ候補が複数あります".into(),
        }),
    }
}

/// リーフから信頼済みルートまでIssuerをたどる。
fn walk_to_root<'a>(
    leaf: &'a ParsedCertificate,
    by_subject: &HashMap<&[u8], &'a ParsedCertificate>,
    trusted_root: &'a ParsedCertificate,
) -> Result<Vec<&'a ParsedCertificate>, ChainError> {
    let mut chain = vec![leaf];
    let mut visited: HashSet<&[u8]> = HashSet::new();
    visited.insert(&leaf.subject_der);
    let mut current = leaf;

    loop {
        if current == trusted_root {
            return Ok(chain);
        }
        if current.is_self_issued() {
            return Err(ChainError::UntrustedRoot {
                subject: current.subject.clone(),
            });
        }
        if current.issuer_der == trusted_root.subject_der {
            chain.push(trusted_root);
            return Ok(chain);
        }
        let issuer = by_subject
            .get(current.issuer_der.as_slice())
            .copied()
            .ok_or_else(|| ChainError::BrokenChain {
                subject: current.subject.clone(),
                issuer: current.issuer.clone(),
            })?;
        if !visited.insert(&issuer.subject_der) || chain.len() >= MAX_CHAIN_DEPTH {
            return Err(ChainError::AmbiguousChain {
                subject: issuer.subject.clone(),
                reason: "発行者の連鎖が循環しているか長すぎます".into(),
            });
        }
        chain.push(issuer);
        current = issuer;
    }
}
