//! # サブコマンドの処理
//!
//! ファイル読み込みは呼び出し側で行い、ここではPEM文字列を受け取ってレポートを返す。

use std::fmt::Write as _;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use provenance_core::{SignatureAssembler, SigningContext};
use provenance_crypto::asn1;
use provenance_crypto::keymatch;
use provenance_crypto::{build_chain, CertificateBundle, ChainRole, ParsedCertificate};
use provenance_signer::RemoteSigner;

fn display_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// 証明書のレポートを作成する。`ca_pem` があれば発行者署名も検証する。
pub fn inspect(cert_pem: &str, ca_pem: Option<&str>, at: SystemTime) -> anyhow::Result<String> {
    let cert = ParsedCertificate::from_pem(cert_pem)?;
    let mut out = String::new();

    writeln!(out, "Subject:    {}", cert.subject())?;
    writeln!(out, "Issuer:     {}", cert.issuer())?;
    writeln!(out, "Not Before: {}", display_time(cert.not_before()))?;
    writeln!(out, "Not After:  {}", display_time(cert.not_after()))?;
    let status = if cert.is_valid_at(at) {
        "valid"
    } else if at < cert.not_before() {
        "not yet valid"
    } else {
        "expired"
    };
    writeln!(out, "Status:     {status}")?;
    writeln!(out, "Serial:     {}", cert.serial_hex())?;

    match cert.signature_algorithm() {
        Ok(algorithm) => writeln!(
            out,
            "Signature:  {} ({})",
            algorithm,
            cert.signature_algorithm_oid()
        )?,
        Err(_) => writeln!(out, "Signature:  {} (unsupported)", cert.signature_algorithm_oid())?,
    }

    match cert.public_key() {
        Ok(key) => {
            writeln!(out, "Public Key: EC {}", key.curve())?;
            writeln!(out, "Key SHA256: {}", key.fingerprint())?;
        }
        Err(e) => writeln!(out, "Public Key: {e}")?,
    }
    writeln!(out, "SHA256:     {}", cert.fingerprint_sha256())?;

    if let Some(ca_pem) = ca_pem {
        let ca = ParsedCertificate::from_pem(ca_pem)?;
        match cert.verify_signed_by(&ca) {
            Ok(()) => writeln!(out, "CA Check:   signed by {}", ca.subject())?,
            Err(e) => writeln!(out, "CA Check:   FAILED ({e})")?,
        }
    }
    Ok(out)
}

/// バンドルとルートからチェーンを構築し、リーフ側から順に一覧にする。
pub fn verify_chain(bundle_pem: &str, root_pem: &str, at: SystemTime) -> anyhow::Result<String> {
    let bundle = CertificateBundle::from_pem(bundle_pem)?;
    let root = ParsedCertificate::from_pem(root_pem)?;
    let chain = build_chain(&bundle, &root, at)?;

    let mut out = String::new();
    for (index, cert) in chain.certificates().iter().enumerate() {
        let role = match chain.role_of(index) {
            Some(ChainRole::Leaf) => "leaf",
            Some(ChainRole::Intermediate) => "intermediate",
            Some(ChainRole::Root) | None => "root",
        };
        writeln!(out, "[{index}] {role:<12} {}", cert.subject())?;
    }
    writeln!(out, "OK: chain of {} verified at {}", chain.len(), display_time(at))?;
    Ok(out)
}

/// リモート鍵で新しいCSRを作成し、PEMで返す。
pub async fn create_csr(
    assembler: &SignatureAssembler,
    ctx: &SigningContext,
    subject: &str,
) -> anyhow::Result<String> {
    let csr = assembler.create_csr(ctx, subject).await?;
    Ok(asn1::csr_to_pem(&csr)?)
}

/// 既存CSRのCRIにリモート鍵で署名し直し、PEMで返す。
pub async fn sign_csr(
    assembler: &SignatureAssembler,
    ctx: &SigningContext,
    csr_pem: &str,
) -> anyhow::Result<String> {
    let csr_der = asn1::csr_from_pem(csr_pem)?;
    let signed = assembler.sign_csr(ctx, &csr_der).await?;
    Ok(asn1::csr_to_pem(&signed)?)
}

/// 証明書の鍵とリモート鍵を比較する。一致すれば `Ok((report, true))`。
pub async fn key_match(
    assembler: &SignatureAssembler,
    ctx: &SigningContext,
    cert_pem: &str,
) -> anyhow::Result<(String, bool)> {
    let cert = ParsedCertificate::from_pem(cert_pem)?;
    let info = assembler
        .signer()
        .get_public_key(&ctx.key_id)
        .await
        .with_context(|| format!("鍵 {} の公開鍵を取得できません", ctx.key_id))?;
    let comparison = keymatch::compare(&cert, &info.public_key_der)?;

    let mut out = String::new();
    writeln!(out, "Certificate: {}", comparison.subject)?;
    writeln!(out, "  key sha256: {}", comparison.certificate_fingerprint)?;
    writeln!(out, "Remote key:  {}", ctx.key_id)?;
    writeln!(out, "  key sha256: {}", comparison.signer_fingerprint)?;
    writeln!(
        out,
        "{}",
        if comparison.matches { "MATCH" } else { "MISMATCH" }
    )?;
    Ok((out, comparison.matches))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use provenance_crypto::test_support::{
        certificate_pem, csr_der, private_key_pem, random_p256_key, TestPki,
    };
    use provenance_signer::InMemorySigner;

    fn now() -> SystemTime {
        SystemTime::now()
    }

    fn local_assembler(pki: &TestPki) -> (SignatureAssembler, SigningContext) {
        let signer = InMemorySigner::from_pem("local", &private_key_pem(&pki.leaf_key)).unwrap();
        let signer: Arc<dyn RemoteSigner> = Arc::new(signer);
        (SignatureAssembler::new(signer), SigningContext::new("local"))
    }

    #[test]
    fn test_inspect_reports_certificate() {
        let pki = TestPki::generate();
        let report = inspect(
            &certificate_pem(&pki.leaf),
            Some(&certificate_pem(&pki.intermediate)),
            now(),
        )
        .unwrap();
        assert!(report.contains("Subject:    CN=Test Leaf"));
        assert!(report.contains("Issuer:     CN=Test Intermediate"));
        assert!(report.contains("Status:     valid"));
        assert!(report.contains("Serial:     03"));
        assert!(report.contains("1.2.840.10045.4.3.2"));
        assert!(report.contains("Public Key: EC P-256"));
        assert!(report.contains("CA Check:   signed by CN=Test Intermediate"));
    }

    #[test]
    fn test_inspect_wrong_ca_and_expiry() {
        let pki = TestPki::generate();
        let far_future = SystemTime::UNIX_EPOCH + Duration::from_secs(4_000_000_000);
        let report = inspect(
            &certificate_pem(&pki.leaf),
            Some(&pki.root_pem()),
            far_future,
        )
        .unwrap();
        assert!(report.contains("Status:     expired"));
        assert!(report.contains("CA Check:   FAILED"));
    }

    #[test]
    fn test_verify_chain_lists_roles() {
        let pki = TestPki::generate();
        let report = verify_chain(&pki.bundle_pem(), &pki.root_pem(), now()).unwrap();
        assert!(report.contains("[0] leaf         CN=Test Leaf"));
        assert!(report.contains("[1] intermediate CN=Test Intermediate"));
        assert!(report.contains("[2] root         CN=Test Root"));
        assert!(report.contains("OK: chain of 3"));
    }

    #[test]
    fn test_verify_chain_untrusted_root() {
        let pki = TestPki::generate();
        let other = TestPki::generate();
        assert!(verify_chain(&pki.bundle_pem(), &other.root_pem(), now()).is_err());
    }

    #[tokio::test]
    async fn test_create_and_sign_csr_with_local_key() {
        let pki = TestPki::generate();
        let (assembler, ctx) = local_assembler(&pki);

        let created = create_csr(&assembler, &ctx, "CN=cli.example,O=Example").await.unwrap();
        assert!(created.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

        let template = asn1::csr_to_pem(&csr_der(&pki.leaf_key, "CN=template")).unwrap();
        let signed = sign_csr(&assembler, &ctx, &template).await.unwrap();
        let der = asn1::csr_from_pem(&signed).unwrap();
        assert_eq!(
            asn1::extract_signing_input(&der).unwrap(),
            asn1::extract_signing_input(&csr_der(&pki.leaf_key, "CN=template")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_key_match() {
        let pki = TestPki::generate();
        let (assembler, ctx) = local_assembler(&pki);

        let (report, matches) = key_match(&assembler, &ctx, &certificate_pem(&pki.leaf))
            .await
            .unwrap();
        assert!(matches);
        assert!(report.ends_with("MATCH\n"));

        let other = TestPki::with_leaf_key(random_p256_key());
        let (report, matches) = key_match(&assembler, &ctx, &certificate_pem(&other.leaf))
            .await
            .unwrap();
        assert!(!matches);
        assert!(report.contains("MISMATCH"));
    }
}
