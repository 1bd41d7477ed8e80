//! # Provenance Signer Core
//!
//! リモート鍵による署名済み成果物（CSR・来歴レコード）の組み立てを行う。
//!
//! ## 処理フロー
//! 1. 署名対象バイト列を構築する（CSRはCertificationRequestInfoのDER、
//!    来歴レコードは正規化JSON）
//! 2. [`provenance_signer::RemoteSigner`] に署名を依頼する
//! 3. 返された署名のアルゴリズム・成分長を検査し、署名済み成果物を組み立てる
//! 4. 来歴レコードは署名者の証明書チェーンを添付し、検証時に
//!    [`provenance_crypto::build_chain`] で信頼済みルートまで辿る

pub mod assembler;
pub mod record;
pub mod scheme;

pub use assembler::{AssemblerError, PayloadSignature, SignatureAssembler, SigningContext};
pub use record::{EncodedRecord, Record, RecordError, RecordSigner, SignedBlock};
pub use scheme::{create_cap_provenance_record, create_edp_provenance_record, SchemeUrls};
