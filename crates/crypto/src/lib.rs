//! # Provenance Signer 暗号処理
//!
//! リモート鍵による署名の組み立てと、署名者証明書チェーンの検証に必要な
//! 暗号プリミティブを提供する。すべて同期的な純粋関数で、I/Oは行わない。
//!
//! ## 構成
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`asn1`] | DERの切り出し・組み立て（CSR / 証明書 / ECDSA署名値） |
//! | [`signature`] | 固定長 `(r, s)` 署名値 |
//! | [`keys`] | P-256 / P-384 公開鍵と署名検証 |
//! | [`chain`] | 証明書バンドルからのチェーン構築・検証 |
//! | [`keymatch`] | 証明書の鍵とリモート鍵の一致確認 |
//!
//! ## 対応アルゴリズム
//! | 署名 | 曲線 | ハッシュ |
//! |------|------|---------|
//! | ECDSA_SHA_256 | P-256 | SHA-256 |
//! | ECDSA_SHA_384 | P-384 | SHA-384 |

pub mod asn1;
pub mod chain;
pub mod keymatch;
pub mod keys;
pub mod signature;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use asn1::DerError;
pub use chain::{build_chain, CertificateBundle, ChainError, ChainRole, OrderedChain, ParsedCertificate};
pub use keymatch::{ensure_key_match, key_mismatch, public_keys_equal, KeyComparison, KeyMatchError};
pub use keys::{EcPublicKey, KeyError};
pub use signature::{RawSignature, SignatureError};
