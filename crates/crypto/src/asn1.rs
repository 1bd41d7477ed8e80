//! # DER コーデック
//!
//! 署名対象バイト列の切り出しと、署名済みアーティファクト（CSR・証明書）の
//! 再組み立てに必要な最小限のDERエンコード／デコードを提供する。
//!
//! ## 方針
//! - 署名対象（CertificationRequestInfo / TBSCertificate）は構造的なスライスで取り出し、
//!   再エンコードしない。署名はバイト単位で同一の範囲に対して計算される。
//! - 長さは 128 未満で短形式、それ以上で長形式。不定長・高タグ番号形式は入力時に拒否する。
//! - 不正・途中で切れた入力は [`DerError::MalformedStructure`] を返し、部分的な出力は行わない。

use der::asn1::ObjectIdentifier;

/// INTEGER タグ
pub const TAG_INTEGER: u8 = 0x02;
/// BIT STRING タグ
pub const TAG_BIT_STRING: u8 = 0x03;
/// OBJECT IDENTIFIER タグ
pub const TAG_OID: u8 = 0x06;
/// SEQUENCE（constructed）タグ
pub const TAG_SEQUENCE: u8 = 0x30;

/// ecdsa-with-SHA256 (1.2.840.10045.4.3.2)
pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
/// ecdsa-with-SHA384 (1.2.840.10045.4.3.3)
pub const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";

/// 長形式で扱う長さフィールドの最大バイト数。
const MAX_LENGTH_OCTETS: usize = 4;

/// DERコーデックのエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerError {
    /// 構造が不正、または途中で切れている
    #[error("DER構造が不正です (offset {offset}): {reason}")]
    MalformedStructure {
        /// 問題を検出したバイトオフセット
        offset: usize,
        /// 理由
        reason: String,
    },
    /// 署名成分（r または s）が不正
    #[error("署名成分が不正です: {0}")]
    InvalidComponent(&'static str),
    /// OIDが不正
    #[error("OIDが不正です: {0}")]
    InvalidOid(String),
    /// PEMのデコード・エンコードに失敗
    #[error("PEMの処理に失敗: {0}")]
    Pem(String),
}

fn malformed(offset: usize, reason: impl Into<String>) -> DerError {
    DerError::MalformedStructure {
        offset,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// デコード
// ---------------------------------------------------------------------------

/// 1つのTLV要素。オフセットは入力バッファ先頭からの絶対位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// タグバイト
    pub tag: u8,
    /// 要素の開始オフセット
    pub offset: usize,
    /// ヘッダ（タグ + 長さ）のバイト数
    pub header_len: usize,
    /// 値部分
    pub value: &'a [u8],
    /// ヘッダを含む要素全体
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// 値部分の開始オフセット。
    pub fn value_offset(&self) -> usize {
        self.offset + self.header_len
    }

    /// 要素の直後のオフセット。
    pub fn end(&self) -> usize {
        self.offset + self.raw.len()
    }
}

/// `data[pos..]` の先頭にあるTLV要素を読み取る。
pub fn read_tlv(data: &[u8], pos: usize) -> Result<Tlv<'_>, DerError> {
    let tag = *data
        .get(pos)
        .ok_or_else(|| malformed(pos, "タグが途中で切れています"))?;
    if tag & 0x1f == 0x1f {
        return Err(malformed(pos, "高タグ番号形式には対応していません"));
    }

    let len_pos = pos + 1;
    let first = *data
        .get(len_pos)
        .ok_or_else(|| malformed(len_pos, "長さが途中で切れています"))?;

    let (len, len_octets) = if first < 0x80 {
        (first as usize, 1)
    } else if first == 0x80 {
        return Err(malformed(len_pos, "不定長形式は許可されていません"));
    } else {
        let n = (first & 0x7f) as usize;
        if n > MAX_LENGTH_OCTETS {
            return Err(malformed(len_pos, format!("長さフィールドが長すぎます ({n} バイト)")));
        }
        let bytes = data
            .get(len_pos + 1..len_pos + 1 + n)
            .ok_or_else(|| malformed(len_pos, "長さが途中で切れています"))?;
        if bytes[0] == 0 {
            return Err(malformed(len_pos, "長さの先頭に冗長な0があります"));
        }
        let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len < 0x80 {
            return Err(malformed(len_pos, "短形式で表せる長さが長形式で符号化されています"));
        }
        (len, 1 + n)
    };

    let header_len = 1 + len_octets;
    let value_start = pos + header_len;
    let end = value_start
        .checked_add(len)
        .ok_or_else(|| malformed(len_pos, "長さがオーバーフローしました"))?;
    if end > data.len() {
        return Err(malformed(
            value_start,
            format!("値が途中で切れています (必要 {len} バイト, 残り {} バイト)", data.len().saturating_sub(value_start)),
        ));
    }

    Ok(Tlv {
        tag,
        offset: pos,
        header_len,
        value: &data[value_start..end],
        raw: &data[pos..end],
    })
}

/// 期待したタグのTLVを読み取る。
fn expect_tlv<'a>(data: &'a [u8], pos: usize, tag: u8, what: &str) -> Result<Tlv<'a>, DerError> {
    let tlv = read_tlv(data, pos)?;
    if tlv.tag != tag {
        return Err(malformed(
            pos,
            format!("{what}: タグ 0x{tag:02x} を期待しましたが 0x{:02x} でした", tlv.tag),
        ));
    }
    Ok(tlv)
}

/// 入力全体が1つのSEQUENCEであることを確認して返す。
fn outer_sequence(data: &[u8]) -> Result<Tlv<'_>, DerError> {
    let outer = expect_tlv(data, 0, TAG_SEQUENCE, "外側のSEQUENCE")?;
    if outer.end() != data.len() {
        return Err(malformed(outer.end(), "SEQUENCEの後ろに余分なデータがあります"));
    }
    Ok(outer)
}

/// `SEQUENCE { toBeSigned, AlgorithmIdentifier, BIT STRING }` 形式の署名済み構造。
///
/// PKCS#10 CSR とX.509証明書の双方がこの形をとる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedStructure<'a> {
    /// 署名対象部分（CertificationRequestInfo / TBSCertificate）のDER
    pub tbs: &'a [u8],
    /// 署名アルゴリズムのOID
    pub algorithm: ObjectIdentifier,
    /// 署名値（BIT STRINGの内容。未使用ビット数のバイトは除く）
    pub signature: &'a [u8],
}

/// 署名済み構造を3要素に分解する。
pub fn split_signed_structure(der: &[u8]) -> Result<SignedStructure<'_>, DerError> {
    let outer = outer_sequence(der)?;

    let tbs = expect_tlv(der, outer.value_offset(), TAG_SEQUENCE, "署名対象")?;
    let alg = expect_tlv(der, tbs.end(), TAG_SEQUENCE, "AlgorithmIdentifier")?;
    let bits = expect_tlv(der, alg.end(), TAG_BIT_STRING, "署名値")?;
    if bits.end() != outer.end() {
        return Err(malformed(bits.end(), "署名値の後ろに余分な要素があります"));
    }

    let oid_tlv = expect_tlv(der, alg.value_offset(), TAG_OID, "アルゴリズムOID")?;
    let algorithm = ObjectIdentifier::from_bytes(oid_tlv.value)
        .map_err(|e| malformed(oid_tlv.offset, format!("OIDのデコードに失敗: {e}")))?;

    let (unused, signature) = bits
        .value
        .split_first()
        .ok_or_else(|| malformed(bits.value_offset(), "BIT STRINGが空です"))?;
    if *unused != 0 {
        return Err(malformed(bits.value_offset(), "署名値のBIT STRINGに未使用ビットがあります"));
    }

    Ok(SignedStructure {
        tbs: tbs.raw,
        algorithm,
        signature,
    })
}

/// CSRから署名対象（CertificationRequestInfo）のバイト範囲を取り出す。
///
/// 外側のSEQUENCEの最初の要素をそのまま返す。再エンコードは行わない。
pub fn extract_signing_input(csr_der: &[u8]) -> Result<&[u8], DerError> {
    let outer = outer_sequence(csr_der)?;
    let cri = expect_tlv(csr_der, outer.value_offset(), TAG_SEQUENCE, "CertificationRequestInfo")?;
    Ok(cri.raw)
}

// ---------------------------------------------------------------------------
// エンコード
// ---------------------------------------------------------------------------

/// 長さフィールドをエンコードする。
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    let mut out = Vec::with_capacity(1 + significant.len());
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

/// タグと値からTLVを組み立てる。
pub fn encode_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let length = encode_length(value.len());
    let mut out = Vec::with_capacity(1 + length.len() + value.len());
    out.push(tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(value);
    out
}

/// 符号なし整数（ビッグエンディアン）を最小長のINTEGERとしてエンコードする。
///
/// 先頭の0は取り除き、最上位ビットが立つ場合のみ符号ガードの0x00を1バイト付ける。
/// ECDSA署名成分として使うため、0は拒否する。
pub fn encode_unsigned_integer(magnitude: &[u8]) -> Result<Vec<u8>, DerError> {
    let skip = magnitude.iter().take_while(|b| **b == 0).count();
    let trimmed = &magnitude[skip..];
    if trimmed.is_empty() {
        return Err(DerError::InvalidComponent("値が0または空です"));
    }
    let mut value = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        value.push(0x00);
    }
    value.extend_from_slice(trimmed);
    Ok(encode_tlv(TAG_INTEGER, &value))
}

/// ECDSA署名値 `SEQUENCE { INTEGER r, INTEGER s }` をエンコードする。
pub fn encode_signature_value(r: &[u8], s: &[u8]) -> Result<Vec<u8>, DerError> {
    let mut body = encode_unsigned_integer(r)?;
    body.extend(encode_unsigned_integer(s)?);
    Ok(encode_tlv(TAG_SEQUENCE, &body))
}

/// 最小長・非負のINTEGERを読み取り、符号ガードを除いた絶対値を返す。
fn decode_unsigned_integer<'a>(data: &'a [u8], pos: usize) -> Result<(Tlv<'a>, &'a [u8]), DerError> {
    let tlv = expect_tlv(data, pos, TAG_INTEGER, "INTEGER")?;
    let value = tlv.value;
    match value {
        [] => Err(malformed(tlv.value_offset(), "INTEGERが空です")),
        [first, ..] if first & 0x80 != 0 => {
            Err(malformed(tlv.value_offset(), "負のINTEGERは署名成分として不正です"))
        }
        [0x00] => Err(DerError::InvalidComponent("値が0です")),
        [0x00, second, ..] if second & 0x80 == 0 => {
            Err(malformed(tlv.value_offset(), "INTEGERに冗長な先頭0があります"))
        }
        [0x00, rest @ ..] => Ok((tlv, rest)),
        _ => Ok((tlv, value)),
    }
}

/// ECDSA署名値のDERを厳密にデコードし、`(r, s)` の絶対値を返す。
pub fn decode_signature_value(der: &[u8]) -> Result<(Vec<u8>, Vec<u8>), DerError> {
    let outer = outer_sequence(der)?;
    let (r_tlv, r) = decode_unsigned_integer(der, outer.value_offset())?;
    let (s_tlv, s) = decode_unsigned_integer(der, r_tlv.end())?;
    if s_tlv.end() != outer.end() {
        return Err(malformed(s_tlv.end(), "署名値の後ろに余分なデータがあります"));
    }
    Ok((r.to_vec(), s.to_vec()))
}

/// `AlgorithmIdentifier { algorithm, parameters 省略 }` をエンコードする。
pub fn encode_algorithm_identifier(oid: &str) -> Result<Vec<u8>, DerError> {
    let oid = ObjectIdentifier::new(oid).map_err(|e| DerError::InvalidOid(format!("{oid}: {e}")))?;
    Ok(encode_tlv(TAG_SEQUENCE, &encode_tlv(TAG_OID, oid.as_bytes())))
}

/// 署名対象構造に署名アルゴリズムと署名値を付けて署名済み構造を組み立てる。
///
/// 出力は `SEQUENCE { unsigned_der, AlgorithmIdentifier, BIT STRING(0x00 || signature_der) }`。
/// `unsigned_der` はそのまま埋め込まれる。
pub fn splice_signed_artifact(
    unsigned_der: &[u8],
    signature_algorithm_oid: &str,
    signature_der: &[u8],
) -> Result<Vec<u8>, DerError> {
    let unsigned = expect_tlv(unsigned_der, 0, TAG_SEQUENCE, "署名対象")?;
    if unsigned.end() != unsigned_der.len() {
        return Err(malformed(unsigned.end(), "署名対象の後ろに余分なデータがあります"));
    }
    // 署名値自体も正しいDERであること
    decode_signature_value(signature_der)?;

    let algorithm = encode_algorithm_identifier(signature_algorithm_oid)?;
    let mut bit_string = Vec::with_capacity(signature_der.len() + 1);
    bit_string.push(0x00);
    bit_string.extend_from_slice(signature_der);

    let mut body = Vec::with_capacity(unsigned_der.len() + algorithm.len() + bit_string.len() + 4);
    body.extend_from_slice(unsigned_der);
    body.extend(algorithm);
    body.extend(encode_tlv(TAG_BIT_STRING, &bit_string));
    Ok(encode_tlv(TAG_SEQUENCE, &body))
}

// ---------------------------------------------------------------------------
// PEM
// ---------------------------------------------------------------------------

/// CSRのPEMラベル
pub const CSR_PEM_LABEL: &str = "CERTIFICATE REQUEST";
/// 旧形式のCSR PEMラベル
pub const LEGACY_CSR_PEM_LABEL: &str = "NEW CERTIFICATE REQUEST";

/// PEMエンコードされたCSRをDERに変換する。
pub fn csr_from_pem(pem: &str) -> Result<Vec<u8>, DerError> {
    let (label, der) =
        der::pem::decode_vec(pem.trim().as_bytes()).map_err(|e| DerError::Pem(e.to_string()))?;
    if label != CSR_PEM_LABEL && label != LEGACY_CSR_PEM_LABEL {
        return Err(DerError::Pem(format!("CSRではないPEMラベルです: {label}")));
    }
    Ok(der)
}

/// DERのCSRをPEMに変換する。
pub fn csr_to_pem(der: &[u8]) -> Result<String, DerError> {
    der::pem::encode_string(CSR_PEM_LABEL, der::pem::LineEnding::LF, der)
        .map_err(|e| DerError::Pem(e.to_string()))
}
