//! # AWS Signature Version 4
//!
//! KMS JSONプロトコルのリクエストに付与する `Authorization` ヘッダを計算する。
//! クエリ文字列を持たない `POST /` 形式のリクエストのみを対象とする。

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// 署名に使う認証情報とスコープ。
pub struct SigningParams<'a> {
    /// アクセスキーID
    pub access_key_id: &'a str,
    /// シークレットアクセスキー
    pub secret_access_key: &'a str,
    /// リージョン（例: `eu-west-2`）
    pub region: &'a str,
    /// サービス名（KMSは `kms`）
    pub service: &'a str,
    /// リクエスト時刻
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    /// `x-amz-date` ヘッダの値（`YYYYMMDDTHHMMSSZ`）。
    pub fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn date_stamp(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date_stamp(),
            self.region,
            self.service
        )
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMACは任意長の鍵を受け付けるため new_from_slice は失敗しない
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// 日付・リージョン・サービスから署名鍵を導出する。
pub fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// 正規リクエストを組み立てる。
///
/// `headers` は署名対象のヘッダ（名前は小文字）。順序は問わない。
/// 戻り値は `(正規リクエスト, SignedHeaders)`。
pub fn canonical_request(
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    payload: &[u8],
) -> (String, String) {
    let mut sorted: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    sorted.sort();

    let canonical_headers: String = sorted
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = sorted
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{method}\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}",
        hex::encode(Sha256::digest(payload))
    );
    (request, signed_headers)
}

/// `Authorization` ヘッダの値を計算する。
pub fn authorization_header(
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    payload: &[u8],
    params: &SigningParams<'_>,
) -> String {
    let (request, signed_headers) = canonical_request(method, path, headers, payload);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        params.amz_date(),
        params.scope(),
        hex::encode(Sha256::digest(request.as_bytes()))
    );
    let signing_key = derive_signing_key(
        params.secret_access_key,
        &params.date_stamp(),
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
        params.access_key_id,
        params.scope()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    /// AWSドキュメントの署名鍵導出例
    #[test]
    fn test_derive_signing_key_documented_example() {
        let key = derive_signing_key(SECRET, "20150830", "us-east-1", "iam");
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    /// AWS SigV4テストスイートの get-vanilla
    #[test]
    fn test_get_vanilla() {
        let params = SigningParams {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: SECRET,
            region: "us-east-1",
            service: "service",
            time: Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
        };
        let amz_date = params.amz_date();
        assert_eq!(amz_date, "20150830T123600Z");
        let headers = [("Host", "example.amazonaws.com"), ("X-Amz-Date", amz_date.as_str())];
        let header = authorization_header("GET", "/", &headers, b"", &params);
        assert_eq!(
            header,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    /// ヘッダは名前順に並べ替えられ、値の前後の空白は除かれる
    #[test]
    fn test_canonical_headers_sorted() {
        let (request, signed) = canonical_request(
            "POST",
            "/",
            &[("X-Amz-Target", " TrentService.Sign "), ("Content-Type", "application/x-amz-json-1.1")],
            b"{}",
        );
        assert_eq!(signed, "content-type;x-amz-target");
        assert!(request.starts_with(
            "POST\n/\n\ncontent-type:application/x-amz-json-1.1\nx-amz-target:TrentService.Sign\n\n"
        ));
    }
}
