//! # 再試行付き署名者
//!
//! 任意の [`RemoteSigner`] を包み、呼び出しごとのタイムアウトと
//! 一時的な失敗（[`SignerError::Transient`]）に対する指数バックオフ再試行を行う。
//! 再試行上限に達した場合は [`SignerError::SigningUnavailable`] を返す。
//! 一時的でない失敗は再試行せずにそのまま返す。

use std::time::Duration;

use provenance_types::{KeyId, MessageType, PublicKeyInfo, SigningAlgorithm};

use crate::{RemoteSigner, SignatureOutput, SignerError};

/// 再試行ポリシー。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    pub max_attempts: u32,
    /// 初回再試行までの待機時間
    pub base_delay: Duration,
    /// 待機時間の上限
    pub max_delay: Duration,
    /// 1回の呼び出しのタイムアウト
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// `attempt` 回目（1始まり）の失敗後の待機時間。
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// タイムアウトと再試行を付加する署名者。
pub struct RetryingSigner<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RemoteSigner> RetryingSigner<S> {
    /// `inner` を `policy` で包む。
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// 包んでいる署名者。
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// 再試行ポリシー。
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &str, key_id: &KeyId, mut call: F) -> Result<T, SignerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SignerError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            let result = match tokio::time::timeout(self.policy.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SignerError::Transient(format!(
                    "{operation} が {:?} 以内に完了しませんでした",
                    self.policy.call_timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    last = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        tracing::warn!(
                            signer = self.inner.signer_type(),
                            operation,
                            key_id = %key_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "一時的な失敗のため再試行します"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            signer = self.inner.signer_type(),
            operation,
            key_id = %key_id,
            attempts = max_attempts,
            "リモート署名者が利用できません"
        );
        Err(SignerError::SigningUnavailable {
            attempts: max_attempts,
            last,
        })
    }
}

#[async_trait::async_trait]
impl<S: RemoteSigner> RemoteSigner for RetryingSigner<S> {
    fn signer_type(&self) -> &str {
        self.inner.signer_type()
    }

    async fn sign(
        &self,
        key_id: &KeyId,
        message: &[u8],
        algorithm: SigningAlgorithm,
        message_type: MessageType,
    ) -> Result<SignatureOutput, SignerError> {
        self.run("Sign", key_id, || {
            self.inner.sign(key_id, message, algorithm, message_type)
        })
        .await
    }

    async fn get_public_key(&self, key_id: &KeyId) -> Result<PublicKeyInfo, SignerError> {
        self.run("GetPublicKey", key_id, || self.inner.get_public_key(key_id))
            .await
    }
}
