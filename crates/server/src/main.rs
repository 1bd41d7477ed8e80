//! # Provenance Signer サーバー
//!
//! リモート鍵で来歴レコード・CSRに署名するHTTPサービスのエントリポイント。
//!
//! ## 起動シーケンス
//! 1. 環境変数から設定を読み込む
//! 2. 信頼済みルートと署名者バンドルを読み込み、チェーンを検証する
//! 3. 署名者（KMS またはローカル鍵）を初期化し、再試行付きで包む
//! 4. リモート鍵と署名者証明書の鍵が一致することを確認する
//! 5. エンドポイントの受付開始

mod config;
mod endpoints;
mod error;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{AppState, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    let state = AppState::load(&config).await?;
    state.check_key_match().await?;

    let app = endpoints::router(Arc::new(state));

    tracing::info!("Provenance Signer を {} で起動します", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
