//! # Provenance Signer CLI
//!
//! 証明書の確認・チェーン検証・リモート鍵によるCSRの作成と署名・鍵一致確認を行う。
//!
//! ## サブコマンド
//! | コマンド | 処理 |
//! |---------|------|
//! | `inspect` | 証明書の内容と（任意で）発行者署名を表示 |
//! | `verify-chain` | バンドルと信頼済みルートからチェーンを検証 |
//! | `create-csr` | リモート鍵の公開鍵で新しいCSRを作成・署名 |
//! | `sign-csr` | 既存CSRのCRIにリモート鍵で署名し直す |
//! | `key-match` | 証明書の鍵とリモート鍵の一致を確認 |

mod commands;
mod signer;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use anyhow::Context;
use clap::{Parser, Subcommand};
use provenance_core::SignatureAssembler;
use provenance_types::flexible_datetime;
use tracing_subscriber::EnvFilter;

use crate::signer::SignerArgs;

#[derive(Parser)]
#[command(name = "provenance-cli", version, about = "Provenance Signer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 証明書の内容を表示する
    Inspect {
        /// 証明書（PEM）
        cert: PathBuf,
        /// 発行者の証明書（PEM）。指定すると署名を検証する
        #[arg(long)]
        ca_cert: Option<PathBuf>,
    },
    /// 証明書チェーンを検証する
    VerifyChain {
        /// 署名者バンドル（PEM、順不同）
        #[arg(long)]
        bundle: PathBuf,
        /// 信頼済みルート証明書（PEM）
        #[arg(long)]
        root: PathBuf,
        /// 検証時刻（RFC 3339 または ISO-8601、既定は現在時刻）
        #[arg(long, value_parser = parse_time)]
        at: Option<SystemTime>,
    },
    /// リモート鍵で新しいCSRを作成する
    CreateCsr {
        /// Subject名（例: `CN=example,O=Org`）
        #[arg(long)]
        subject: String,
        /// 出力先（省略時は標準出力）
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        signer: SignerArgs,
    },
    /// 既存CSRにリモート鍵で署名する
    SignCsr {
        /// CSR（PEM）
        #[arg(long)]
        csr: PathBuf,
        /// 出力先（省略時は標準出力）
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        signer: SignerArgs,
    },
    /// 証明書の鍵とリモート鍵が一致するか確認する
    KeyMatch {
        /// 署名者証明書（PEM）
        #[arg(long)]
        cert: PathBuf,
        #[command(flatten)]
        signer: SignerArgs,
    },
}

fn parse_time(value: &str) -> Result<SystemTime, String> {
    flexible_datetime::parse(value)
        .map(SystemTime::from)
        .ok_or_else(|| format!("日時として解釈できません: {value}"))
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("読み込めません: {}", path.display()))
}

fn emit(output: &str, out: Option<&Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, output)
                .with_context(|| format!("書き込めません: {}", path.display()))?;
            tracing::info!(path = %path.display(), "出力しました");
        }
        None => print!("{output}"),
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Inspect { cert, ca_cert } => {
            let ca_pem = ca_cert.as_deref().map(read).transpose()?;
            let report = commands::inspect(&read(&cert)?, ca_pem.as_deref(), SystemTime::now())?;
            print!("{report}");
        }
        Commands::VerifyChain { bundle, root, at } => {
            let at = at.unwrap_or_else(SystemTime::now);
            let report = commands::verify_chain(&read(&bundle)?, &read(&root)?, at)?;
            print!("{report}");
        }
        Commands::CreateCsr {
            subject,
            out,
            signer,
        } => {
            let (signer, ctx) = signer.build()?;
            let pem = commands::create_csr(&SignatureAssembler::new(signer), &ctx, &subject).await?;
            emit(&pem, out.as_deref())?;
        }
        Commands::SignCsr { csr, out, signer } => {
            let (signer, ctx) = signer.build()?;
            let pem = commands::sign_csr(&SignatureAssembler::new(signer), &ctx, &read(&csr)?).await?;
            emit(&pem, out.as_deref())?;
        }
        Commands::KeyMatch { cert, signer } => {
            let (signer, ctx) = signer.build()?;
            let (report, matches) =
                commands::key_match(&SignatureAssembler::new(signer), &ctx, &read(&cert)?).await?;
            print!("{report}");
            if !matches {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
