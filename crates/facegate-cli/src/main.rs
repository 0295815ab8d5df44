use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::client::SocketExtractor;
use facegate_core::{FaceError, Pipeline};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod service;

use config::Config;
use service::{FaceService, ServiceError};

#[derive(Parser)]
#[command(name = "facegate", about = "Quality-gated face enrollment and verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a sample image if it passes the quality gate
    Enroll {
        /// Image file (jpg or png)
        image: PathBuf,
    },
    /// Train the mean template from all enrolled samples
    Train,
    /// Check whether an image shows the enrolled user
    Verify {
        image: PathBuf,
        /// Maximum distance accepted as a match (default from config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Report face detection and image quality without storing anything
    Analyze { image: PathBuf },
    /// Warm the reference cache and show stored data
    Status,
}

#[derive(Serialize)]
struct Reply<'a, T: Serialize> {
    #[serde(flatten)]
    body: &'a T,
    message: String,
}

#[derive(Serialize)]
struct ErrorReply<'a> {
    error: String,
    kind: Option<facegate_core::ErrorKind>,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a facegate_core::QualityReport>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let extractor = SocketExtractor::new(&config.extractor_socket, config.extractor_timeout());
    let pipeline = Pipeline::new(config.pipeline_settings(), Arc::new(extractor));
    let service = FaceService::new(pipeline, config.request_timeout());

    let outcome = match cli.command {
        Commands::Enroll { image } => {
            let bytes = read_image(&image)?;
            service.enroll(bytes).await.map(|o| {
                let message = format!(
                    "Sample stored as {} ({} total).",
                    o.saved_id, o.total_samples
                );
                print_json(&Reply { body: &o, message })
            })
        }
        Commands::Train => service.train().await.map(|s| {
            print_json(&Reply {
                body: &s,
                message: s.message(),
            })
        }),
        Commands::Verify { image, threshold } => {
            let bytes = read_image(&image)?;
            let threshold = threshold.unwrap_or(config.default_threshold);
            service.verify(bytes, threshold).await.map(|o| {
                print_json(&Reply {
                    body: &o,
                    message: o.message(),
                })
            })
        }
        Commands::Analyze { image } => {
            let bytes = read_image(&image)?;
            service.analyze(bytes).await.map(|a| {
                let message = if a.quality.warnings.is_empty() {
                    "Image quality is good.".to_string()
                } else {
                    a.quality.warnings.join(" ")
                };
                print_json(&Reply { body: &a, message })
            })
        }
        Commands::Status => service.status().await.map(|s| {
            let message = format!(
                "{} enrolled samples, {} reference embeddings.",
                s.enrolled_samples, s.reference_sample_count
            );
            print_json(&Reply { body: &s, message })
        }),
    };

    match outcome {
        Ok(printed) => {
            printed?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, "request failed");
            print_json(&error_reply(&err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn error_reply(err: &ServiceError) -> ErrorReply<'_> {
    let (kind, quality) = match err {
        ServiceError::Face(face) => {
            let quality = match face {
                FaceError::QualityRejected { report, .. } => Some(report.as_ref()),
                _ => None,
            };
            (Some(face.kind()), quality)
        }
        _ => (None, None),
    };
    ErrorReply {
        error: err.to_string(),
        kind,
        retryable: err.is_retryable(),
        quality,
    }
}
