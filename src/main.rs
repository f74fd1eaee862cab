use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use image_share_uploader::config::{self, UploaderConfig};
use image_share_uploader::errors::{AppError, FailureReason};
use image_share_uploader::uploader::{ProgressEvent, UploadOutcome, UploadSink, Uploader};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Image to upload. Exactly one is accepted.
    paths: Vec<PathBuf>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    api_key: Option<String>,

    /// Give up on the network call after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Refuse response bodies larger than this
    #[arg(long)]
    max_response_bytes: Option<u64>,

    /// Config file to use instead of the per-user one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Persist the effective settings before uploading
    #[arg(long)]
    save_config: bool,
}

struct ConsoleSink {
    json: bool,
}

impl UploadSink for ConsoleSink {
    fn on_progress(&mut self, event: ProgressEvent) {
        eprintln!("{}", event);
    }

    fn on_complete(&mut self, outcome: &UploadOutcome) {
        if self.json {
            match serde_json::to_string(outcome) {
                Ok(json) => println!("{}", json),
                Err(e) => log::error!("Failed to serialize outcome: {}", e),
            }
            return;
        }

        match outcome {
            UploadOutcome::Success { link } => println!("{}", link),
            UploadOutcome::Failure { reason } => eprintln!("{}", failure_message(reason)),
        }
    }
}

fn failure_message(reason: &FailureReason) -> String {
    if reason.is_retryable() {
        format!("{}\nThis may be temporary; try the upload again.", reason)
    } else {
        reason.to_string()
    }
}

fn effective_config(args: &Args) -> Result<UploaderConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?
    .with_env_overrides();

    if let Some(endpoint) = &args.endpoint {
        config.endpoint_url = endpoint.clone();
    }
    if let Some(key) = &args.api_key {
        config.api_key = key.clone();
    }
    if args.timeout.is_some() {
        config.request_timeout_secs = args.timeout;
    }
    if args.max_response_bytes.is_some() {
        config.max_response_bytes = args.max_response_bytes;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = effective_config(&args)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    log::info!("Starting Image Share Uploader");

    if args.save_config {
        match &args.config {
            Some(path) => config::save_config_to(path, &config),
            None => config::save_config(&config),
        }
        .context("Failed to save configuration")?;
    }

    let uploader = Uploader::new(config).context("Invalid uploader configuration")?;

    let pending = match uploader.submit(args.paths.clone()) {
        Ok(pending) => pending,
        Err(AppError::InvalidArgument(message)) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    let cancel = pending.cancellation_token();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Interrupt received, cancelling upload");
        cancel.cancel();
    }) {
        log::warn!("Failed to register Ctrl-C handler (non-critical): {}", e);
    }

    let mut sink = ConsoleSink { json: args.json };
    let outcome = pending.deliver_to(&mut sink).await;

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_hints_retry_only_when_useful() {
        let message = failure_message(&FailureReason::NonOkStatus(503));
        assert!(message.starts_with("Server responded with HTTP status 503"));
        assert!(message.contains("try the upload again"));

        let message = failure_message(&FailureReason::ApiError {
            code: "1003".to_string(),
            message: "Invalid image type or URL".to_string(),
        });
        assert_eq!(message, "Imgur Error: 1003 - Invalid image type or URL");
    }
}
