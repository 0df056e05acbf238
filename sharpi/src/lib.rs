//! Singer target writing products, prices and customers to the Sharpi partner API.

pub mod attributes;
pub mod client;
pub mod config;
pub mod mapping;
pub mod metrics_defs;
pub mod normalize;
pub mod retry;
pub mod singer;
pub mod target;
pub mod types;

use std::path::Path;
use tokio::io::{AsyncBufRead, BufReader};

pub use client::{UpsertClient, UpsertError, Upserted};
pub use config::Config;
pub use target::{Summary, Target, TargetError};
pub use types::EntityKind;

/// Runs the target to completion on a dedicated runtime.
///
/// Messages are read from `input`, or from stdin when no path is given. Acknowledged state
/// messages are written to stdout.
pub fn run(config: &Config, input: Option<&Path>) -> Result<Summary, TargetError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(config, input))
}

pub async fn run_async(config: &Config, input: Option<&Path>) -> Result<Summary, TargetError> {
    let client = UpsertClient::new(config).map_err(TargetError::Client)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            tracing::info!(path = %path.display(), "reading messages from file");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    Target::new(client).run(reader, tokio::io::stdout()).await
}
