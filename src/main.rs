use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod apis;
mod config;
mod dedup;
mod embed;
mod export;
mod pipeline;
mod rank;

use config::Config;
use embed::EncoderGateway;
use pipeline::{Pipeline, SearchRequest};

/// Thin command-line surface: one query per invocation, CSV on stdout,
/// warnings on stderr through the log. The engine proper lives in the
/// modules above.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        anyhow::bail!("usage: paper-match <research idea text>");
    }
    let query = args.join(" ");

    let config = Config::from_env();
    for status in config.source_status() {
        tracing::debug!(source = %status.name, enabled = status.enabled, note = %status.note);
    }

    let gateway = Arc::new(EncoderGateway::new(
        config.build_encoder()?,
        config.embed_cache_cap,
    ));
    let engine = Pipeline::new(config.build_sources(), gateway, config.fetch_timeout);

    let mut request = SearchRequest::new(query);
    request.year_from = config.year_from;
    request.year_to = config.year_to;
    request.per_source_limit = config.per_source_limit;
    request.sources_enabled = config.enabled_sources();

    let response = engine.run(&request).await?;

    for warning in &response.warnings {
        tracing::warn!(source = %warning.source, cause = %warning.cause, "source degraded");
    }
    tracing::info!(
        merged = response.merged_results.len(),
        sources = response.per_source_results.len(),
        "search complete"
    );

    print!("{}", export::to_csv(&response.merged_results));
    Ok(())
}
