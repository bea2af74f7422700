use std::time::Duration;

use clap::Parser;
use error::AppError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;
use tvprobe_engine::{CancellationToken, Orchestrator, ProbeConfig, ProxyAuth, ProxyConfig, ProxyType};

mod cli;
mod error;
mod input;
mod output;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let entries = input::read_playlist(&args.input, args.limit)?;
    info!(
        path = %args.input.display(),
        channels = entries.len(),
        "Loaded playlist"
    );

    let config = build_config(&args)?;
    info!(
        "Probe configuration: concurrency={}, timeout={}s, connect={}s, read={}s, budget={} bytes",
        config.concurrency,
        args.timeout,
        args.connect_timeout,
        args.read_timeout,
        config.byte_budget
    );

    let progress = if args.no_progress {
        ProgressManager::new_disabled()
    } else {
        ProgressManager::new(entries.len())
    };

    // Ctrl-C stops the batch; unfinished channels are still reported.
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining probes");
                cancel.cancel();
            }
        })
    };

    let orchestrator = Orchestrator::new(config).with_cancellation(cancel).with_progress({
        let progress = progress.clone();
        move |event| progress.handle_event(event)
    });
    let records = orchestrator.run(entries).await;
    interrupt.abort();
    progress.finish();

    output::write_records(&records, args.format, args.output.as_deref())?;
    if let Some(path) = &args.output {
        info!(path = %path.display(), format = %args.format, "Results written");
    }
    info!("Summary: {}", output::summary(&records));
    Ok(())
}

fn build_config(args: &CliArgs) -> Result<ProbeConfig, AppError> {
    let mut builder = ProbeConfig::builder()
        .with_concurrency(args.concurrency)
        .with_item_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_byte_budget(args.byte_budget)
        .with_manifest_byte_limit(args.manifest_limit)
        .with_max_depth(args.max_depth)
        .with_retry_count(args.retries)
        .with_retry_delay(Duration::from_millis(args.retry_delay_ms))
        .with_min_bitrate_kbps(args.min_bitrate)
        .with_max_segment_probes(args.max_segment_probes)
        .with_variant_policy(args.variant)
        .with_headers(utils::parse_headers(&args.headers))
        .with_range_requests(!args.no_range)
        .with_follow_redirects(!args.no_redirects)
        .danger_accept_invalid_certs(args.insecure)
        .with_dedupe(args.dedupe, args.dedupe_lines);

    if !args.user_agents.is_empty() {
        builder = builder.with_user_agents(args.user_agents.iter().cloned());
    }
    if let Some(referer) = &args.referer {
        builder = builder.with_referer(referer.clone());
    }

    // Handle proxy configuration
    if args.no_proxy {
        // No proxy flag overrides everything else
        info!("All proxy settings disabled (--no-proxy flag)");
        builder = builder.with_system_proxy(false);
    } else if let Some(proxy_url) = args.proxy.as_ref() {
        let proxy_type: ProxyType = args
            .proxy_type
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid proxy type: '{}'", args.proxy_type)))?;

        // Configure proxy authentication if both username and password are provided
        let auth = match (&args.proxy_user, &args.proxy_pass) {
            (Some(username), Some(password)) => Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        info!(
            proxy_url = %proxy_url,
            proxy_type = ?proxy_type,
            has_auth = auth.is_some(),
            "Using explicit proxy configuration"
        );

        builder = builder.with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type,
            auth,
        });
    }

    Ok(builder.build())
}
