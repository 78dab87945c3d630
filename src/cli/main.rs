#[cfg(feature = "progress_bar")]
use std::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{fs::File, io::Write, path::PathBuf, sync::Arc, time::Duration};

use argument::{Cli, Command, ValidationArgs};
use clap::Parser;
#[cfg(feature = "progress_bar")]
use colored::Colorize;
#[cfg(feature = "log")]
use proxywatch::initialize_logging;
use proxywatch::{
    cache::{Config, ProxyCache},
    providers::{CandidateSupplier, ProviderSupplier},
    proxy::models::ProxyCandidate,
    validator::{ProxyValidator, ValidationObserver, ValidationOptions, ValidationSummary},
};
#[cfg(feature = "progress_bar")]
use proxywatch::validator::ProgressUpdate;
use serde::Serialize;
#[cfg(feature = "progress_bar")]
use status_line::StatusLine;
use tokio::{runtime, signal, time};
use tokio_util::sync::CancellationToken;

mod argument;

fn main() {
    if let Err(e) = run_application() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}

fn run_application() -> anyhow::Result<()> {
    let options = Cli::parse();

    #[cfg(feature = "log")]
    {
        let log_level = match options.log_level.as_str() {
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Off,
        };
        initialize_logging(log_level)?;
    }

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        match options.command {
            Command::Validate {
                validation,
                format,
                output_file,
            } => validate_once(validation, &format, output_file).await,
            Command::Watch {
                validation,
                refresh_interval_secs,
            } => watch(validation, refresh_interval_secs).await,
        }
    })
}

fn validation_options(args: &ValidationArgs) -> ValidationOptions {
    ValidationOptions {
        target_url: args.target_url.clone(),
        timeout_ms: args.timeout_ms,
        concurrency: args.concurrency as usize,
        max_failure_samples: args.max_failure_samples,
        max_proxies: (args.max_proxies > 0).then_some(args.max_proxies),
        max_duration_ms: args.max_duration_ms,
    }
}

#[cfg(feature = "progress_bar")]
/// Live counters rendered on the status line while a pass runs.
struct PassProgress {
    total: AtomicUsize,
    tested: AtomicUsize,
    approved: AtomicUsize,
    timer: time::Instant,
}

#[cfg(feature = "progress_bar")]
impl Display for PassProgress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let total = self.total.load(Ordering::Relaxed);
        let tested = self.tested.load(Ordering::Relaxed);
        write!(
            f,
            "{} {} Validating proxies: {}/{} tested, {} approved ({}s)",
            format!("{}:", module_path!()).bright_blue(),
            "INFO".bright_blue(),
            tested,
            total,
            self.approved.load(Ordering::Relaxed).to_string().green(),
            self.timer.elapsed().as_secs()
        )
    }
}

#[cfg(feature = "progress_bar")]
struct ProgressLine(StatusLine<PassProgress>);

#[cfg(feature = "progress_bar")]
impl ValidationObserver for ProgressLine {
    fn on_progress(&self, progress: ProgressUpdate) {
        self.0.total.store(progress.total, Ordering::Relaxed);
        self.0.tested.store(progress.tested, Ordering::Relaxed);
        self.0.approved.store(progress.approved, Ordering::Relaxed);
    }
}

#[cfg(feature = "progress_bar")]
fn progress_observer(total: usize) -> Arc<dyn ValidationObserver> {
    Arc::new(ProgressLine(StatusLine::new(PassProgress {
        total: AtomicUsize::new(total),
        tested: AtomicUsize::new(0),
        approved: AtomicUsize::new(0),
        timer: time::Instant::now(),
    })))
}

#[cfg(not(feature = "progress_bar"))]
fn progress_observer(_total: usize) -> Arc<dyn ValidationObserver> {
    Arc::new(())
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a ValidationSummary,
    proxies: &'a [ProxyCandidate],
}

/// One acquisition and one validation pass, then prints the approved list.
async fn validate_once(
    args: ValidationArgs,
    format: &str,
    output_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let options = validation_options(&args);
    let supplier = ProviderSupplier::new()?;
    let batch = supplier
        .load_candidates(Duration::from_millis(args.fetch_timeout_ms))
        .await?;

    for error in &batch.errors {
        eprintln!("source {} failed: {}", error.source, error.message);
    }

    let mut candidates = batch.candidates;
    if let Some(limit) = options.max_proxies {
        candidates.truncate(limit);
    }

    let cancel = CancellationToken::new();
    let deadline = options.max_duration_ms.map(|ms| {
        let token = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(ms)).await;
            token.cancel();
        })
    });
    let interrupt = {
        let token = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let observer = progress_observer(candidates.len());
    let summary = ProxyValidator::default()
        .validate(candidates, &options, &cancel, observer)
        .await;
    if let Some(deadline) = deadline {
        deadline.abort();
    }
    interrupt.abort();
    let summary = summary?;

    #[cfg(feature = "log")]
    log::info!(
        "{} of {} proxies approved, {} tested in {} ms{}",
        summary.approved,
        summary.total,
        summary.tested,
        summary.duration_ms,
        if summary.aborted { " (aborted)" } else { "" }
    );

    let output = match format {
        "json" => serde_json::to_string_pretty(&Report {
            summary: &summary,
            proxies: &summary.approved_proxies,
        })?,
        _ => {
            for sample in &summary.failure_samples {
                eprintln!("rejected {}: {}", sample.proxy, sample.reason);
            }
            summary
                .approved_proxies
                .iter()
                .map(ProxyCandidate::as_text)
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    if let Some(file_path) = output_file {
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(file_path)?;
        file.write_all(output.as_bytes())?;
        file.write_all(b"\n")?;
    } else if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Keeps the cache running and prints every validated snapshot as JSON.
async fn watch(args: ValidationArgs, refresh_interval_secs: u64) -> anyhow::Result<()> {
    let cache = ProxyCache::with_defaults(Config {
        refresh_interval: Duration::from_secs(refresh_interval_secs),
        fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
        validation: validation_options(&args),
    })?;

    let (sender, receiver) = kanal::unbounded();
    let subscription = cache.subscribe(move |snapshot| {
        sender.send(snapshot.clone())?;
        Ok(())
    });
    let scheduler = cache.start();
    let receiver = receiver.to_async();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            snapshot = receiver.recv() => {
                println!("{}", serde_json::to_string(&snapshot?)?);
            }
        }
    }

    #[cfg(feature = "log")]
    log::info!("Shutting down");
    scheduler.stop();
    subscription.unsubscribe();
    Ok(())
}
