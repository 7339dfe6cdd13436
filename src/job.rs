//! Job-wrapper seam for harness integration.
//!
//! The orchestration core asks only two things of its harness: a leveled
//! log sink and a named execution boundary where any error becomes a
//! process-fatal exit. [`init_logging`] and [`run`] provide both; a CLI or
//! scheduler embeds them around [`MigrationOrchestrator::run`].
//!
//! [`MigrationOrchestrator::run`]: crate::orchestrator::MigrationOrchestrator::run

#![forbid(unsafe_code)]

use std::fmt::Display;
use std::future::Future;
use std::process::ExitCode;

use tracing::{error, info, Instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber: fmt output filtered by
/// `RUST_LOG`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Run `fut` inside a named job span and map its outcome to an exit code.
///
/// An `Err` is logged and becomes [`ExitCode::FAILURE`] — the process-fatal
/// exit the migration protocol relies on when a run aborts.
pub async fn run<F, T, E>(name: &str, fut: F) -> ExitCode
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let span = tracing::info_span!("job", name);
    async move {
        match fut.await {
            Ok(_) => {
                info!(job = name, "job completed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(job = name, error = %e, "job failed");
                ExitCode::FAILURE
            }
        }
    }
    .instrument(span)
    .await
}
