//! Line-oriented request intake.
//!
//! # Responsibilities
//! - Read request lines and run each one as its own task
//! - Reap finished tasks while reading, so the task set tracks only live requests
//! - On end of input, wait for in-flight requests; on shutdown, abandon them

use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

/// What an intake run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    /// Non-blank lines handed to the handler.
    pub received: usize,
    /// Handler tasks that ran to completion.
    pub completed: usize,
    /// Handler tasks aborted by shutdown.
    pub abandoned: usize,
    /// Largest number of tasks tracked at once.
    pub peak_in_flight: usize,
    /// Whether the run ended on the shutdown signal rather than end of input.
    pub interrupted: bool,
}

/// Run `handler` concurrently for every non-blank line from `reader`.
pub async fn process_lines<R, H, Fut>(
    reader: R,
    handler: H,
    mut shutdown: broadcast::Receiver<()>,
) -> IntakeSummary
where
    R: AsyncBufRead + Unpin,
    H: Fn(String) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut summary = IntakeSummary::default();
    let mut in_flight = JoinSet::new();
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    summary.received += 1;
                    in_flight.spawn(handler(line));
                    summary.peak_in_flight = summary.peak_in_flight.max(in_flight.len());
                    while let Some(result) = in_flight.try_join_next() {
                        reap(result, &mut summary);
                    }
                }
                Ok(None) => {
                    tracing::info!(in_flight = in_flight.len(), "End of input, waiting for in-flight requests");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read request line");
                    break;
                }
            },
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                reap(result, &mut summary);
            }
            _ = shutdown.recv() => {
                summary.interrupted = true;
                break;
            }
        }
    }

    if summary.interrupted {
        tracing::warn!(abandoned = in_flight.len(), "Abandoning in-flight requests");
        summary.abandoned = in_flight.len();
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    } else {
        while let Some(result) = in_flight.join_next().await {
            reap(result, &mut summary);
        }
    }
    summary
}

fn reap(result: Result<(), JoinError>, summary: &mut IntakeSummary) {
    match result {
        Ok(()) => summary.completed += 1,
        Err(e) if e.is_panic() => tracing::error!(error = %e, "Request task panicked"),
        Err(_) => {}
    }
}
