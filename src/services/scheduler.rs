use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::scan_service::ScanService;
use crate::services::send_service::{SendOutcome, SendService};

/// At most one run of a job in flight. The flag is cleared when the guard
/// drops, including on panic.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl SingleFlight {
    pub fn try_begin(&self) -> Option<FlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Run `job` every `period` until `cancel` fires. Ticks that land while the
/// previous run is still going are skipped. On cancellation the in-flight run
/// is awaited before the returned handle completes.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let flight = SingleFlight::default();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;
        info!(job = name, period_secs = period.as_secs(), "periodic job started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(guard) = flight.try_begin() else {
                debug!(job = name, "previous run still in flight, skipping tick");
                continue;
            };
            let run = job();
            in_flight = Some(tokio::spawn(async move {
                let _guard = guard;
                let started = Instant::now();
                match run.await {
                    Ok(()) => debug!(job = name, elapsed_ms = started.elapsed().as_millis() as u64, "run finished"),
                    Err(e) => warn!(job = name, error = %format!("{e:#}"), "run failed"),
                }
            }));
        }

        if flight.is_running() {
            info!(job = name, "waiting for the in-flight run to finish");
        }
        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                warn!(job = name, error = %e, "in-flight run aborted");
            }
        }
        info!(job = name, "periodic job stopped");
    })
}

/// Wires the send and scan services into two independent periodic jobs.
pub fn start(
    send: Arc<SendService>,
    send_interval: Duration,
    scan: Arc<ScanService>,
    scan_interval: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let send_job = spawn_periodic("send", send_interval, cancel.clone(), move || {
        let send = send.clone();
        async move {
            if let SendOutcome::Failed { error, .. } = send.run_tick().await? {
                debug!(%error, "send tick recorded a failure");
            }
            Ok(())
        }
    });
    let scan_job = spawn_periodic("scan", scan_interval, cancel, move || {
        let scan = scan.clone();
        async move {
            scan.run_tick().await?;
            Ok(())
        }
    });
    vec![send_job, scan_job]
}
