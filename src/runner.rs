//! The periodic job: poll MIPS for devices and report a summary.

use crate::http::GatewayError;
use crate::mips::{Device, MipsClient};
use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub online: usize,
    pub offline: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.online + self.offline
    }

    /// Summary line sent to the log chat.
    pub fn summary(&self) -> String {
        format!(
            "run {} finished in {:.1}s: {} devices, {} online, {} offline",
            self.run_id,
            self.elapsed.as_secs_f64(),
            self.total(),
            self.online,
            self.offline
        )
    }
}

fn count_online(devices: &[Device]) -> usize {
    devices.iter().filter(|d| d.online()).count()
}

pub struct App {
    mips: MipsClient,
    sleep_between_runs: Duration,
}

impl App {
    pub fn new(mips: MipsClient, sleep_between_runs: Duration) -> Self {
        Self {
            mips,
            sleep_between_runs,
        }
    }

    /// One pass of the job. Both device listings go through the same
    /// rate gate, so they are fetched concurrently.
    pub async fn run_cycle(&self) -> Result<CycleReport, GatewayError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!("run {run_id} started");
        let (online, offline) = futures::try_join!(
            self.mips.get_devices(Some(true)),
            self.mips.get_devices(Some(false)),
        )?;
        let stray = count_online(&offline);
        if stray > 0 || count_online(&online) != online.len() {
            warn!("run {run_id}: online filter disagrees with device state ({stray} online devices in the offline listing)");
        }
        let report = CycleReport {
            run_id,
            online: online.len(),
            offline: offline.len(),
            elapsed: started.elapsed(),
        };
        info!(tg = true; "{}", report.summary());
        Ok(report)
    }

    /// Runs cycles until Ctrl-C, sleeping between them. A failed cycle is
    /// reported and the loop carries on; with `once` the first cycle's
    /// outcome is returned.
    pub async fn run(&self, once: bool) -> Result<(), GatewayError> {
        self.run_until(once, tokio::signal::ctrl_c()).await
    }

    /// [`App::run`] with a caller-supplied stop signal. The signal is
    /// watched during cycles as well as between them.
    pub async fn run_until<F: Future>(&self, once: bool, shutdown: F) -> Result<(), GatewayError> {
        tokio::pin!(shutdown);
        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupted during a run, stopping");
                    return Ok(());
                }
                outcome = self.run_cycle() => outcome,
            };
            match outcome {
                Ok(_) => {}
                Err(e) if once => return Err(e),
                Err(e) => error!(tg = true; "run failed: {e}"),
            }
            if once {
                return Ok(());
            }
            tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupted, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.sleep_between_runs) => {}
            }
        }
    }
}
