//! Background tick scheduler.
//!
//! One polling thread asks the service which campaigns are running and
//! due, and hands due campaigns to a fixed pool of worker threads over a
//! channel. Each worker runs `run_scheduled_tick`, so the per-campaign
//! tick lock still applies: a scheduled tick colliding with a manual one
//! is rejected and reported on the results channel.
//!
//! Campaigns left running in storage are picked up by the first poll, so
//! restarting the scheduler resumes them.

use crate::{
    engine::TickReport,
    error::SimResult,
    repository::EconomyRepository,
    service::{CampaignStatus, SimulationService},
    types::{CampaignId, Timestamp},
};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Hook for pausing campaigns automatically (idle players, budget
/// exhaustion and so on). Consulted before every scheduling decision.
pub trait AutoPausePolicy: Send + Sync {
    fn should_pause(&self, status: &CampaignStatus, now: Timestamp) -> bool;
}

/// Never pauses anything.
pub struct NeverAutoPause;

impl AutoPausePolicy for NeverAutoPause {
    fn should_pause(&self, _status: &CampaignStatus, _now: Timestamp) -> bool {
        false
    }
}

/// Outcome of one scheduled tick attempt that actually did something.
#[derive(Debug)]
pub struct ScheduledTick {
    pub campaign_id: CampaignId,
    pub result:      SimResult<TickReport>,
}

pub struct SchedulerHandle {
    shutdown: Sender<()>,
    results:  Receiver<ScheduledTick>,
    threads:  Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Completed and rejected scheduled ticks, in completion order.
    pub fn results(&self) -> &Receiver<ScheduledTick> {
        &self.results
    }

    /// Stop polling, let in-flight ticks finish, and join every thread.
    pub fn stop(mut self) {
        let _ = self.shutdown.send(());
        for handle in std::mem::take(&mut self.threads) {
            if handle.join().is_err() {
                log::error!("scheduler: a scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
    }
}

pub struct Scheduler;

impl Scheduler {
    pub fn start<R>(service: Arc<SimulationService<R>>, policy: Arc<dyn AutoPausePolicy>) -> SimResult<SchedulerHandle>
    where
        R: EconomyRepository + 'static,
    {
        let config = service.config().scheduler.clone();
        let restored = service.running_campaigns()?;
        log::info!(
            "scheduler: starting with {} workers, polling every {}ms, {} running campaigns restored",
            config.worker_threads,
            config.poll_interval_ms,
            restored.len()
        );

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (job_tx, job_rx) = unbounded::<CampaignId>();
        let (result_tx, result_rx) = unbounded::<ScheduledTick>();
        let in_flight: Arc<Mutex<HashSet<CampaignId>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut threads = Vec::with_capacity(config.worker_threads + 1);

        for worker in 0..config.worker_threads.max(1) {
            let service = Arc::clone(&service);
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("tick-worker-{worker}"))
                .spawn(move || run_worker(service, jobs, results, in_flight))
                .map_err(anyhow::Error::from)?;
            threads.push(handle);
        }
        drop(job_rx);
        drop(result_tx);

        let poll = Duration::from_millis(config.poll_interval_ms.max(1));
        let poller = thread::Builder::new()
            .name("tick-scheduler".into())
            .spawn(move || {
                let ticker = tick(poll);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => poll_once(&service, policy.as_ref(), &job_tx, &in_flight),
                    }
                }
                log::info!("scheduler: stopped polling");
                // Dropping job_tx here ends every worker's receive loop.
            })
            .map_err(anyhow::Error::from)?;
        threads.push(poller);

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            results: result_rx,
            threads,
        })
    }
}

fn poll_once<R: EconomyRepository>(
    service: &SimulationService<R>,
    policy: &dyn AutoPausePolicy,
    jobs: &Sender<CampaignId>,
    in_flight: &Mutex<HashSet<CampaignId>>,
) {
    let clocks = match service.running_campaigns() {
        Ok(clocks) => clocks,
        Err(err) => {
            log::error!("scheduler: cannot list running campaigns: {err}");
            return;
        }
    };
    let now = service.now();
    let base = service.config().base_tick_interval_secs;

    for clock in clocks {
        let campaign_id = clock.campaign_id;
        match service.get_status(campaign_id) {
            Ok(status) if policy.should_pause(&status, now) => {
                log::info!("scheduler: auto-pausing campaign={campaign_id}");
                if let Err(err) = service.set_speed(campaign_id, "pause") {
                    log::warn!("scheduler: auto-pause of campaign={campaign_id} failed: {err}");
                }
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("scheduler: status of campaign={campaign_id} unavailable: {err}");
                continue;
            }
        }
        if !clock.should_tick(now, base) {
            continue;
        }

        let mut pending = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !pending.insert(campaign_id) {
            continue;
        }
        drop(pending);
        if jobs.send(campaign_id).is_err() {
            return;
        }
    }
}

fn run_worker<R: EconomyRepository>(
    service: Arc<SimulationService<R>>,
    jobs: Receiver<CampaignId>,
    results: Sender<ScheduledTick>,
    in_flight: Arc<Mutex<HashSet<CampaignId>>>,
) {
    for campaign_id in jobs.iter() {
        let result = match service.run_scheduled_tick(campaign_id) {
            Ok(Some(report)) => Some(Ok(report)),
            Ok(None) => None,
            Err(err) => {
                log::warn!("scheduler: campaign={campaign_id} scheduled tick rejected: {err}");
                Some(Err(err))
            }
        };
        // Report before releasing the campaign so results stay in tick order.
        // Nobody listening is fine; results are informational.
        if let Some(result) = result {
            let _ = results.send(ScheduledTick { campaign_id, result });
        }
        in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&campaign_id);
    }
}
