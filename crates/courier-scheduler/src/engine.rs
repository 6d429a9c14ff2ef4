use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use courier_core::types::Trigger;

use crate::clock::Clock;
use crate::coordinator::RunCoordinator;
use crate::schedule::DailySchedule;

/// The armed daily timer. One per process: created at startup with a
/// schedule snapshot, disarmed at shutdown.
pub struct Scheduler {
    schedule: DailySchedule,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the timer task. It polls `clock` every second and, when the
    /// next occurrence has arrived, asks `coordinator` for a scheduled run.
    pub fn arm(
        coordinator: Arc<RunCoordinator>,
        schedule: DailySchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let first = schedule.next_after(clock.now());
        info!(%schedule, next_run = ?first, "scheduler armed");
        let next_run = Arc::new(Mutex::new(first));
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(timer_loop(
            coordinator,
            schedule,
            clock,
            Arc::clone(&next_run),
            rx,
        ));
        Self {
            schedule,
            next_run,
            shutdown,
            task,
        }
    }

    pub fn schedule(&self) -> &DailySchedule {
        &self.schedule
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop the timer. A scheduled run already executing finishes first.
    pub async fn disarm(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("scheduler task ended abnormally: {e}");
        }
        info!("scheduler disarmed");
    }
}

async fn timer_loop(
    coordinator: Arc<RunCoordinator>,
    schedule: DailySchedule,
    clock: Arc<dyn Clock>,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Set while a due slot waits for a manual run to finish.
    let mut deferred = false;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = clock.now();
                let due = next_run
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .is_some_and(|at| now >= at);
                if !due {
                    continue;
                }
                match coordinator.try_start(Trigger::Scheduled) {
                    Ok(ticket) => {
                        deferred = false;
                        ticket.execute().await;
                    }
                    Err(rejected) => {
                        // Keep the slot; it fires once the other run ends.
                        if !deferred {
                            warn!(current = ?rejected.current, "scheduled run deferred: another run in progress");
                            deferred = true;
                        }
                        continue;
                    }
                }
                let upcoming = schedule.next_after(now.max(clock.now()));
                info!(next_run = ?upcoming, "next scheduled run");
                *next_run.lock().unwrap_or_else(|e| e.into_inner()) = upcoming;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use courier_ledger::Ledger;
    use courier_mail::mock::ScriptedTransport;
    use courier_mail::DeliveryClient;

    use crate::clock::FixedClock;
    use crate::coordinator::PipelineSettings;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<FixedClock>,
        ledger: Arc<Ledger>,
        coordinator: Arc<RunCoordinator>,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let ledger = Arc::new(Ledger::in_memory().unwrap());
        let delivery = Arc::new(DeliveryClient::new(
            Arc::new(ScriptedTransport::new()),
            Duration::from_secs(5),
        ));
        let coordinator = Arc::new(
            RunCoordinator::new(
                PipelineSettings::new(dir.path().join("in"), dir.path().join("out")),
                ledger.clone(),
                delivery,
            )
            .with_clock(clock.clone()),
        );
        Fixture {
            _dir: dir,
            clock,
            ledger,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_the_configured_time() {
        let Fixture {
            _dir,
            clock,
            ledger,
            coordinator,
        } = fixture(Utc.with_ymd_and_hms(2025, 12, 15, 7, 59, 0).unwrap());

        let schedule = DailySchedule::new(9, 0, chrono_tz::Europe::Berlin).unwrap();
        let scheduler = Scheduler::arm(coordinator.clone(), schedule, clock.clone());
        assert_eq!(
            scheduler.next_run(),
            Some(Utc.with_ymd_and_hms(2025, 12, 15, 8, 0, 0).unwrap())
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ledger.latest_run().unwrap().is_none());

        clock.set(Utc.with_ymd_and_hms(2025, 12, 15, 8, 0, 1).unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let runs = ledger.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger, Trigger::Scheduled);
        assert_eq!(
            scheduler.next_run(),
            Some(Utc.with_ymd_and_hms(2025, 12, 16, 8, 0, 0).unwrap())
        );

        scheduler.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slot_taken_by_a_manual_run_fires_when_it_ends() {
        let f = fixture(Utc.with_ymd_and_hms(2025, 12, 15, 7, 59, 0).unwrap());
        let schedule = DailySchedule::new(9, 0, chrono_tz::Europe::Berlin).unwrap();
        let scheduler = Scheduler::arm(f.coordinator.clone(), schedule, f.clock.clone());
        let slot = Some(Utc.with_ymd_and_hms(2025, 12, 15, 8, 0, 0).unwrap());
        assert_eq!(scheduler.next_run(), slot);

        let manual = f.coordinator.try_start(Trigger::Manual).unwrap();
        f.clock.set(Utc.with_ymd_and_hms(2025, 12, 15, 8, 0, 1).unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.ledger.latest_run().unwrap().is_none());
        assert_eq!(scheduler.next_run(), slot);

        drop(manual);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let runs = f.ledger.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger, Trigger::Scheduled);
        assert_eq!(
            scheduler.next_run(),
            Some(Utc.with_ymd_and_hms(2025, 12, 16, 8, 0, 0).unwrap())
        );

        scheduler.disarm().await;
    }
}
