use std::time::Duration;

use chrono_tz::Tz;
use log::{error, info, warn};
use tokio::time::MissedTickBehavior;

use crate::debounce::{Clock, DebounceConfig, DebounceState, Transition, transition};
use crate::messages::{Notification, local_time};
use crate::notifier::{Notifier, NotifyError};
use crate::source::{SourceError, StatusSource};
use crate::store::{StateRecord, StateStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// The device status could not be read; the stored state was left as is.
    #[error("device status query failed: {0}")]
    Observation(#[source] SourceError),

    #[error("failed to persist state: {0}")]
    Persist(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub device_online: bool,
    pub notification_sent: bool,
    pub state: DebounceState,
}

pub struct Monitor<S, N, St, C> {
    source: S,
    notifier: N,
    store: St,
    clock: C,
    device_id: String,
    debounce: DebounceConfig,
    timezone: Tz,
}

impl<S, N, St, C> Monitor<S, N, St, C>
where
    S: StatusSource,
    N: Notifier,
    St: StateStore,
    C: Clock,
{
    pub fn new(
        source: S,
        notifier: N,
        store: St,
        clock: C,
        device_id: impl Into<String>,
        debounce: DebounceConfig,
        timezone: Tz,
    ) -> Self {
        Monitor {
            source,
            notifier,
            store,
            clock,
            device_id: device_id.into(),
            debounce,
            timezone,
        }
    }

    /// Load, observe, debounce, notify if needed, persist.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let previous = self.store.load().await;
        info!("State loaded: {}", previous.state.summary());

        let device_online = self
            .source
            .online_status(&self.device_id)
            .await
            .map_err(CycleError::Observation)?;
        info!("Device {} online: {}", self.device_id, device_online);

        let Transition { state, notify } =
            transition(&previous.state, device_online, &self.debounce, &self.clock);
        info!("State processed: {} (notify: {})", state.summary(), notify);

        let mut record = StateRecord {
            state,
            notify_failed: false,
        };

        let mut notification_sent = false;
        if notify {
            let changed_at = state
                .first_observed_change_ts
                .or(state.last_change_ts)
                .unwrap_or_else(|| self.clock.now());
            let notification = Notification::PowerChanged {
                online: device_online,
                at: local_time(changed_at, self.timezone),
            };
            match self.notifier.send(&notification).await {
                Ok(()) => {
                    info!("Notification sent: {:?}", notification.text());
                    notification_sent = true;
                }
                Err(err) => {
                    error!("Notification failed: {err}");
                    record.notify_failed = true;
                }
            }
        }

        self.store
            .save(&record)
            .await
            .map_err(CycleError::Persist)?;

        Ok(CycleReport {
            device_online,
            notification_sent,
            state,
        })
    }

    /// Sends the fixed test message without touching the engine or the store.
    pub async fn send_test(&self) -> Result<(), NotifyError> {
        if !self.notifier.has_destination() {
            return Err(NotifyError::NoBackend);
        }
        let notification = Notification::Test {
            at: local_time(self.clock.now(), self.timezone),
        };
        self.notifier.send(&notification).await?;
        info!("Test notification sent");
        Ok(())
    }

    /// One cycle per `interval` until Ctrl-C. Cycles never overlap.
    pub async fn run_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Monitoring device {} every {}s",
            self.device_id,
            interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        warn!("Cycle failed: {err}");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }
    }
}
