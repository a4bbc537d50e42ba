//! Periodic hub maintenance: presence refresh, liveness sweep and the
//! reliable-delivery retry pump.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        task::JoinHandle,
        time::{Instant, MissedTickBehavior, interval},
    },
    tracing::debug,
};

use crate::{hub::Hub, state::GatewayState};

/// Run `step` against the hub every `period` until the task is aborted.
fn spawn_interval(
    state: &Arc<GatewayState>,
    period: Duration,
    step: fn(&mut Hub, std::time::Instant),
) -> JoinHandle<()> {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let mut hub = state.hub.lock().await;
            step(&mut hub, Instant::now().into_std());
        }
    })
}

/// Spawn the three maintenance loops. Handles are returned so callers can
/// abort them on shutdown.
pub fn spawn_timers(state: &Arc<GatewayState>) -> Vec<JoinHandle<()>> {
    let config = &state.config;
    debug!(
        presence_ms = config.presence.tick_interval().as_millis() as u64,
        sweep_ms = config.presence.sweep_interval().as_millis() as u64,
        pump_ms = config.reliable.pump_interval().as_millis() as u64,
        "starting hub timers"
    );
    vec![
        spawn_interval(state, config.presence.tick_interval(), Hub::presence_tick),
        spawn_interval(state, config.presence.sweep_interval(), |hub, now| {
            hub.sweep_stale(now);
        }),
        spawn_interval(state, config.reliable.pump_interval(), Hub::pump_retries),
    ]
}
