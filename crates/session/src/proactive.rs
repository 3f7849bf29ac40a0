//! Proactive refresh timer

use crate::config::AuthConfig;
use crate::token::WeakTokenHolder;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Spawn the recurring expiry check for a holder
///
/// The task holds only a weak reference and exits once the holder is gone.
/// A failed refresh clears the credential without signalling a logout; the
/// next request then takes the reactive path.
pub(crate) fn spawn(holder: WeakTokenHolder) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now() + AuthConfig::PROACTIVE_TICK;
        let mut ticker = tokio::time::interval_at(start, AuthConfig::PROACTIVE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(holder) = holder.upgrade() else {
                break;
            };
            if holder.get().is_none() || !holder.is_nearing_expiry() {
                continue;
            }
            let Some(refresh) = holder.refresh_callback() else {
                continue;
            };

            debug!("Credential nearing expiry, refreshing proactively");
            match refresh().await {
                Ok(credential) => holder.set(Some(credential)),
                Err(e) => {
                    warn!("Proactive refresh failed: {e}");
                    holder.set(None);
                }
            }
        }
    })
}
