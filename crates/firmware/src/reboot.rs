//! Bounded wait for the device to re-enumerate

use crate::error::{Result, UpdateError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};
use transport::{UsbCdcConnection, UsbHost};

/// Minimum time a device needs to re-enumerate after a restart
pub const MIN_WAIT_AFTER_RESTART: Duration = Duration::from_millis(7000);

/// Ceiling on the total wait after a restart
pub const MAX_WAIT_AFTER_RESTART: Duration = Duration::from_millis(30000);

/// Delay between probes once the minimum wait has passed
pub const PROBE_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest step between probes; a zero interval is raised to this
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

/// Reboot poll timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootWait {
    pub min_wait: Duration,
    pub probe_interval: Duration,
    pub max_wait: Duration,
}

impl Default for RebootWait {
    fn default() -> Self {
        Self {
            min_wait: MIN_WAIT_AFTER_RESTART,
            probe_interval: PROBE_INTERVAL,
            max_wait: MAX_WAIT_AFTER_RESTART,
        }
    }
}

impl RebootWait {
    /// Sleep `min_wait`, then probe every `probe_interval` until the device
    /// is found or the accumulated wait passes `max_wait`
    ///
    /// The interval is at least [`MIN_PROBE_INTERVAL`], so the wait always
    /// ends in [`UpdateError::RebootTimeout`] if the device stays away.
    ///
    /// Returns the number of probes it took. On success the device is
    /// recorded on `connection` for the next open.
    pub async fn wait_for_device<H: UsbHost>(&self, connection: &mut UsbCdcConnection<H>) -> Result<u32> {
        debug!("Waiting {:?} for the device to restart", self.min_wait);
        sleep(self.min_wait).await;

        let interval = self.probe_interval.max(MIN_PROBE_INTERVAL);
        let mut waited = self.min_wait;
        let mut probes = 0u32;
        while waited <= self.max_wait {
            probes += 1;
            if connection.find_supported_device() {
                info!("Device found after {:?} ({} probes)", waited, probes);
                return Ok(probes);
            }
            sleep(interval).await;
            waited += interval;
        }

        error!("Device did not reappear within {:?}", self.max_wait);
        Err(UpdateError::RebootTimeout(self.max_wait))
    }
}
