use std::time::Duration;

/// Default time to establish a transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time the LMS 2xx may take to acknowledge a configuration request.
pub const LMS2XX_DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time the LMS 2xx may take to deliver a scan.
pub const LMS2XX_DEFAULT_MEASUREMENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Extra time granted per averaged scan when requesting mean values.
pub const LMS2XX_MEAN_VALUES_TIME_PER_SCAN: Duration = Duration::from_millis(15);

/// Time to wait for a status reply while probing a baud rate.
pub const LMS2XX_BAUD_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Smallest averaging count accepted for mean values.
pub const LMS2XX_MIN_AVERAGING: u32 = 1;

/// Largest averaging count accepted for mean values.
pub const LMS2XX_MAX_AVERAGING: u32 = 250;

/// Default time the LMS 5xx may take to answer a configuration request.
pub const LMS5XX_DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time to wait for the next scan (a few scan periods at 25 Hz).
pub const LMS5XX_DEFAULT_MEASUREMENT_TIMEOUT: Duration = Duration::from_millis(200);

/// Default TCP endpoint of an LMS 5xx.
pub const LMS5XX_DEFAULT_ADDRESS: &str = "192.168.0.1:2111";

/// Factory default start of the field of view (-5 degrees), in 1/10000 degree.
pub const LMS5XX_DEFAULT_START_ANGLE: i32 = -50_000;

/// Factory default end of the field of view (185 degrees), in 1/10000 degree.
pub const LMS5XX_DEFAULT_STOP_ANGLE: i32 = 1_850_000;

/// Scans held between the background reader and `get_measurements`. Older scans are dropped.
pub const LMS5XX_SCAN_QUEUE_DEPTH: usize = 1;

/// Granularity at which blocking waits check for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
