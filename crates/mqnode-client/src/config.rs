use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};

// Default time to wait for a reply from the manager.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Default observation periods, in seconds.
const DEFAULT_PMIN: u64 = 1;
const DEFAULT_PMAX: u64 = 60;

// Default registration lifetime, in seconds.
const DEFAULT_LIFETIME: u64 = 86_400;

// Default protocol version announced at registration.
const DEFAULT_VERSION: &str = "v0.0.1";

// Period of the lifetime keep-alive counter.
const DEFAULT_LIFETIME_TICK: Duration = Duration::from_secs(1);

/// Device attributes sent to the manager at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttributes {
    /// Registration lifetime, in seconds.
    pub lifetime: u64,
    /// Device IP address.
    pub ip: String,
    /// Device MAC address.
    pub mac: String,
    /// Protocol version.
    pub version: String,
}

/// The client configuration.
///
/// ## Parameters
///
/// - **`client_id`**
///   The stable identifier every topic is templated on.
///
/// - **`request_timeout`**
///   How long a client-initiated request waits for its reply before
///   resolving as a timeout. Defaults to 10 seconds.
///   See [`Config::request_timeout()`].
///
/// - **`default_pmin`** and **`default_pmax`**
///   Observation periods, in seconds, assigned to a node whose attributes
///   have never been written. Default to 1 and 60 seconds.
///   See [`Config::default_periods()`].
///
/// - **`lifetime_tick`**
///   The period of the counter refreshing the registration once its
///   lifetime expires. Defaults to 1 second.
///   See [`Config::lifetime_tick()`].
///
/// - **Device attributes**
///   The lifetime, IP address, MAC address, and protocol version
///   sent at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) client_id: String,
    pub(crate) request_timeout: Duration,
    pub(crate) default_pmin: u64,
    pub(crate) default_pmax: u64,
    pub(crate) lifetime_tick: Duration,
    pub(crate) device: DeviceAttributes,
}

impl Config {
    /// Creates a [`Config`] for the given client identifier.
    #[must_use]
    #[inline]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_pmin: DEFAULT_PMIN,
            default_pmax: DEFAULT_PMAX,
            lifetime_tick: DEFAULT_LIFETIME_TICK,
            device: DeviceAttributes {
                lifetime: DEFAULT_LIFETIME,
                ip: String::new(),
                mac: String::new(),
                version: DEFAULT_VERSION.into(),
            },
        }
    }

    /// Sets the reply timeout of client-initiated requests.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default observation periods, in seconds.
    #[must_use]
    pub const fn default_periods(mut self, pmin: u64, pmax: u64) -> Self {
        self.default_pmin = pmin;
        self.default_pmax = pmax;
        self
    }

    /// Sets the registration lifetime, in seconds.
    #[must_use]
    pub const fn lifetime(mut self, lifetime: u64) -> Self {
        self.device.lifetime = lifetime;
        self
    }

    /// Sets the period of the lifetime keep-alive counter.
    ///
    /// The registration is refreshed after `lifetime` periods.
    #[must_use]
    pub const fn lifetime_tick(mut self, tick: Duration) -> Self {
        self.lifetime_tick = tick;
        self
    }

    /// Sets the device IP address.
    #[must_use]
    #[inline]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.device.ip = ip.into();
        self
    }

    /// Sets the device MAC address.
    #[must_use]
    #[inline]
    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.device.mac = mac.into();
        self
    }

    /// Sets the protocol version.
    #[must_use]
    #[inline]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.device.version = version.into();
        self
    }

    /// Returns the client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_id.contains(['/', '+', '#']) {
            return Err(Error::new(
                ErrorKind::Config,
                format!("`{}` is not a valid client identifier", self.client_id),
            ));
        }

        if self.lifetime_tick.is_zero() {
            return Err(Error::new(
                ErrorKind::Config,
                "The lifetime tick must not be zero",
            ));
        }

        if self.default_pmax != 0 && self.default_pmin > self.default_pmax {
            return Err(Error::new(
                ErrorKind::Config,
                "The default minimum period exceeds the maximum one",
            ));
        }

        Ok(())
    }
}
