use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RwRouter;
use crate::connection::{Connection, Driver};
use crate::error::SqlRouterError;

/// Options for configuring a router.
///
/// Deserializes from any serde format; missing fields take their defaults:
/// ```rust
/// use sql_rw_router::RouterOptions;
///
/// let opts: RouterOptions = serde_json::from_str(r#"{"max_open_conns": 20}"#).unwrap();
/// assert!(opts.sticky);
/// assert_eq!(opts.max_open_conns, Some(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Send a handle's reads to the writer once it has written. Default: true
    pub sticky: bool,
    /// Idle limit for every connection; unset leaves the driver default alone.
    pub max_idle_conns: Option<usize>,
    pub max_open_conns: Option<usize>,
    pub conn_max_lifetime: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            sticky: true,
            max_idle_conns: None,
            max_open_conns: None,
            conn_max_lifetime: None,
        }
    }
}

/// Limits remembered by the shared pool and applied to every connection that joins it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ConnLimits {
    pub(crate) max_idle: Option<usize>,
    pub(crate) max_open: Option<usize>,
    // outer `None`: never set; inner `None`: explicitly unlimited
    pub(crate) max_lifetime: Option<Option<Duration>>,
}

impl ConnLimits {
    pub(crate) fn from_options(opts: &RouterOptions) -> Self {
        Self {
            max_idle: opts.max_idle_conns,
            max_open: opts.max_open_conns,
            max_lifetime: opts.conn_max_lifetime.map(Some),
        }
    }

    pub(crate) fn apply<C: Connection>(&self, conn: &C) {
        // An idle limit is only pushed when it was asked for: some drivers treat
        // an explicit zero differently from never having set one.
        if let Some(n) = self.max_idle {
            conn.set_max_idle_conns(n);
        }
        if let Some(n) = self.max_open {
            conn.set_max_open_conns(n);
        }
        if let Some(lifetime) = self.max_lifetime {
            conn.set_conn_max_lifetime(lifetime);
        }
    }
}

/// Fluent builder for a router.
pub struct RouterBuilder<D> {
    driver: D,
    descriptors: Vec<String>,
    opts: RouterOptions,
}

impl<D: Driver> RouterBuilder<D> {
    /// The first descriptor names the writer, the rest name readers.
    #[must_use]
    pub fn new<S: AsRef<str>>(driver: D, descriptors: &[S]) -> Self {
        Self {
            driver,
            descriptors: descriptors.iter().map(|d| d.as_ref().to_string()).collect(),
            opts: RouterOptions::default(),
        }
    }

    #[must_use]
    pub fn options(mut self, opts: RouterOptions) -> Self {
        self.opts = opts;
        self
    }

    #[must_use]
    pub fn sticky(mut self, sticky: bool) -> Self {
        self.opts.sticky = sticky;
        self
    }

    #[must_use]
    pub fn max_idle_conns(mut self, n: usize) -> Self {
        self.opts.max_idle_conns = Some(n);
        self
    }

    #[must_use]
    pub fn max_open_conns(mut self, n: usize) -> Self {
        self.opts.max_open_conns = Some(n);
        self
    }

    #[must_use]
    pub fn conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.opts.conn_max_lifetime = Some(lifetime);
        self
    }

    #[must_use]
    pub fn finish(self) -> (D, Vec<String>, RouterOptions) {
        (self.driver, self.descriptors, self.opts)
    }

    /// Open the writer, then start opening readers in the background.
    ///
    /// # Errors
    ///
    /// `NoDataSource` without descriptors, `WriterOpenFailed` when the first
    /// descriptor cannot be opened. Descriptors are handed to the driver as given;
    /// an empty one can be meaningful (environment defaults) and is the driver's call.
    pub async fn open(self) -> Result<RwRouter<D>, SqlRouterError> {
        let (driver, descriptors, opts) = self.finish();
        if descriptors.is_empty() {
            return Err(SqlRouterError::NoDataSource);
        }
        RwRouter::open_with_options(driver, &descriptors, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sticky_with_no_limits() {
        let opts = RouterOptions::default();
        assert!(opts.sticky);
        assert_eq!(ConnLimits::from_options(&opts), ConnLimits::default());
    }

    #[test]
    fn lifetime_from_options_counts_as_explicit() {
        let opts = RouterOptions {
            conn_max_lifetime: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let limits = ConnLimits::from_options(&opts);
        assert_eq!(limits.max_lifetime, Some(Some(Duration::from_secs(30))));
        assert_eq!(limits.max_idle, None);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: RouterOptions =
            serde_json::from_str(r#"{"sticky": false, "max_idle_conns": 0}"#).unwrap();
        assert!(!opts.sticky);
        assert_eq!(opts.max_idle_conns, Some(0));
        assert_eq!(opts.conn_max_lifetime, None);
    }
}
