//! Hook configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of provider slots.
///
/// The table is wired kernel memory, so the bound exists to cap what a
/// hostile user space can force the kernel to hold.
pub const DEFAULT_PROVIDER_CAPACITY: usize = 32;

/// Default period between response-flag polls while an interceptor
/// thread is blocked on a provider.
pub const DEFAULT_RESPONSE_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Process names of filesystem crawlers whose accesses against
/// placeholders are denied outright.
pub const DEFAULT_CRAWLER_PROCNAMES: [&str; 5] =
    ["mds", "mdworker", "mds_stores", "fseventsd", "Spotlight"];

/// Tunable parameters of the hook core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookParams {
    /// Number of provider slots in the registry.
    pub provider_capacity: usize,

    /// Blocked interceptor threads re-check the response flag at this
    /// interval; it bounds each individual sleep, not the total wait.
    pub response_poll_period: Duration,

    /// Exact process names treated as filesystem crawlers.
    pub crawler_procnames: Vec<String>,

    /// Upper bound on root and relative paths, matching the filesystem's
    /// maximum path length.
    pub max_path_bytes: usize,
}

impl Default for HookParams {
    fn default() -> Self {
        Self {
            provider_capacity: DEFAULT_PROVIDER_CAPACITY,
            response_poll_period: DEFAULT_RESPONSE_POLL_PERIOD,
            crawler_procnames: DEFAULT_CRAWLER_PROCNAMES
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_path_bytes: projvfs_wire::MAX_PATH_BYTES,
        }
    }
}

impl HookParams {
    /// True if `procname` names a known filesystem crawler.
    #[must_use]
    pub fn is_crawler(&self, procname: &str) -> bool {
        self.crawler_procnames.iter().any(|name| name == procname)
    }
}
