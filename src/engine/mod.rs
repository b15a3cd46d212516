//! Test orchestration and monitoring.
//!
//! Both drivers work on [`Route`]s: an admitted proxy endpoint, or the
//! direct connection when nothing was admitted and the policy allows it.

pub mod monitor;
pub mod orchestrator;
pub(crate) mod pool;

pub use monitor::{Monitor, MonitorHandle};
pub use orchestrator::TestOrchestrator;

use crate::config::NoProxyPolicy;
use crate::errors::{Result, SpeedTestError};
use crate::proxy::{unique_names, ProxyEndpoint};
use crate::results::DIRECT;
use log::warn;

/// Where probes go: through a proxy, or direct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub endpoint: Option<ProxyEndpoint>,
}

impl Route {
    pub fn direct() -> Self {
        Self { name: DIRECT.to_string(), endpoint: None }
    }

    pub fn via(endpoint: ProxyEndpoint) -> Self {
        Self { name: endpoint.name.clone(), endpoint: Some(endpoint) }
    }

    /// Protocol label for reports.
    pub fn kind(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => endpoint.kind.to_string(),
            None => "direct".to_string(),
        }
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }
}

/// Turn the admitted endpoints into uniquely named routes, applying
/// `policy` when none was admitted.
///
/// # Returns
/// The routes and whether the direct fallback was used
pub fn plan_routes(
    admitted: Vec<ProxyEndpoint>,
    candidates: usize,
    policy: NoProxyPolicy,
) -> Result<(Vec<Route>, bool)> {
    if !admitted.is_empty() {
        let routes = unique_names(admitted).into_iter().map(Route::via);
        return Ok((routes.collect(), false));
    }

    match policy {
        NoProxyPolicy::DirectFallback => {
            warn!(
                "No proxy admitted out of {} candidates, testing directly",
                candidates
            );
            Ok((vec![Route::direct()], true))
        }
        NoProxyPolicy::Fail => {
            Err(SpeedTestError::no_proxy_available(candidates))
        }
    }
}
