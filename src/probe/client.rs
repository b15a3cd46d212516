//! HTTP clients, one per route.
//!
//! Building a reqwest client is comparatively expensive and a client owns
//! its connection pool, so clients are built lazily and shared by every
//! probe that goes through the same proxy.

use super::UA;
use crate::errors::ProbeError;
use crate::proxy::ProxyEndpoint;
use log::debug;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;

const DIRECT: &str = "direct";

#[derive(Debug, Default)]
pub(crate) struct ClientCache {
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientCache {
    /// Client routing through `via`, or a direct client.
    pub(crate) fn get(
        &self,
        via: Option<&ProxyEndpoint>,
    ) -> Result<Client, ProbeError> {
        let key = match via {
            Some(endpoint) => endpoint
                .proxy_url()
                .map_err(|e| ProbeError::Resource(e.message))?
                .to_string(),
            None => DIRECT.to_string(),
        };

        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ProbeError::Resource("client cache poisoned".into()))?;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build(via)?;
        debug!("Built HTTP client for {}", key);
        clients.insert(key, client.clone());

        Ok(client)
    }
}

fn build(via: Option<&ProxyEndpoint>) -> Result<Client, ProbeError> {
    let builder = Client::builder().user_agent(UA);

    let builder = match via {
        Some(endpoint) => {
            let url = endpoint
                .proxy_url()
                .map_err(|e| ProbeError::Resource(e.message))?;
            let proxy = Proxy::all(url.as_str())
                .map_err(|e| ProbeError::Resource(e.to_string()))?;
            builder.proxy(proxy)
        }
        // Direct probes must not pick up proxies from the environment.
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| ProbeError::Resource(e.to_string()))
}
