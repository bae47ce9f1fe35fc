use std::{
    net::IpAddr,
    sync::Arc,
};

use egress::EgressFilter;
use reqwest::dns::{
    Addrs,
    Name,
    Resolve,
    Resolving,
};

/// A DNS resolver that consults the egress filter on every resolution, so
/// no connection — initial or redirect hop — can reach a blocked address
/// through a name. IPv6 answers are discarded: only IPv4 can be vetted
/// against the blocklist, so only IPv4 may be dialed.
#[derive(Clone)]
pub struct FilteredDnsResolver {
    filter: Arc<EgressFilter>,
}

impl FilteredDnsResolver {
    pub fn new(filter: Arc<EgressFilter>) -> Self {
        Self { filter }
    }
}

impl Resolve for FilteredDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let filter = self.filter.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

            let mut allowed = Vec::new();
            for addr in addrs {
                match addr.ip() {
                    IpAddr::V4(v4) if !filter.is_blocked(v4) => allowed.push(addr),
                    IpAddr::V4(v4) => {
                        tracing::warn!("dropping blocked DNS answer {v4} for {host}");
                    },
                    IpAddr::V6(_) => {},
                }
            }
            if allowed.is_empty() {
                return Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("no permitted IPv4 address for {host}"),
                ))
                    as Box<dyn std::error::Error + Send + Sync>);
            }
            let iter: Addrs = Box::new(allowed.into_iter());
            Ok(iter)
        })
    }
}
