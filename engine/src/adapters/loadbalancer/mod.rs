//! Load Balancer Adapter
//! One front-end listener per configured balancer

pub mod balancer;

pub use balancer::LoadBalancer;

use crate::domain::error::Result;
use crate::domain::services::ProcessManager;
use crate::infrastructure::config::LoadBalancerConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns every configured load balancer for the supervisor's lifetime
pub struct LoadBalancerManager {
    balancers: Vec<Arc<LoadBalancer>>,
}

impl LoadBalancerManager {
    pub fn new(configs: &[LoadBalancerConfig], manager: Arc<ProcessManager>) -> Result<Self> {
        let balancers = configs
            .iter()
            .map(|config| LoadBalancer::new(config, manager.clone()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { balancers })
    }

    /// Start every balancer; each serves until the token is cancelled
    pub fn start_all(&self, cancel: &CancellationToken) {
        for balancer in &self.balancers {
            let balancer = balancer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let name = balancer.name().to_string();
                if let Err(e) = balancer.serve(cancel).await {
                    error!(balancer = %name, error = %e, "load balancer terminated");
                }
            });
        }
        info!(count = self.balancers.len(), "load balancers started");
    }

    pub fn names(&self) -> Vec<String> {
        self.balancers.iter().map(|b| b.name().to_string()).collect()
    }
}
