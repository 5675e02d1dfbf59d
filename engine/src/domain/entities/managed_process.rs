//! ManagedProcess entity
//! A configured logical service and its live instances

use crate::domain::entities::Instance;
use crate::domain::value_objects::InstanceStatus;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Static description of a managed process, fixed at initialization.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Logical name, unique across the supervisor
    pub name: String,
    /// Source repository identifier, e.g. `owner/repo`
    pub repository: String,
    /// Pinned binary path; when unset the newest versioned binary is used
    pub binary_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// Base port hint from configuration (informational; allocation probes)
    pub port_hint: u16,
    pub auto_restart: bool,
    /// Maximum concurrent instances, at least 1
    pub max_instances: usize,
    /// Secret keys to pull into the environment file
    pub secrets_keys: Vec<String>,
    /// Static environment entries written into the environment file
    pub env: HashMap<String, String>,
}

/// A logical service under supervision. Created at initialization, lives for
/// the supervisor's lifetime, owns the forward list of its instances.
pub struct ManagedProcess {
    spec: ProcessSpec,
    instances: RwLock<Vec<Arc<Instance>>>,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            instances: RwLock::new(Vec::new()),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn add_instance(&self, instance: Arc<Instance>) {
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(instance);
    }

    /// Idempotent removal by instance id
    pub fn remove_instance(&self, instance_id: &str) {
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|i| i.id() != instance_id);
    }

    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn instance(&self, instance_id: &str) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|i| i.id() == instance_id)
            .cloned()
    }

    pub fn running_instances(&self) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|i| i.status() == InstanceStatus::Running)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StderrBuffer;

    fn spec(name: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            max_instances: 2,
            ..Default::default()
        }
    }

    fn instance(name: &str, port: u16) -> Arc<Instance> {
        Arc::new(Instance::new(
            name,
            1000 + u32::from(port),
            port,
            PathBuf::from("data/svc.env"),
            StderrBuffer::new(),
        ))
    }

    #[test]
    fn test_add_and_remove_instance() {
        let proc = ManagedProcess::new(spec("svc"));
        let inst = instance("svc", 5001);
        let id = inst.id().to_string();
        proc.add_instance(inst);
        assert_eq!(proc.instances().len(), 1);
        proc.remove_instance(&id);
        assert!(proc.instances().is_empty());
        // Removal is idempotent
        proc.remove_instance(&id);
    }

    #[test]
    fn test_running_instances_filters_by_status() {
        let proc = ManagedProcess::new(spec("svc"));
        let a = instance("svc", 5001);
        let b = instance("svc", 5002);
        a.set_status(InstanceStatus::Running);
        proc.add_instance(a);
        proc.add_instance(b);
        assert_eq!(proc.running_instances().len(), 1);
        assert_eq!(proc.running_instances()[0].port(), 5001);
    }

    #[test]
    fn test_instance_lookup_by_id() {
        let proc = ManagedProcess::new(spec("svc"));
        let inst = instance("svc", 5001);
        let id = inst.id().to_string();
        proc.add_instance(inst);
        assert!(proc.instance(&id).is_some());
        assert!(proc.instance("missing").is_none());
    }
}
