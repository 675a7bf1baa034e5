//! Live servers and runners, one per port or build instance.

use crate::hmr::HmrServer;
use crate::runner::NodeRunner;
use crate::server::DevServer;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Map from key to shared instance with get-or-create semantics.
struct Slots<K, V> {
    entries: Mutex<FxHashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash, V> Default for Slots<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<K: Eq + Hash, V> Slots<K, V> {
    fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().get(key).cloned()
    }

    /// Returns the instance and whether it was just created.
    fn get_or_create(&self, key: K, create: impl FnOnce() -> Arc<V>) -> (Arc<V>, bool) {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return (Arc::clone(existing), false);
        }
        let created = create();
        entries.insert(key, Arc::clone(&created));
        (created, true)
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().remove(key)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Owns every dev server, HMR server and Node runner of a process.
///
/// Servers are keyed by the port they were configured for, runners by build
/// instance id. At most one instance exists per key.
#[derive(Default)]
pub struct DevServerRegistry {
    servers: Slots<u16, DevServer>,
    hmr_servers: Slots<u16, HmrServer>,
    runners: Slots<String, NodeRunner>,
}

impl DevServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self, port: u16) -> Option<Arc<DevServer>> {
        self.servers.get(&port)
    }

    pub fn get_or_create_server(
        &self,
        port: u16,
        create: impl FnOnce() -> Arc<DevServer>,
    ) -> (Arc<DevServer>, bool) {
        self.servers.get_or_create(port, create)
    }

    pub fn remove_server(&self, port: u16) -> Option<Arc<DevServer>> {
        self.servers.remove(&port)
    }

    pub fn hmr_server(&self, port: u16) -> Option<Arc<HmrServer>> {
        self.hmr_servers.get(&port)
    }

    pub fn get_or_create_hmr_server(
        &self,
        port: u16,
        create: impl FnOnce() -> Arc<HmrServer>,
    ) -> (Arc<HmrServer>, bool) {
        self.hmr_servers.get_or_create(port, create)
    }

    pub fn remove_hmr_server(&self, port: u16) -> Option<Arc<HmrServer>> {
        self.hmr_servers.remove(&port)
    }

    pub fn runner(&self, instance_id: &str) -> Option<Arc<NodeRunner>> {
        self.runners.get(&instance_id.to_string())
    }

    pub fn get_or_create_runner(
        &self,
        instance_id: &str,
        create: impl FnOnce() -> Arc<NodeRunner>,
    ) -> (Arc<NodeRunner>, bool) {
        self.runners.get_or_create(instance_id.to_string(), create)
    }

    pub fn remove_runner(&self, instance_id: &str) -> Option<Arc<NodeRunner>> {
        self.runners.remove(&instance_id.to_string())
    }

    /// No servers or runners are registered.
    pub fn is_empty(&self) -> bool {
        self.servers.len() == 0 && self.hmr_servers.len() == 0 && self.runners.len() == 0
    }
}
