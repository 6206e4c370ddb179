//! Shared agent state: persistent sysinfo handles, subscriber registry,
//! and the resolved configuration.

use std::sync::Arc;

use sysinfo::{Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::registry::Registry;

pub type SharedSystem = Arc<Mutex<System>>;
pub type SharedNetworks = Arc<Mutex<Networks>>;
pub type SharedDisks = Arc<Mutex<Disks>>;
pub type SharedComponents = Arc<Mutex<Components>>;

#[derive(Clone)]
pub struct AppState {
    pub sys: SharedSystem,
    pub networks: SharedNetworks,
    pub disks: SharedDisks,
    pub components: SharedComponents,
    pub registry: Arc<Registry>,
    pub hostname: String,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_all();

        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".into());

        Self {
            sys: Arc::new(Mutex::new(sys)),
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
            components: Arc::new(Mutex::new(Components::new_with_refreshed_list())),
            registry: Arc::new(Registry::new()),
            hostname,
            config,
        }
    }
}
