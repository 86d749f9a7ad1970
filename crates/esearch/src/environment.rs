//! Device conditions that gate the index build
//!
//! The host platform reports network, thermal, battery and app lifecycle
//! changes; free disk space and available memory are polled through a
//! [`DeviceProbe`]. Each condition maps to one independent [`PauseReason`].

use std::path::Path;
use std::sync::Mutex;

use log::debug;
use sysinfo::{Disks, System};

use crate::config::IndexConfig;
use crate::models::{PauseFlags, PauseReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Unreachable,
    Wifi,
    Cellular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// 0.0 to 1.0
    pub level: f32,
    pub charging: bool,
    pub low_power_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
    /// The platform's background execution window ran out
    BackgroundExpired,
}

/// One report from the host or the probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Network(NetworkStatus),
    Thermal(ThermalState),
    Battery(BatteryStatus),
    AppState(AppState),
    FreeStorage(u64),
    AllowMobileData(bool),
}

/// Folds observations into pause flags
#[derive(Debug, Clone)]
pub struct EnvironmentMonitor {
    allow_mobile_data: bool,
    low_battery_threshold: f32,
    low_storage_limit: u64,
    network: Option<NetworkStatus>,
    app_state: AppState,
    flags: PauseFlags,
}

impl EnvironmentMonitor {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            allow_mobile_data: config.allow_mobile_data,
            low_battery_threshold: config.low_battery_threshold,
            low_storage_limit: config.low_storage_limit_bytes,
            network: None,
            app_state: AppState::Foreground,
            flags: PauseFlags::new(),
        }
    }

    /// Apply one observation. Returns true if any flag changed.
    pub fn observe(&mut self, observation: Observation) -> bool {
        let before = self.flags.clone();
        match observation {
            Observation::Network(status) => {
                self.network = Some(status);
                self.apply_network();
            }
            Observation::AllowMobileData(allow) => {
                self.allow_mobile_data = allow;
                self.apply_network();
            }
            Observation::Thermal(state) => match state {
                ThermalState::Critical => {
                    self.flags.set(PauseReason::Overheating, true);
                }
                ThermalState::Nominal | ThermalState::Fair => {
                    self.flags.set(PauseReason::Overheating, false);
                }
                // Hold whatever was last decided
                ThermalState::Serious => {}
            },
            Observation::Battery(battery) => {
                let low = battery.low_power_mode
                    || (battery.level < self.low_battery_threshold && !battery.charging);
                self.flags.set(PauseReason::LowBattery, low);
            }
            Observation::AppState(state) => {
                self.app_state = state;
                match state {
                    AppState::BackgroundExpired => {
                        self.flags.set(PauseReason::BackgroundExpired, true);
                    }
                    AppState::Foreground => {
                        self.flags.set(PauseReason::BackgroundExpired, false);
                    }
                    AppState::Background => {}
                }
            }
            Observation::FreeStorage(bytes) => {
                self.flags
                    .set(PauseReason::LowStorage, bytes < self.low_storage_limit);
            }
        }

        let changed = before != self.flags;
        if changed {
            debug!("Environment pause reasons now {:?}", self.flags.reasons());
        }
        changed
    }

    pub fn flags(&self) -> &PauseFlags {
        &self.flags
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn in_background(&self) -> bool {
        self.app_state != AppState::Foreground
    }

    fn apply_network(&mut self) {
        let Some(network) = self.network else {
            return;
        };
        let (unreachable, wifi_required) = match network {
            NetworkStatus::Unreachable => (true, true),
            NetworkStatus::Wifi => (false, false),
            NetworkStatus::Cellular => (false, !self.allow_mobile_data),
        };
        self.flags.set(PauseReason::NetworkUnreachable, unreachable);
        self.flags.set(PauseReason::WifiRequired, wifi_required);
    }
}

/// Memory and disk telemetry
pub trait DeviceProbe: Send + Sync {
    /// Bytes of memory available to the process
    fn available_memory(&self) -> u64;

    /// Free bytes on the volume holding `path`
    fn free_disk_space(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProbe for SysinfoProbe {
    fn available_memory(&self) -> u64 {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                system.available_memory()
            }
            Err(_) => 0,
        }
    }

    fn free_disk_space(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        // Longest mount point that contains the path
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Fixed readings, for hosts that report their own telemetry and for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub available_memory: u64,
    pub free_disk_space: Option<u64>,
}

impl DeviceProbe for FixedProbe {
    fn available_memory(&self) -> u64 {
        self.available_memory
    }

    fn free_disk_space(&self, _path: &Path) -> Option<u64> {
        self.free_disk_space
    }
}
