//! Recording fakes for the monitor's chassis collaborators.

use parking_lot::Mutex;
use psu_device::AlertLine;
use psu_monitor::{
    BladeAlertConfig, BladeManager, ChassisIndicator, CriticalBatteryEvent, EnergyBroadcast,
    MonitorServices, PlatformActions,
};
use psu_pmbus::CompletionCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Blade manager that records broadcasts and alert configuration writes.
#[derive(Debug, Default)]
pub struct RecordingBlades {
    /// Powered blades and their alert configuration.
    pub blades: Mutex<BTreeMap<u8, BladeAlertConfig>>,
    /// Blades that answer broadcasts with this code.
    pub nack: Mutex<BTreeMap<u8, CompletionCode>>,
    /// Broadcasts received.
    pub broadcasts: Mutex<Vec<EnergyBroadcast>>,
    /// Alert configuration writes.
    pub config_writes: Mutex<Vec<(u8, BladeAlertConfig)>>,
    /// Panic inside the next broadcast.
    pub panic_on_broadcast: std::sync::atomic::AtomicBool,
}

impl RecordingBlades {
    /// `count` powered blades numbered from 1, none with DPC asserted.
    pub fn powered(count: u8) -> Arc<Self> {
        let blades = Self::default();
        {
            let mut map = blades.blades.lock();
            for id in 1..=count {
                map.insert(id, BladeAlertConfig::default());
            }
        }
        Arc::new(blades)
    }

    /// Assert DPC on `blade_id`.
    pub fn assert_dpc(&self, blade_id: u8) {
        self.blades.lock().entry(blade_id).or_default().dpc_asserted = true;
    }

    /// Broadcasts so far.
    pub fn broadcasts(&self) -> Vec<EnergyBroadcast> {
        self.broadcasts.lock().clone()
    }

    /// Alert configuration writes so far.
    pub fn config_writes(&self) -> Vec<(u8, BladeAlertConfig)> {
        self.config_writes.lock().clone()
    }
}

impl BladeManager for RecordingBlades {
    fn broadcast_energy_storage(&self, broadcast: &EnergyBroadcast) -> BTreeMap<u8, CompletionCode> {
        if self.panic_on_broadcast.load(Ordering::SeqCst) {
            panic!("blade manager exploded");
        }
        self.broadcasts.lock().push(*broadcast);
        let nack = self.nack.lock();
        self.blades
            .lock()
            .keys()
            .map(|id| (*id, nack.get(id).copied().unwrap_or(CompletionCode::Success)))
            .collect()
    }

    fn powered_blades(&self) -> Vec<u8> {
        self.blades.lock().keys().copied().collect()
    }

    fn alert_config(&self, blade_id: u8) -> Result<BladeAlertConfig, CompletionCode> {
        self.blades
            .lock()
            .get(&blade_id)
            .copied()
            .ok_or(CompletionCode::Timeout)
    }

    fn set_alert_config(&self, blade_id: u8, config: BladeAlertConfig) -> CompletionCode {
        self.config_writes.lock().push((blade_id, config));
        self.blades.lock().insert(blade_id, config);
        CompletionCode::Success
    }
}

/// Indicator that records every write.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    /// Values written, in order.
    pub writes: Mutex<Vec<bool>>,
}

impl RecordingIndicator {
    /// Values written so far.
    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().clone()
    }

    /// Last value written, false if never written.
    pub fn asserted(&self) -> bool {
        self.writes.lock().last().copied().unwrap_or(false)
    }
}

impl ChassisIndicator for RecordingIndicator {
    fn set_psu_failure(&self, asserted: bool) {
        self.writes.lock().push(asserted);
    }
}

/// Platform actions that count critical battery invocations.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    /// Events received.
    pub events: Mutex<Vec<CriticalBatteryEvent>>,
    /// Invocations that have returned.
    pub completed: AtomicUsize,
    /// Time each invocation blocks for.
    pub hold: Mutex<Duration>,
}

impl RecordingPlatform {
    /// Events so far.
    pub fn events(&self) -> Vec<CriticalBatteryEvent> {
        self.events.lock().clone()
    }

    /// Wait until `count` invocations have returned or `timeout` passes.
    pub fn wait_completed(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.completed.load(Ordering::SeqCst) >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.completed.load(Ordering::SeqCst) >= count
    }
}

impl PlatformActions for RecordingPlatform {
    fn critical_battery(&self, event: &CriticalBatteryEvent) {
        self.events.lock().push(*event);
        let hold = *self.hold.lock();
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// The three recording fakes plus the services built from them.
#[derive(Debug)]
pub struct RecordingChassis {
    /// Blade manager.
    pub blades: Arc<RecordingBlades>,
    /// Failure indicator.
    pub indicator: Arc<RecordingIndicator>,
    /// Platform actions.
    pub platform: Arc<RecordingPlatform>,
}

impl RecordingChassis {
    /// A chassis with `blades` powered blades.
    pub fn new(blades: u8) -> Self {
        Self {
            blades: RecordingBlades::powered(blades),
            indicator: Arc::new(RecordingIndicator::default()),
            platform: Arc::new(RecordingPlatform::default()),
        }
    }

    /// Monitor services wired to these fakes and `alert_line`.
    pub fn services(&self, alert_line: AlertLine) -> MonitorServices {
        MonitorServices {
            alert_line,
            blades: self.blades.clone(),
            indicator: self.indicator.clone(),
            platform: self.platform.clone(),
        }
    }
}
