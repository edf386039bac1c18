//! Common imports for monitor users.

pub use crate::config::{MonitorConfig, MonitorConfigBuilder};
pub use crate::energy::{ENERGY_SCALING_FACTOR, EnergyBroadcast};
pub use crate::error::{MonitorError, MonitorResult};
pub use crate::faults::{FaultType, PsuFault, UnresolvedFault, UnresolvedKind};
pub use crate::monitor::{MonitorHandle, MonitorServices, MonitorStats, PassReport, PsuMonitor};
pub use crate::platform::{
    BladeAlertConfig, BladeManager, ChassisIndicator, CriticalBatteryEvent, PlatformActions,
};
pub use psu_device::{AlertLine, DischargeState, PsuId, PsuRegistry};
