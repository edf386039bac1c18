//! Convenience re-exports for common device types.

pub use crate::alert::AlertLine;
pub use crate::battery::{BatteryStatus, BatteryStatusReport, DischargeState, EnergyStorageSnapshot};
pub use crate::error::{PsuError, PsuResult};
pub use crate::progress::{FwProgress, FwUpdateStage, FwUpdateStatus};
pub use crate::psu::{PowerSupply, Psu, PsuId, PsuStatus, PsuVariant};
pub use crate::registry::{BusyGuard, PsuEntry, PsuRegistry, PsuSnapshot};
pub use crate::transport::{BusRequest, BusResponse, BusTransport, DeviceKind};
pub use psu_pmbus::{CompletionCode, PmBusCommand};
