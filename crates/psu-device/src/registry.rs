//! Process-wide PSU registry.
//!
//! One [`PsuEntry`] per slot bundles the PSU's bus lock, its firmware update
//! busy flag and its cached state. The registry owns every entry; workers
//! borrow one entry at a time through an `Arc`.

use crate::battery::EnergyStorageSnapshot;
use crate::error::{PsuError, PsuResult};
use crate::progress::{FwProgress, FwUpdateStage, FwUpdateStatus};
use crate::psu::{PowerSupply, Psu, PsuId, PsuStatus, PsuVariant};
use crate::transport::BusTransport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Last status read, with its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedStatus {
    /// Decoded status.
    pub status: PsuStatus,
    /// When it was read.
    pub read_at: DateTime<Utc>,
}

/// State owned for a single PSU slot.
#[derive(Debug)]
pub struct PsuEntry {
    id: PsuId,
    device: Mutex<Box<dyn PowerSupply>>,
    busy: AtomicBool,
    progress: RwLock<FwProgress>,
    last_status: RwLock<Option<CachedStatus>>,
    energy_storage: RwLock<Option<EnergyStorageSnapshot>>,
}

impl PsuEntry {
    fn new(device: Box<dyn PowerSupply>) -> Self {
        Self {
            id: device.id(),
            device: Mutex::new(device),
            busy: AtomicBool::new(false),
            progress: RwLock::new(FwProgress::default()),
            last_status: RwLock::new(None),
            energy_storage: RwLock::new(None),
        }
    }

    /// Slot id.
    #[must_use]
    pub fn id(&self) -> PsuId {
        self.id
    }

    /// Take the PSU's bus lock.
    ///
    /// Hold it for the whole of a multi-transaction sequence and never across
    /// a monitor sleep.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn PowerSupply>> {
        self.device.lock()
    }

    /// True while a firmware update owns this PSU.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the busy flag. `None` if it is already set.
    ///
    /// The flag is released when the returned guard drops, including during
    /// a panic unwind.
    #[must_use]
    pub fn try_claim(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                entry: Arc::clone(self),
            })
    }

    /// Current firmware update progress.
    #[must_use]
    pub fn progress(&self) -> FwProgress {
        *self.progress.read()
    }

    /// Record the stage about to be attempted.
    pub fn set_stage(&self, stage: FwUpdateStage) {
        self.progress.write().stage = stage;
    }

    /// Record the overall update status.
    pub fn set_status(&self, status: FwUpdateStatus) {
        self.progress.write().status = status;
    }

    /// Last status read by the monitor.
    #[must_use]
    pub fn cached_status(&self) -> Option<CachedStatus> {
        *self.last_status.read()
    }

    /// Cache a status read.
    pub fn record_status(&self, status: PsuStatus) {
        *self.last_status.write() = Some(CachedStatus {
            status,
            read_at: Utc::now(),
        });
    }

    /// Last energy storage snapshot.
    #[must_use]
    pub fn energy_storage(&self) -> Option<EnergyStorageSnapshot> {
        *self.energy_storage.read()
    }

    /// Replace the energy storage snapshot.
    pub fn set_energy_storage(&self, snapshot: EnergyStorageSnapshot) {
        *self.energy_storage.write() = Some(snapshot);
    }

    /// Serializable diagnostic view.
    #[must_use]
    pub fn snapshot(&self) -> PsuSnapshot {
        let progress = self.progress();
        PsuSnapshot {
            id: self.id,
            busy: self.is_busy(),
            fw_status: progress.status,
            fw_stage: progress.stage,
            status: self.cached_status(),
            energy_storage: self.energy_storage(),
        }
    }
}

/// Clears the busy flag of its entry on drop.
#[derive(Debug)]
pub struct BusyGuard {
    entry: Arc<PsuEntry>,
}

impl BusyGuard {
    /// The claimed entry.
    #[must_use]
    pub fn entry(&self) -> &Arc<PsuEntry> {
        &self.entry
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.entry.busy.store(false, Ordering::Release);
    }
}

/// Per-PSU diagnostic view for the external API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsuSnapshot {
    /// Slot id.
    pub id: PsuId,
    /// Firmware update in progress.
    pub busy: bool,
    /// Firmware update status.
    pub fw_status: FwUpdateStatus,
    /// Firmware update stage.
    pub fw_stage: FwUpdateStage,
    /// Last status read.
    pub status: Option<CachedStatus>,
    /// Last energy storage snapshot.
    pub energy_storage: Option<EnergyStorageSnapshot>,
}

/// Owns one entry per PSU slot, indexed by id.
#[derive(Debug, Clone)]
pub struct PsuRegistry {
    entries: Vec<Arc<PsuEntry>>,
}

impl PsuRegistry {
    /// Build from devices already in slot order (ids 1, 2, ...).
    ///
    /// # Errors
    ///
    /// Returns [`PsuError::RegistryOrder`] if a device sits in the wrong slot.
    pub fn new(devices: Vec<Box<dyn PowerSupply>>) -> PsuResult<Self> {
        let mut entries = Vec::with_capacity(devices.len());
        for (expected, device) in (1..=u8::MAX).zip(devices) {
            let found = device.id().get();
            if found != expected {
                return Err(PsuError::RegistryOrder { expected, found });
            }
            entries.push(Arc::new(PsuEntry::new(device)));
        }
        Ok(Self { entries })
    }

    /// Build one [`Psu`] per variant on a shared transport, ids from 1.
    #[must_use]
    pub fn from_variants(transport: &Arc<dyn BusTransport>, variants: &[PsuVariant]) -> Self {
        let entries = (1..=u8::MAX)
            .zip(variants)
            .filter_map(|(id, variant)| {
                let id = PsuId::new(id)?;
                let psu = Psu::new(id, *variant, Arc::clone(transport));
                Some(Arc::new(PsuEntry::new(Box::new(psu))))
            })
            .collect();
        Self { entries }
    }

    /// Entry for `id`.
    #[must_use]
    pub fn get(&self, id: PsuId) -> Option<&Arc<PsuEntry>> {
        self.entries.get(id.index())
    }

    /// Entry for a raw slot number.
    ///
    /// # Errors
    ///
    /// Returns [`PsuError::UnknownPsu`] for ids outside the registry.
    pub fn entry(&self, id: u8) -> PsuResult<&Arc<PsuEntry>> {
        PsuId::new(id)
            .and_then(|id| self.get(id))
            .ok_or(PsuError::UnknownPsu(id))
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PsuEntry>> {
        self.entries.iter()
    }

    /// Number of PSUs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the registry has no PSUs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostic view of every PSU.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PsuSnapshot> {
        self.entries.iter().map(|entry| entry.snapshot()).collect()
    }
}
