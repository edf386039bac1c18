//! Firmware update manager.
//!
//! Checks preconditions synchronously, then runs each update on its own
//! worker thread. The worker owns the PSU's [`BusyGuard`], so the busy flag
//! is cleared on every exit path, panics included.

use crate::engine::FirmwareUpdateEngine;
use crate::error::{FirmwareUpdateError, FirmwareUpdateResult};
use crate::target::{Target, TargetLayout};
use crate::timing::UpdateTimings;
use psu_device::{BusyGuard, FwUpdateStatus, PsuId, PsuRegistry};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Starts firmware updates against a PSU registry.
#[derive(Debug, Clone)]
pub struct FirmwareUpdateManager {
    registry: PsuRegistry,
    timings: UpdateTimings,
    primary: TargetLayout,
    secondary: TargetLayout,
}

impl FirmwareUpdateManager {
    /// Create a manager with the device-mandated timings and production layouts.
    #[must_use]
    pub fn new(registry: PsuRegistry) -> Self {
        Self {
            registry,
            timings: UpdateTimings::default(),
            primary: TargetLayout::PRIMARY,
            secondary: TargetLayout::SECONDARY,
        }
    }

    /// Override the timings.
    #[must_use]
    pub fn with_timings(mut self, timings: UpdateTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Override the layout of `layout.target`.
    #[must_use]
    pub fn with_layout(mut self, layout: TargetLayout) -> Self {
        match layout.target {
            Target::Primary => self.primary = layout,
            Target::Secondary => self.secondary = layout,
        }
        self
    }

    /// Layout used for `target`.
    #[must_use]
    pub fn layout(&self, target: Target) -> &TargetLayout {
        match target {
            Target::Primary => &self.primary,
            Target::Secondary => &self.secondary,
        }
    }

    /// Start updating PSU `psu_id` and return immediately.
    ///
    /// The PSU is marked busy before this returns. Progress is observable
    /// through the registry entry once the worker holds the PSU lock; the
    /// handle yields the final outcome.
    ///
    /// # Errors
    ///
    /// Returns [`FirmwareUpdateError::UnknownPsu`] or
    /// [`FirmwareUpdateError::UpdateInProgress`] without spawning a worker,
    /// or [`FirmwareUpdateError::Spawn`] if the thread cannot be started.
    pub fn start_update(
        &self,
        psu_id: u8,
        image_path: impl Into<PathBuf>,
        target: Target,
    ) -> FirmwareUpdateResult<UpdateHandle> {
        let entry = PsuId::new(psu_id)
            .and_then(|id| self.registry.get(id))
            .ok_or(FirmwareUpdateError::UnknownPsu(psu_id))?;
        let guard = entry
            .try_claim()
            .ok_or(FirmwareUpdateError::UpdateInProgress(psu_id))?;

        let engine = FirmwareUpdateEngine::new(*self.layout(target), self.timings);
        let image_path = image_path.into();
        info!(psu_id, %target, image = %image_path.display(), "Spawning firmware update worker");

        let thread = std::thread::Builder::new()
            .name(format!("psu-fw-update-{psu_id}"))
            .spawn(move || run_worker(&guard, &engine, &image_path))
            .map_err(FirmwareUpdateError::Spawn)?;

        Ok(UpdateHandle { psu_id, thread })
    }
}

fn run_worker(
    guard: &BusyGuard,
    engine: &FirmwareUpdateEngine,
    image_path: &std::path::Path,
) -> FirmwareUpdateResult<()> {
    let entry = guard.entry();
    let psu_id = entry.id().get();
    match catch_unwind(AssertUnwindSafe(|| engine.run(guard, image_path))) {
        Ok(result) => result,
        Err(_) => {
            let _device = entry.lock();
            entry.set_status(FwUpdateStatus::Failed);
            error!(psu_id, stage = %entry.progress().stage, "Firmware update worker panicked");
            Err(FirmwareUpdateError::WorkerPanicked(psu_id))
        }
    }
}

/// Handle to a running update.
#[derive(Debug)]
pub struct UpdateHandle {
    psu_id: u8,
    thread: JoinHandle<FirmwareUpdateResult<()>>,
}

impl UpdateHandle {
    /// PSU being updated.
    #[must_use]
    pub fn psu_id(&self) -> u8 {
        self.psu_id
    }

    /// True once the worker has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the update to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's error, or [`FirmwareUpdateError::WorkerPanicked`].
    pub fn join(self) -> FirmwareUpdateResult<()> {
        self.thread
            .join()
            .unwrap_or(Err(FirmwareUpdateError::WorkerPanicked(self.psu_id)))
    }
}
