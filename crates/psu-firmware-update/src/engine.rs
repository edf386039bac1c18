//! The firmware update stage machine.
//!
//! [`FirmwareUpdateEngine::run`] executes one update synchronously while
//! holding the PSU's lock for the whole run. Progress is published through
//! the registry entry before each stage is attempted, so after a failure the
//! recorded stage is exactly where the run stopped.

use crate::error::{FirmwareUpdateError, FirmwareUpdateResult};
use crate::image::{FirmwareImage, PlanStep, WritePlan};
use crate::target::{TargetLayout, enter_mode_pec};
use crate::timing::{UpdateTimings, pause};
use psu_device::{BusyGuard, FwUpdateStage, FwUpdateStatus, PowerSupply, PsuEntry, PsuResult};
use psu_pmbus::{FirmwareDeviceStatus, PmBusCommand, twos_complement_checksum};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Runs updates for one target layout.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareUpdateEngine {
    layout: TargetLayout,
    timings: UpdateTimings,
}

impl FirmwareUpdateEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(layout: TargetLayout, timings: UpdateTimings) -> Self {
        Self { layout, timings }
    }

    /// Layout this engine programs.
    #[must_use]
    pub fn layout(&self) -> &TargetLayout {
        &self.layout
    }

    /// Update the PSU claimed by `guard` with the image at `image_path`.
    ///
    /// Blocks until the run finishes. The entry ends with status `Success`
    /// and stage `Completed`, or status `Failed` and the stage that failed.
    /// The monitor skips the PSU for as long as `guard` is held.
    ///
    /// # Errors
    ///
    /// Returns the first error of the run. A failure to leave the bootloader
    /// during cleanup is logged and never replaces it.
    pub fn run(&self, guard: &BusyGuard, image_path: &Path) -> FirmwareUpdateResult<()> {
        let entry: &PsuEntry = guard.entry();
        let psu_id = entry.id();
        let device = entry.lock();
        entry.set_status(FwUpdateStatus::InProgress);
        entry.set_stage(FwUpdateStage::NotStarted);
        info!(
            psu_id = %psu_id,
            target = %self.layout.target,
            image = %image_path.display(),
            "Starting firmware update"
        );

        let mut session = BootloaderSession::new(&**device, self.layout.exit_code);
        let result = self.run_stages(entry, &mut session, image_path);

        match &result {
            Ok(()) => {
                entry.set_stage(FwUpdateStage::Completed);
                entry.set_status(FwUpdateStatus::Success);
                info!(psu_id = %psu_id, target = %self.layout.target, "Firmware update completed");
            }
            Err(err) => {
                session.cleanup();
                entry.set_status(FwUpdateStatus::Failed);
                error!(
                    psu_id = %psu_id,
                    target = %self.layout.target,
                    stage = %entry.progress().stage,
                    error = %err,
                    "Firmware update failed"
                );
            }
        }
        result
    }

    fn run_stages(
        &self,
        entry: &PsuEntry,
        session: &mut BootloaderSession<'_>,
        image_path: &Path,
    ) -> FirmwareUpdateResult<()> {
        entry.set_stage(FwUpdateStage::ReadFile);
        let image = FirmwareImage::load(image_path)?;
        let plan = WritePlan::build(&image, &self.layout)?;

        entry.set_stage(FwUpdateStage::ExtractModelId);
        let model_id = image.model_id(&self.layout)?;

        entry.set_stage(FwUpdateStage::EnterFirmwareUpgradeMode);
        self.enter(session)?;

        entry.set_stage(FwUpdateStage::SendModelId);
        self.send_model_id(session, model_id)?;

        entry.set_stage(FwUpdateStage::WriteFirmwareImage);
        self.write_image(session, &plan)?;

        entry.set_stage(FwUpdateStage::VerifyFirmwareImage);
        self.verify_image(session, &plan)?;

        entry.set_stage(FwUpdateStage::ExitFirmwareUpgradeMode);
        session
            .exit()
            .map_err(|source| FirmwareUpdateError::Device {
                stage: FwUpdateStage::ExitFirmwareUpgradeMode,
                source,
            })
    }

    fn enter(&self, session: &mut BootloaderSession<'_>) -> FirmwareUpdateResult<()> {
        let pec = enter_mode_pec(session.psu.id(), self.layout.target);
        let mut payload = self.layout.password.to_vec();
        payload.push(pec);
        session
            .enter(&payload)
            .map_err(|source| FirmwareUpdateError::Device {
                stage: FwUpdateStage::EnterFirmwareUpgradeMode,
                source,
            })?;
        debug!(psu_id = %session.psu.id(), "Bootloader password accepted, waiting for settle");
        pause(self.timings.bootloader_settle);
        Ok(())
    }

    fn send_model_id(
        &self,
        session: &BootloaderSession<'_>,
        model_id: [u8; 8],
    ) -> FirmwareUpdateResult<()> {
        const STAGE: FwUpdateStage = FwUpdateStage::SendModelId;
        session
            .write_checksummed(PmBusCommand::SendModelId, &model_id)
            .map_err(|source| FirmwareUpdateError::Device {
                stage: STAGE,
                source,
            })?;
        pause(self.timings.flash_erase);
        expect_status(
            session,
            STAGE,
            PmBusCommand::SendModelId,
            None,
            FirmwareDeviceStatus::FlashEraseOk,
        )
    }

    fn write_image(
        &self,
        session: &BootloaderSession<'_>,
        plan: &WritePlan,
    ) -> FirmwareUpdateResult<()> {
        const STAGE: FwUpdateStage = FwUpdateStage::WriteFirmwareImage;
        let mut lines_written = 0usize;

        for step in plan.steps() {
            match step {
                PlanStep::Data {
                    line,
                    offset,
                    bytes,
                    ..
                } => {
                    for (address, half) in halves(*offset, bytes) {
                        let mut body = address.to_le_bytes().to_vec();
                        body.extend_from_slice(half);
                        self.write_and_check(session, PmBusCommand::WriteImageData, &body, *line)?;
                    }
                    lines_written += 1;
                    if lines_written.checked_rem(self.timings.block_lines) == Some(0) {
                        pause(self.timings.block_program);
                    }
                }
                PlanStep::PageAdvance { line, page, bytes } => {
                    self.write_and_check(session, PmBusCommand::WriteRomPageData, bytes, *line)?;
                    debug!(psu_id = %session.psu.id(), page = *page, line = *line, "Advanced ROM page");
                }
            }
        }
        debug!(
            psu_id = %session.psu.id(),
            lines = lines_written,
            stage = %STAGE,
            "Image written"
        );
        Ok(())
    }

    fn write_and_check(
        &self,
        session: &BootloaderSession<'_>,
        command: PmBusCommand,
        body: &[u8],
        line: usize,
    ) -> FirmwareUpdateResult<()> {
        const STAGE: FwUpdateStage = FwUpdateStage::WriteFirmwareImage;
        session
            .write_checksummed(command, body)
            .map_err(|source| FirmwareUpdateError::LineFailed {
                stage: STAGE,
                line,
                source,
            })?;
        pause(self.timings.inter_command);
        expect_status(
            session,
            STAGE,
            command,
            Some(line),
            FirmwareDeviceStatus::NoError,
        )
    }

    fn verify_image(
        &self,
        session: &BootloaderSession<'_>,
        plan: &WritePlan,
    ) -> FirmwareUpdateResult<()> {
        const STAGE: FwUpdateStage = FwUpdateStage::VerifyFirmwareImage;
        let line_error = |line: usize| {
            move |source| FirmwareUpdateError::LineFailed {
                stage: STAGE,
                line,
                source,
            }
        };

        session
            .write_checksummed(PmBusCommand::SelectRomPage, &[0])
            .map_err(|source| FirmwareUpdateError::Device {
                stage: STAGE,
                source,
            })?;
        pause(self.timings.inter_command);

        for step in plan.steps() {
            match step {
                PlanStep::Data {
                    line,
                    page,
                    offset,
                    bytes,
                } => {
                    for (address, expected) in halves(*offset, bytes) {
                        session
                            .write_checksummed(PmBusCommand::SetReadAddress, &address.to_le_bytes())
                            .map_err(line_error(*line))?;
                        pause(self.timings.read_address_settle);
                        let data = session
                            .psu
                            .raw_read(PmBusCommand::ReadImageData)
                            .map_err(line_error(*line))?;
                        let actual = hex::encode_upper(data.get(..8).unwrap_or(data.as_slice()));
                        let expected = hex::encode_upper(expected);
                        if actual != expected {
                            return Err(FirmwareUpdateError::VerifyMismatch {
                                line: *line,
                                page: *page,
                                address,
                                expected,
                                actual,
                            });
                        }
                    }
                }
                PlanStep::PageAdvance { line, page, .. } => {
                    // Read addresses restart at 0 on the new page.
                    session
                        .write_checksummed(PmBusCommand::SelectRomPage, &[*page])
                        .map_err(line_error(*line))?;
                    pause(self.timings.inter_command);
                }
            }
        }
        Ok(())
    }
}

/// Split a 16-byte record into its two 8-byte halves and their addresses.
fn halves(offset: u16, bytes: &[u8; 16]) -> [(u16, &[u8]); 2] {
    let (low, high) = bytes.split_at(8);
    [(offset, low), (offset.saturating_add(8), high)]
}

fn expect_status(
    session: &BootloaderSession<'_>,
    stage: FwUpdateStage,
    after: PmBusCommand,
    line: Option<usize>,
    expected: FirmwareDeviceStatus,
) -> FirmwareUpdateResult<()> {
    let data = session
        .psu
        .raw_read(PmBusCommand::FirmwareUpdateStatus)
        .map_err(|source| match line {
            Some(line) => FirmwareUpdateError::LineFailed {
                stage,
                line,
                source,
            },
            None => FirmwareUpdateError::Device { stage, source },
        })?;
    let actual = FirmwareDeviceStatus::from_u8(data.first().copied().unwrap_or(0xFF));
    if actual == expected {
        Ok(())
    } else {
        Err(FirmwareUpdateError::UnexpectedStatus {
            stage,
            after,
            line,
            expected,
            actual,
        })
    }
}

/// Tracks whether the PSU may be in its bootloader.
///
/// Dropping a session that is still inside the bootloader sends the exit
/// command, which covers the panic unwind path.
struct BootloaderSession<'a> {
    psu: &'a dyn PowerSupply,
    exit_code: u8,
    entered: bool,
}

impl<'a> BootloaderSession<'a> {
    fn new(psu: &'a dyn PowerSupply, exit_code: u8) -> Self {
        Self {
            psu,
            exit_code,
            entered: false,
        }
    }

    fn enter(&mut self, payload: &[u8]) -> PsuResult<()> {
        // A failed transaction may still have switched the PSU over.
        self.entered = true;
        self.psu
            .raw_write(PmBusCommand::EnterFirmwareUpgradeMode, payload)
    }

    fn write_checksummed(&self, command: PmBusCommand, body: &[u8]) -> PsuResult<()> {
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.extend_from_slice(body);
        let mut covered = Vec::with_capacity(body.len() + 1);
        covered.push(command.opcode());
        covered.extend_from_slice(body);
        payload.push(twos_complement_checksum(&covered));
        self.psu.raw_write(command, &payload)
    }

    fn exit(&mut self) -> PsuResult<()> {
        self.entered = false;
        self.write_checksummed(PmBusCommand::ExitFirmwareUpgradeMode, &[self.exit_code])
    }

    /// Leave the bootloader after a failure, logging rather than returning
    /// any error.
    fn cleanup(&mut self) {
        if !self.entered {
            return;
        }
        if let Err(err) = self.exit() {
            warn!(psu_id = %self.psu.id(), error = %err, "Failed to exit bootloader during cleanup");
        }
    }
}

impl Drop for BootloaderSession<'_> {
    fn drop(&mut self) {
        if self.entered {
            warn!(psu_id = %self.psu.id(), "Update aborted inside bootloader, forcing exit");
            self.cleanup();
        }
    }
}

impl std::fmt::Debug for BootloaderSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootloaderSession")
            .field("psu", &self.psu.id())
            .field("entered", &self.entered)
            .finish_non_exhaustive()
    }
}
