//! Integration tests for the firmware update lifecycle against a simulated bootloader

use psu_device::{FwProgress, PsuError, PsuId, PsuRegistry};
use psu_firmware_update::enter_mode_pec;
use psu_firmware_update::prelude::*;
use psu_pmbus::{CompletionCode, FirmwareDeviceStatus, PmBusCommand};
use psu_test_helpers::prelude::*;
use std::sync::Arc;

struct Rig {
    bus: Arc<SimulatedBus>,
    registry: PsuRegistry,
    manager: FirmwareUpdateManager,
    layout: TargetLayout,
}

fn rig(target: Target) -> Rig {
    let bus = SimulatedBus::with_psus([SimPsu::default(), SimPsu::default()]);
    let registry = bus.registry();
    let layout = small_layout(target);
    let manager = FirmwareUpdateManager::new(registry.clone())
        .with_timings(UpdateTimings::immediate())
        .with_layout(layout);
    Rig {
        bus,
        registry,
        manager,
        layout,
    }
}

fn progress(rig: &Rig, psu_id: u8) -> Result<FwProgress, PsuError> {
    Ok(rig.registry.entry(psu_id)?.progress())
}

#[test]
fn test_primary_update_completes() -> TestResult {
    let rig = rig(Target::Primary);
    let builder = ImageBuilder::new(rig.layout);
    let image = builder.write_temp();
    let entry = rig.registry.entry(1)?;
    assert!(!entry.is_busy());

    let handle = rig.manager.start_update(1, image.path(), Target::Primary)?;
    assert_eq!(handle.psu_id(), 1);
    handle.join()?;

    assert!(!entry.is_busy());
    assert_eq!(
        entry.progress(),
        FwProgress {
            status: FwUpdateStatus::Success,
            stage: FwUpdateStage::Completed,
        }
    );

    let psu = rig.bus.psu(1);
    assert_eq!(psu.bootloader.entries, 1);
    assert_eq!(psu.bootloader.exit_codes, vec![rig.layout.exit_code]);
    assert!(!psu.bootloader.in_bootloader());
    assert_eq!(psu.bootloader.page_writes, vec![[0xA0; 8]]);
    assert_eq!(psu.bootloader.data_writes, builder.expected_data_lines() * 2);

    let first = payload_for(0, rig.layout.write_start);
    assert_eq!(
        psu.bootloader.flash.get(&(0, rig.layout.write_start)).map(|d| d.to_vec()),
        first.get(..8).map(<[u8]>::to_vec)
    );
    let last = payload_for(1, rig.layout.write_end);
    assert_eq!(
        psu.bootloader
            .flash
            .get(&(1, rig.layout.write_end + 8))
            .map(|d| d.to_vec()),
        last.get(8..).map(<[u8]>::to_vec)
    );
    // Nothing below the write start of page 0 is programmed.
    assert!(psu.bootloader.flash.keys().all(|&(page, address)| page > 0
        || address >= rig.layout.write_start));

    assert!(rig.bus.transactions_for(2).is_empty());
    Ok(())
}

#[test]
fn test_enter_carries_password_and_pec() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    rig.manager
        .start_update(2, image.path(), Target::Primary)?
        .join()?;

    let id = must_some(PsuId::new(2), "valid slot id");
    let mut expected = rig.layout.password.to_vec();
    expected.push(enter_mode_pec(id, Target::Primary));
    assert_eq!(
        rig.bus.writes_of(2, PmBusCommand::EnterFirmwareUpgradeMode),
        vec![expected]
    );
    Ok(())
}

#[test]
fn test_secondary_update_stays_on_page_zero() -> TestResult {
    let rig = rig(Target::Secondary);
    let builder = ImageBuilder::new(rig.layout);
    let image = builder.write_temp();
    rig.manager
        .start_update(1, image.path(), Target::Secondary)?
        .join()?;

    let psu = rig.bus.psu(1);
    assert!(psu.bootloader.page_writes.is_empty());
    assert_eq!(psu.bootloader.exit_codes, vec![0x02]);
    assert!(psu.bootloader.flash.keys().all(|&(page, _)| page == 0));
    assert_eq!(psu.bootloader.data_writes, builder.expected_data_lines() * 2);
    assert_eq!(progress(&rig, 1)?.status, FwUpdateStatus::Success);
    Ok(())
}

#[test]
fn test_write_failure_aborts_and_exits() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    rig.bus.update(1, |psu| {
        psu.bootloader.fail_write = Some((5, FirmwareDeviceStatus::FlashWriteError));
    });

    let result = rig
        .manager
        .start_update(1, image.path(), Target::Primary)?
        .join();
    match result {
        Err(FirmwareUpdateError::UnexpectedStatus {
            stage,
            after,
            actual,
            ..
        }) => {
            assert_eq!(stage, FwUpdateStage::WriteFirmwareImage);
            assert_eq!(after, PmBusCommand::WriteImageData);
            assert_eq!(actual, FirmwareDeviceStatus::FlashWriteError);
        }
        other => return Err(format!("unexpected outcome: {other:?}").into()),
    }

    assert_eq!(
        progress(&rig, 1)?,
        FwProgress {
            status: FwUpdateStatus::Failed,
            stage: FwUpdateStage::WriteFirmwareImage,
        }
    );
    let psu = rig.bus.psu(1);
    assert_eq!(psu.bootloader.data_writes, 5);
    assert_eq!(psu.bootloader.exit_codes, vec![rig.layout.exit_code]);
    assert!(!psu.bootloader.in_bootloader());
    assert!(!rig.registry.entry(1)?.is_busy());
    Ok(())
}

#[test]
fn test_verify_mismatch_fails_verify_stage() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    rig.bus.update(1, |psu| psu.bootloader.corrupt_read = Some((1, 0x0010)));

    let result = rig
        .manager
        .start_update(1, image.path(), Target::Primary)?
        .join();
    match result {
        Err(FirmwareUpdateError::VerifyMismatch { page, address, .. }) => {
            assert_eq!(page, 1);
            assert_eq!(address, 0x0010);
        }
        other => return Err(format!("unexpected outcome: {other:?}").into()),
    }
    assert_eq!(
        progress(&rig, 1)?,
        FwProgress {
            status: FwUpdateStatus::Failed,
            stage: FwUpdateStage::VerifyFirmwareImage,
        }
    );
    assert_eq!(rig.bus.psu(1).bootloader.exit_codes.len(), 1);
    Ok(())
}

#[test]
fn test_model_id_mismatch_fails_before_writing() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).model_id(*b"OTHER-01").write_temp();

    let err = rig
        .manager
        .start_update(1, image.path(), Target::Primary)?
        .join()
        .err();
    assert!(matches!(
        err,
        Some(FirmwareUpdateError::UnexpectedStatus {
            stage: FwUpdateStage::SendModelId,
            actual: FirmwareDeviceStatus::ModelIdMismatch,
            ..
        })
    ));
    let psu = rig.bus.psu(1);
    assert_eq!(psu.bootloader.data_writes, 0);
    assert_eq!(psu.bootloader.exit_codes, vec![rig.layout.exit_code]);
    assert_eq!(progress(&rig, 1)?.stage, FwUpdateStage::SendModelId);
    Ok(())
}

#[test]
fn test_rejected_enter_still_attempts_exit() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    rig.bus
        .update(1, |psu| psu.bootloader.reject_enter = Some(CompletionCode::Timeout));

    let err = rig
        .manager
        .start_update(1, image.path(), Target::Primary)?
        .join()
        .err();
    assert!(matches!(
        err,
        Some(FirmwareUpdateError::Device {
            stage: FwUpdateStage::EnterFirmwareUpgradeMode,
            ..
        })
    ));
    assert_eq!(
        rig.bus
            .writes_of(1, PmBusCommand::ExitFirmwareUpgradeMode)
            .len(),
        1
    );
    assert_eq!(progress(&rig, 1)?.status, FwUpdateStatus::Failed);
    Ok(())
}

#[test]
fn test_bad_images_fail_without_touching_the_bus() -> TestResult {
    let layout = small_layout(Target::Primary);
    let cases = [
        (ImageBuilder::new(layout).corrupt_line(3), FwUpdateStage::ReadFile),
        (ImageBuilder::new(layout).truncated(), FwUpdateStage::ReadFile),
        (
            ImageBuilder::new(layout).without_model_id(),
            FwUpdateStage::ExtractModelId,
        ),
    ];

    for (builder, stage) in cases {
        let rig = rig(Target::Primary);
        let image = builder.write_temp();
        let err = rig
            .manager
            .start_update(1, image.path(), Target::Primary)?
            .join()
            .err();
        assert!(err.as_ref().is_some_and(FirmwareUpdateError::is_image_error), "{err:?}");
        assert_eq!(
            progress(&rig, 1)?,
            FwProgress {
                status: FwUpdateStatus::Failed,
                stage,
            }
        );
        assert!(rig.bus.transactions_for(1).is_empty());
    }
    Ok(())
}

#[test]
fn test_missing_image_file() -> TestResult {
    let rig = rig(Target::Primary);
    let dir = tempfile::tempdir()?;
    let err = rig
        .manager
        .start_update(1, dir.path().join("absent.hex"), Target::Primary)?
        .join()
        .err();
    assert!(matches!(err, Some(FirmwareUpdateError::Io { .. })));
    assert_eq!(progress(&rig, 1)?.stage, FwUpdateStage::ReadFile);
    assert!(rig.bus.transactions().is_empty());
    Ok(())
}

#[test]
fn test_unknown_psu_rejected() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    for psu_id in [0, 3, 200] {
        let err = rig
            .manager
            .start_update(psu_id, image.path(), Target::Primary)
            .err();
        assert!(matches!(err, Some(FirmwareUpdateError::UnknownPsu(id)) if id == psu_id));
    }
    assert!(rig.bus.transactions().is_empty());
    Ok(())
}

#[test]
fn test_second_update_rejected_while_busy() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    let entry = rig.registry.entry(1)?;
    let guard = must_some(entry.try_claim(), "entry should be idle");

    let err = rig
        .manager
        .start_update(1, image.path(), Target::Primary)
        .err();
    assert!(matches!(err, Some(FirmwareUpdateError::UpdateInProgress(1))));
    assert_eq!(entry.progress().status, FwUpdateStatus::NotStarted);

    drop(guard);
    rig.manager
        .start_update(1, image.path(), Target::Primary)?
        .join()?;
    assert_eq!(entry.progress().status, FwUpdateStatus::Success);
    Ok(())
}

#[test]
fn test_parallel_updates_on_different_psus() -> TestResult {
    let rig = rig(Target::Primary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    let first = rig.manager.start_update(1, image.path(), Target::Primary)?;
    let second = rig.manager.start_update(2, image.path(), Target::Primary)?;
    first.join()?;
    second.join()?;

    for slot in [1, 2] {
        assert_eq!(progress(&rig, slot)?.stage, FwUpdateStage::Completed);
        assert_eq!(rig.bus.psu(slot).bootloader.entries, 1);
    }
    Ok(())
}

#[test]
fn test_engine_runs_synchronously() -> TestResult {
    let rig = rig(Target::Secondary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    let engine = FirmwareUpdateEngine::new(rig.layout, UpdateTimings::immediate());
    let entry = rig.registry.entry(2)?;

    let guard = must_some(entry.try_claim(), "entry should be idle");
    engine.run(&guard, image.path())?;
    assert_eq!(entry.progress().stage, FwUpdateStage::Completed);
    assert!(entry.is_busy());

    // A second run reprograms from scratch.
    engine.run(&guard, image.path())?;
    assert_eq!(rig.bus.psu(2).bootloader.entries, 2);

    // Other updates are refused until the claim is released.
    assert!(matches!(
        rig.manager.start_update(2, image.path(), Target::Secondary),
        Err(FirmwareUpdateError::UpdateInProgress(2))
    ));
    drop(guard);
    assert!(!entry.is_busy());
    Ok(())
}

#[test]
fn test_progress_is_published_under_the_psu_lock() -> TestResult {
    let rig = rig(Target::Secondary);
    let image = ImageBuilder::new(rig.layout).write_temp();
    let entry = rig.registry.entry(1)?;

    let device = entry.lock();
    let handle = rig.manager.start_update(1, image.path(), Target::Secondary)?;
    assert!(entry.is_busy());
    std::thread::sleep(std::time::Duration::from_millis(20));
    // The worker waits for the lock before touching progress.
    assert_eq!(entry.progress().status, FwUpdateStatus::NotStarted);
    drop(device);

    handle.join()?;
    assert_eq!(entry.progress().status, FwUpdateStatus::Success);
    assert!(!entry.is_busy());
    Ok(())
}
