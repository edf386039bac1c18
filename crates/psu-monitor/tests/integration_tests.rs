//! Integration tests for classification, remediation and escalation

use psu_device::BusTransport;
use psu_monitor::prelude::*;
use psu_pmbus::{BatteryFaults, BatteryHealth, CompletionCode, PmBusCommand};
use psu_test_helpers::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const STATUS_WORD_TEMPERATURE: u16 = 1 << 2;

struct Chassis {
    bus: Arc<SimulatedBus>,
    fakes: RecordingChassis,
    monitor: PsuMonitor,
}

fn polling(psus: u8, batteries: u8) -> MonitorConfigBuilder {
    MonitorConfig::builder()
        .alert_monitoring(false)
        .poll_interval(Duration::from_millis(10))
        .population(psus, batteries)
        .blades(4, 2)
}

fn chassis(psus: Vec<SimPsu>, config: MonitorConfig) -> Chassis {
    let bus = SimulatedBus::with_psus(psus);
    let fakes = RecordingChassis::new(4);
    let transport: Arc<dyn BusTransport> = bus.clone();
    let services = fakes.services(AlertLine::new(transport));
    let monitor = must(PsuMonitor::new(config, bus.registry(), services));
    Chassis {
        bus,
        fakes,
        monitor,
    }
}

fn wait_idle(monitor: &PsuMonitor) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while monitor.critical_action_running() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    true
}

fn kinds(report: &PassReport) -> Vec<(u8, UnresolvedKind)> {
    report
        .unresolved
        .iter()
        .map(|u| (u.psu_id.get(), u.kind))
        .collect()
}

fn faults(report: &PassReport) -> Vec<(u8, FaultType)> {
    report
        .faults
        .iter()
        .map(|f| (f.psu_id.get(), f.fault))
        .collect()
}

#[test]
fn test_healthy_chassis_clears_indicator_once() -> TestResult {
    let c = chassis(vec![SimPsu::default(), SimPsu::default()], polling(2, 0).build()?);

    for _ in 0..3 {
        let report = c.monitor.run_pass(Duration::from_millis(10));
        assert!(report.investigated);
        assert!(report.faults.is_empty());
        assert!(report.unresolved.is_empty());
    }
    assert_eq!(c.fakes.indicator.writes(), vec![false]);
    assert_eq!(c.bus.psu(1).clear_faults, 0);

    let stats = c.monitor.stats();
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.sweeps, 3);
    assert!(!stats.failure_indicator);
    Ok(())
}

#[test]
fn test_psu_that_stays_off_is_escalated() -> TestResult {
    let c = chassis(vec![SimPsu::default(), SimPsu::off()], polling(2, 0).build()?);

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(2, FaultType::PsuFailure)]);
    assert_eq!(kinds(&report), vec![(2, UnresolvedKind::PsuPowerOff)]);
    assert_eq!(c.bus.psu(2).clear_faults, 1);
    assert!(c.fakes.indicator.asserted());

    // Idempotent while the fault persists.
    c.monitor.run_pass(Duration::ZERO);
    c.monitor.run_pass(Duration::ZERO);
    assert_eq!(c.fakes.indicator.writes(), vec![true]);
    assert!(c.monitor.stats().failure_indicator);

    c.bus.update(2, |psu| {
        psu.status_word = 0;
        psu.power_output_w = 400;
    });
    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.faults.is_empty());
    assert_eq!(c.fakes.indicator.writes(), vec![true, false]);
    Ok(())
}

#[test]
fn test_clear_faults_recovers_psu() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            status_after_clear: Some(0),
            power_output_w: 380,
            ..SimPsu::off()
        }],
        polling(1, 0).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(1, FaultType::PsuFailure)]);
    assert!(report.unresolved.is_empty());
    assert_eq!(c.fakes.indicator.writes(), vec![false]);
    Ok(())
}

#[test]
fn test_on_without_output_power() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            status_after_clear: Some(0),
            ..SimPsu::off()
        }],
        polling(1, 0).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(kinds(&report), vec![(1, UnresolvedKind::PsuNoOutputPower)]);
    Ok(())
}

#[test]
fn test_unreadable_status_counts_as_power_off() -> TestResult {
    let c = chassis(vec![SimPsu::default()], polling(1, 0).build()?);
    c.bus.update(1, |psu| {
        psu.fail(PmBusCommand::StatusWord, CompletionCode::Timeout);
    });

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(1, FaultType::PsuFailure)]);
    assert_eq!(kinds(&report), vec![(1, UnresolvedKind::PsuPowerOff)]);
    Ok(())
}

#[test]
fn test_latched_fault_cleared_or_escalated() -> TestResult {
    let c = chassis(
        vec![
            SimPsu {
                status_word: STATUS_WORD_TEMPERATURE,
                status_after_clear: Some(0),
                ..SimPsu::default()
            },
            SimPsu {
                status_word: STATUS_WORD_TEMPERATURE,
                ..SimPsu::default()
            },
        ],
        polling(2, 0).build()?,
    );
    c.bus.update(2, |psu| {
        psu.fail(PmBusCommand::ClearFaults, CompletionCode::Timeout);
    });

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(
        faults(&report),
        vec![(1, FaultType::PsuFaultPresent), (2, FaultType::PsuFaultPresent)]
    );
    assert_eq!(kinds(&report), vec![(2, UnresolvedKind::PsuClearFaultFailed)]);

    // The detailed registers are dumped before the clear.
    let log = c.bus.transactions_for(1);
    let vout = log
        .iter()
        .position(|t| t.command == PmBusCommand::StatusVout.opcode());
    let clear = log
        .iter()
        .position(|t| t.command == PmBusCommand::ClearFaults.opcode());
    assert!(vout.is_some() && vout < clear);
    Ok(())
}

#[test]
fn test_battery_faults_sticky_and_transient() -> TestResult {
    let faulted = |sticky| SimPsu {
        battery: Some(SimBattery {
            faults: BatteryFaults::BATTERY_FAULT,
            sticky_faults: sticky,
            ..SimBattery::default()
        }),
        ..SimPsu::default()
    };
    let c = chassis(vec![faulted(false), faulted(true)], polling(2, 2).build()?);

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(
        faults(&report),
        vec![(1, FaultType::BatteryFault), (2, FaultType::BatteryFault)]
    );
    assert_eq!(kinds(&report), vec![(2, UnresolvedKind::BatteryFault)]);
    assert!(c.fakes.indicator.asserted());

    let snapshot = c.monitor.registry().entry(2)?.energy_storage();
    assert!(snapshot.is_some_and(|s| s.fault && s.present));
    Ok(())
}

#[test]
fn test_battery_monitoring_disabled_skips_battery_reads() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(30, 500)),
            ..SimPsu::default()
        }],
        polling(1, 1).battery_monitoring(false).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.faults.is_empty());
    assert_eq!(c.bus.count(1, PmBusCommand::BatteryHealthStatus), 0);
    assert!(c.fakes.blades.broadcasts().is_empty());
    Ok(())
}

#[test]
fn test_floating_battery_is_not_on_battery() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery {
                health: BatteryHealth::PRESENT | BatteryHealth::DISCHARGING,
                power_output_w: 0,
                ..SimBattery::default()
            }),
            ..SimPsu::default()
        }],
        polling(1, 1).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.faults.is_empty());
    assert!(report.broadcast.is_none());
    let snapshot = c.monitor.registry().entry(1)?.energy_storage();
    assert_eq!(snapshot.map(|s| s.state), Some(DischargeState::Floating));
    Ok(())
}

#[test]
fn test_on_battery_broadcasts_energy() -> TestResult {
    let c = chassis(
        vec![
            SimPsu {
                battery: Some(SimBattery::discharging(50, 800)),
                ..SimPsu::default()
            },
            SimPsu {
                battery: Some(SimBattery::discharging(70, 800)),
                ..SimPsu::default()
            },
        ],
        polling(2, 2).battery_capacity_joules(48_000).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(
        faults(&report),
        vec![(1, FaultType::OnBattery), (2, FaultType::OnBattery)]
    );
    assert!(report.unresolved.is_empty());
    assert!(!report.critical_triggered);

    // 24000 J + 33600 J over 4 blades, then over 2 NVDIMMs, in 50 J units.
    let expected = EnergyBroadcast {
        present: true,
        state: DischargeState::Discharging,
        scaling_factor: ENERGY_SCALING_FACTOR,
        blade_energy: 288,
        nvdimm_energy: 144,
    };
    assert_eq!(report.broadcast, Some(expected));
    assert_eq!(c.fakes.blades.broadcasts(), vec![expected]);
    assert_eq!(c.monitor.stats().broadcasts, 1);
    assert!(c.fakes.platform.events().is_empty());
    Ok(())
}

#[test]
fn test_broadcast_survives_blade_nacks() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(90, 800)),
            ..SimPsu::default()
        }],
        polling(1, 1).build()?,
    );
    c.fakes
        .blades
        .nack
        .lock()
        .insert(3, CompletionCode::Timeout);

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.broadcast.is_some());
    assert_eq!(c.fakes.blades.broadcasts().len(), 1);
    Ok(())
}

#[test]
fn test_battery_processing_disabled() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(10, 800)),
            ..SimPsu::default()
        }],
        polling(1, 1).process_battery_status(false).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(1, FaultType::OnBattery)]);
    assert!(report.broadcast.is_none());
    assert!(!report.critical_triggered);
    Ok(())
}

#[test]
fn test_low_charge_triggers_critical_once_per_episode() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(20, 800)),
            ..SimPsu::default()
        }],
        polling(1, 1).charge_level_threshold(50).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.critical_triggered);
    assert!(c.fakes.platform.wait_completed(1, Duration::from_secs(2)));
    let events = c.fakes.platform.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events.first().map(|e| e.average_charge), Some(Some(20)));

    // Still discharging: same episode.
    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(!report.critical_triggered);
    assert!(report.broadcast.is_some());

    // Mains return, then a new discharge starts a new episode.
    assert!(wait_idle(&c.monitor));
    c.bus.update(1, |psu| psu.battery = Some(SimBattery::charging(20)));
    c.monitor.run_pass(Duration::ZERO);
    c.bus
        .update(1, |psu| psu.battery = Some(SimBattery::discharging(20, 800)));
    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.critical_triggered);
    assert!(c.fakes.platform.wait_completed(2, Duration::from_secs(2)));
    assert_eq!(c.monitor.stats().critical_actions, 2);
    Ok(())
}

#[test]
fn test_floating_pass_ends_discharge_episode() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(20, 800)),
            ..SimPsu::default()
        }],
        polling(1, 1).charge_level_threshold(50).build()?,
    );

    assert!(c.monitor.run_pass(Duration::ZERO).critical_triggered);
    assert!(c.fakes.platform.wait_completed(1, Duration::from_secs(2)));
    assert!(wait_idle(&c.monitor));

    // Mains back without a charging sample: the pack floats.
    c.bus
        .update(1, |psu| psu.battery = Some(SimBattery::discharging(20, 0)));
    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.faults.is_empty());

    c.bus
        .update(1, |psu| psu.battery = Some(SimBattery::discharging(20, 800)));
    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(1, FaultType::OnBattery)]);
    assert!(report.critical_triggered);
    assert!(c.fakes.platform.wait_completed(2, Duration::from_secs(2)));
    Ok(())
}

#[test]
fn test_unread_charge_level_does_not_trigger_critical() -> TestResult {
    let mut unreadable = SimPsu {
        battery: Some(SimBattery::discharging(90, 800)),
        ..SimPsu::default()
    };
    unreadable.fail(PmBusCommand::BatteryChargeLevel, CompletionCode::Timeout);
    let c = chassis(
        vec![
            SimPsu {
                battery: Some(SimBattery::discharging(90, 800)),
                ..SimPsu::default()
            },
            unreadable,
        ],
        polling(2, 2)
            .charge_level_threshold(50)
            .blades(1, 1)
            .build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(
        faults(&report),
        vec![(1, FaultType::OnBattery), (2, FaultType::BatteryFault)]
    );
    assert!(!report.critical_triggered);
    assert!(c.fakes.platform.events().is_empty());

    let charges: Vec<_> = c
        .monitor
        .registry()
        .iter()
        .map(|entry| entry.energy_storage().map(|s| (s.present, s.charge_level)))
        .collect();
    assert_eq!(charges, vec![Some((true, Some(90))), Some((true, None))]);

    // Only the readable pack contributes: 90% of 48 kJ over one blade.
    let broadcast = report.broadcast.ok_or("no broadcast")?;
    assert_eq!(broadcast.blade_energy, 43_200 / 50);
    Ok(())
}

#[test]
fn test_long_discharge_triggers_critical() -> TestResult {
    let c = chassis(
        vec![SimPsu {
            battery: Some(SimBattery::discharging(95, 800)),
            ..SimPsu::default()
        }],
        polling(1, 1)
            .discharge_time_threshold(Duration::from_millis(20))
            .build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(!report.critical_triggered);

    std::thread::sleep(Duration::from_millis(40));
    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.critical_triggered);
    assert!(c.fakes.platform.wait_completed(1, Duration::from_secs(2)));
    let event = c.fakes.platform.events().first().copied();
    assert!(event.is_some_and(|e| e
        .discharge_time
        .is_some_and(|t| t >= Duration::from_millis(20))));
    Ok(())
}

#[test]
fn test_missing_battery_counts_as_empty() -> TestResult {
    // Battery count covers a PSU whose pack reports absent.
    let c = chassis(
        vec![
            SimPsu {
                battery: Some(SimBattery::discharging(90, 800)),
                ..SimPsu::default()
            },
            SimPsu {
                battery: Some(SimBattery {
                    health: BatteryHealth::empty(),
                    ..SimBattery::default()
                }),
                ..SimPsu::default()
            },
        ],
        polling(2, 2).build()?,
    );

    let report = c.monitor.run_pass(Duration::ZERO);
    let broadcast = report.broadcast.ok_or("no broadcast")?;
    assert!(broadcast.present);
    // Only the present pack contributes: 43200 J over 4 blades.
    assert_eq!(broadcast.blade_energy, 216);
    assert!(!report.critical_triggered);
    Ok(())
}

#[test]
fn test_busy_psu_is_skipped() -> TestResult {
    let c = chassis(vec![SimPsu::off(), SimPsu::default()], polling(2, 0).build()?);
    let entry = c.monitor.registry().entry(1)?.clone();
    let guard = entry.try_claim().ok_or("entry already claimed")?;

    let report = c.monitor.run_pass(Duration::ZERO);
    assert!(report.faults.is_empty());
    assert!(c.bus.transactions_for(1).is_empty());
    assert_eq!(c.fakes.indicator.writes(), vec![false]);

    drop(guard);
    let report = c.monitor.run_pass(Duration::ZERO);
    assert_eq!(faults(&report), vec![(1, FaultType::PsuFailure)]);
    Ok(())
}

#[test]
fn test_alert_mode_sweeps_on_alert_or_full_interval() -> TestResult {
    let config = MonitorConfig::builder()
        .alert_monitoring(true)
        .poll_interval(Duration::from_secs(10))
        .alert_poll_interval(Duration::from_secs(1))
        .population(1, 0)
        .build()?;
    let c = chassis(vec![SimPsu::default()], config);

    // The first pass always sweeps.
    assert!(c.monitor.run_pass(Duration::ZERO).investigated);
    c.bus.clear_log();

    let report = c.monitor.run_pass(Duration::from_secs(1));
    assert!(!report.investigated);
    assert!(c.bus.transactions_for(1).is_empty());

    c.bus.set_alert(true);
    assert!(c.monitor.run_pass(Duration::from_secs(1)).investigated);
    c.bus.set_alert(false);

    assert!(!c.monitor.run_pass(Duration::from_secs(5)).investigated);
    assert!(c.monitor.run_pass(Duration::from_secs(5)).investigated);

    c.bus.fail_alert(CompletionCode::Timeout);
    assert!(c.monitor.run_pass(Duration::from_secs(1)).investigated);

    let stats = c.monitor.stats();
    assert_eq!(stats.passes, 6);
    assert_eq!(stats.sweeps, 4);
    Ok(())
}

#[test]
fn test_dpc_deasserted_only_where_asserted() -> TestResult {
    let c = chassis(
        vec![SimPsu::off()],
        polling(1, 0).dpc_auto_deassert(true).build()?,
    );
    c.fakes.blades.assert_dpc(2);
    c.fakes.blades.assert_dpc(4);

    // An unresolved fault keeps the overrides.
    c.monitor.run_pass(Duration::ZERO);
    assert!(c.fakes.blades.config_writes().is_empty());

    c.bus.update(1, |psu| {
        psu.status_word = 0;
        psu.power_output_w = 300;
    });
    c.monitor.run_pass(Duration::ZERO);
    let cleared = BladeAlertConfig {
        dpc_asserted: false,
        ..BladeAlertConfig::default()
    };
    assert_eq!(c.fakes.blades.config_writes(), vec![(2, cleared), (4, cleared)]);

    c.monitor.run_pass(Duration::ZERO);
    assert_eq!(c.fakes.blades.config_writes().len(), 2);
    Ok(())
}

#[test]
fn test_registry_must_match_psu_count() -> TestResult {
    let bus = SimulatedBus::with_psus([SimPsu::default()]);
    let fakes = RecordingChassis::new(1);
    let transport: Arc<dyn BusTransport> = bus.clone();
    let result = PsuMonitor::new(
        polling(2, 0).build()?,
        bus.registry(),
        fakes.services(AlertLine::new(transport)),
    );
    assert!(matches!(
        result,
        Err(MonitorError::RegistryMismatch {
            configured: 2,
            registered: 1
        })
    ));
    Ok(())
}
