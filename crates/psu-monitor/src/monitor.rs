//! The fault monitor loop.
//!
//! One pass picks a strategy, investigates every idle PSU, remediates what it
//! found and escalates what remains. Passes are paced by sleeping the rest of
//! the configured interval, so a slow pass shortens the following sleep.

use crate::config::MonitorConfig;
use crate::discharge::{DischargeTimer, longest_discharge};
use crate::energy::{BatteryAggregate, EnergyBroadcast, EnergyFigures};
use crate::error::{MonitorError, MonitorResult};
use crate::faults::{FaultType, PsuFault, UnresolvedFault, UnresolvedKind};
use crate::platform::{
    BladeAlertConfig, BladeManager, ChassisIndicator, CriticalBatteryEvent, PlatformActions,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use psu_device::{
    AlertLine, DischargeState, EnergyStorageSnapshot, PowerSupply, PsuEntry, PsuRegistry,
};
use serde::Serialize;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// External collaborators of the monitor.
pub struct MonitorServices {
    /// Shared PSU alert line.
    pub alert_line: AlertLine,
    /// Blade management.
    pub blades: Arc<dyn BladeManager>,
    /// Chassis PSU failure indicator.
    pub indicator: Arc<dyn ChassisIndicator>,
    /// Platform-wide actions.
    pub platform: Arc<dyn PlatformActions>,
}

impl fmt::Debug for MonitorServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorServices")
            .field("alert_line", &self.alert_line)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// The pass swept the PSUs. False when alert mode deferred the sweep.
    pub investigated: bool,
    /// Classified PSUs.
    pub faults: Vec<PsuFault>,
    /// PSUs remediation could not fix.
    pub unresolved: Vec<UnresolvedFault>,
    /// Energy broadcast sent this pass.
    pub broadcast: Option<EnergyBroadcast>,
    /// A critical battery action was started this pass.
    pub critical_triggered: bool,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Passes run.
    pub passes: u64,
    /// Passes that swept the PSUs.
    pub sweeps: u64,
    /// Classifications from the last sweep.
    pub last_faults: Vec<PsuFault>,
    /// Unresolved set from the last sweep.
    pub unresolved: Vec<UnresolvedFault>,
    /// Chassis failure indicator as last driven.
    pub failure_indicator: bool,
    /// Energy broadcasts sent.
    pub broadcasts: u64,
    /// Critical battery actions started.
    pub critical_actions: u64,
    /// Wall time of the last pass.
    pub last_pass_duration: Duration,
}

#[derive(Debug)]
struct LoopState {
    since_sweep: Duration,
    discharge: Vec<DischargeTimer>,
    critical_fired: bool,
    indicator: Option<bool>,
}

/// PSU fault monitor.
#[derive(Debug)]
pub struct PsuMonitor {
    config: MonitorConfig,
    registry: PsuRegistry,
    services: MonitorServices,
    state: Mutex<LoopState>,
    stats: RwLock<MonitorStats>,
    critical_in_flight: Arc<AtomicBool>,
}

impl PsuMonitor {
    /// Create a monitor over `registry`.
    ///
    /// The first pass always sweeps, whatever the strategy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, or [`MonitorError::RegistryMismatch`]
    /// when the registry size differs from `psu_count`.
    pub fn new(
        config: MonitorConfig,
        registry: PsuRegistry,
        services: MonitorServices,
    ) -> MonitorResult<Self> {
        config.validate()?;
        if registry.len() != usize::from(config.psu_count) {
            return Err(MonitorError::RegistryMismatch {
                configured: config.psu_count,
                registered: registry.len(),
            });
        }
        let state = LoopState {
            since_sweep: config.poll_interval,
            discharge: vec![DischargeTimer::new(); registry.len()],
            critical_fired: false,
            indicator: None,
        };
        Ok(Self {
            config,
            registry,
            services,
            state: Mutex::new(state),
            stats: RwLock::new(MonitorStats::default()),
            critical_in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Monitored registry.
    #[must_use]
    pub fn registry(&self) -> &PsuRegistry {
        &self.registry
    }

    /// Snapshot of the pass counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.stats.read().clone()
    }

    /// True while a critical battery action is running.
    #[must_use]
    pub fn critical_action_running(&self) -> bool {
        self.critical_in_flight.load(Ordering::Acquire)
    }

    /// Run one pass. `elapsed` is the time since the previous pass started.
    pub fn run_pass(&self, elapsed: Duration) -> PassReport {
        let started = Instant::now();
        let mut report = PassReport::default();
        {
            let mut state = self.state.lock();
            if self.should_sweep(&mut state, elapsed) {
                report.investigated = true;
                report.faults = self.investigate(&mut state);
                self.remediate(&mut state, &mut report);
                self.escalate(&mut state, &report.unresolved);
            }
        }
        self.record(&report, started.elapsed());
        report
    }

    fn should_sweep(&self, state: &mut LoopState, elapsed: Duration) -> bool {
        if !self.config.alert_monitoring_enabled {
            return true;
        }
        match self.services.alert_line.is_asserted() {
            Ok(true) => {
                debug!("PSU alert asserted");
                state.since_sweep = Duration::ZERO;
                true
            }
            Ok(false) => {
                state.since_sweep = state.since_sweep.saturating_add(elapsed);
                if state.since_sweep >= self.config.poll_interval {
                    state.since_sweep = Duration::ZERO;
                    true
                } else {
                    false
                }
            }
            Err(err) => {
                warn!(error = %err, "Alert line read failed, polling this pass");
                true
            }
        }
    }

    fn investigate(&self, state: &mut LoopState) -> Vec<PsuFault> {
        let now = Instant::now();
        let mut faults = Vec::new();
        let mut discharging = false;
        for entry in self.registry.iter() {
            if entry.is_busy() {
                debug!(psu_id = %entry.id(), "Firmware update in progress, skipping");
                continue;
            }
            let psu = entry.lock();
            let timer = state.discharge.get_mut(entry.id().index());
            if let Some(fault) = self.classify(entry, &**psu, timer, now, &mut discharging) {
                debug!(psu_id = %entry.id(), %fault, "PSU classified");
                faults.push(PsuFault {
                    psu_id: entry.id(),
                    fault,
                });
            }
        }
        // A sweep with no battery delivering power ends the discharge
        // episode, even while a timer keeps running through `Floating`.
        if !discharging {
            state.critical_fired = false;
        }
        faults
    }

    fn classify(
        &self,
        entry: &PsuEntry,
        psu: &dyn PowerSupply,
        timer: Option<&mut DischargeTimer>,
        now: Instant,
        discharging: &mut bool,
    ) -> Option<FaultType> {
        let status = match psu.status() {
            Ok(status) => status,
            Err(err) => {
                warn!(psu_id = %entry.id(), error = %err, "PSU status read failed");
                return Some(FaultType::PsuFailure);
            }
        };
        entry.record_status(status);
        if !status.is_on() {
            return Some(FaultType::PsuFailure);
        }

        let mut fault = None;
        if psu.variant().has_battery() && self.config.battery_monitoring_enabled {
            let (battery_fault, state) = classify_battery(entry, psu, timer, now);
            *discharging |= state == DischargeState::Discharging;
            fault = battery_fault;
        }
        if fault.is_none() && status.fault_present {
            fault = Some(FaultType::PsuFaultPresent);
        }
        fault
    }

    fn remediate(&self, state: &mut LoopState, report: &mut PassReport) {
        let mut on_battery = false;
        for record in &report.faults {
            let Some(entry) = self.registry.get(record.psu_id) else {
                continue;
            };
            if entry.is_busy() {
                continue;
            }
            let psu = entry.lock();
            if let Some(kind) = self.remediate_one(&**psu, record.fault, &mut on_battery) {
                warn!(psu_id = %record.psu_id, fault = %record.fault, unresolved = %kind, "PSU fault not resolved");
                report.unresolved.push(UnresolvedFault {
                    psu_id: record.psu_id,
                    kind,
                });
            }
        }
        if on_battery {
            self.process_on_battery(state, report);
        }
    }

    fn remediate_one(
        &self,
        psu: &dyn PowerSupply,
        fault: FaultType,
        on_battery: &mut bool,
    ) -> Option<UnresolvedKind> {
        let psu_id = psu.id();
        let registers = psu.fault_status_registers();
        warn!(%psu_id, %fault, %registers, "Remediating PSU fault");

        if let Err(err) = psu.clear_faults() {
            warn!(%psu_id, error = %err, "Clear faults failed");
            return Some(UnresolvedKind::PsuClearFaultFailed);
        }

        match fault {
            FaultType::PsuFailure => match psu.status() {
                Ok(status) if status.is_on() => match psu.power_output() {
                    Ok(watts) if watts != 0 => {
                        info!(%psu_id, watts, "PSU recovered");
                        None
                    }
                    Ok(_) => Some(UnresolvedKind::PsuNoOutputPower),
                    Err(err) => {
                        warn!(%psu_id, error = %err, "Output power read failed");
                        Some(UnresolvedKind::PsuNoOutputPower)
                    }
                },
                Ok(_) => Some(UnresolvedKind::PsuPowerOff),
                Err(err) => {
                    warn!(%psu_id, error = %err, "Status re-read failed");
                    Some(UnresolvedKind::PsuPowerOff)
                }
            },
            FaultType::BatteryFault => {
                if !(psu.variant().has_battery() && self.config.battery_monitoring_enabled) {
                    return None;
                }
                if let Err(err) = psu.clear_battery_faults() {
                    warn!(%psu_id, error = %err, "Battery fault clear failed");
                }
                match psu.battery_faults() {
                    Ok(faults) if !faults.any() => None,
                    Ok(faults) => {
                        warn!(%psu_id, ?faults, "Battery fault still asserted");
                        Some(UnresolvedKind::BatteryFault)
                    }
                    Err(err) => {
                        warn!(%psu_id, error = %err, "Battery fault re-read failed");
                        Some(UnresolvedKind::BatteryFault)
                    }
                }
            }
            FaultType::OnBattery => {
                if self.config.process_battery_status {
                    *on_battery = true;
                }
                None
            }
            FaultType::PsuFaultPresent => None,
        }
    }

    fn process_on_battery(&self, state: &mut LoopState, report: &mut PassReport) {
        let now = Instant::now();
        let snapshots: Vec<EnergyStorageSnapshot> = self
            .registry
            .iter()
            .filter_map(|entry| entry.energy_storage())
            .take(usize::from(self.config.battery_count))
            .collect();
        let aggregate = BatteryAggregate::from_snapshots(&snapshots);
        let discharge_time = longest_discharge(&state.discharge, now);

        let too_long = discharge_time
            .is_some_and(|elapsed| elapsed > self.config.battery_discharge_time_threshold);
        let too_low = aggregate.charge_below(self.config.battery_charge_level_threshold);
        if too_long || too_low {
            report.critical_triggered = self.trigger_critical_battery(
                state,
                CriticalBatteryEvent {
                    discharge_time,
                    average_charge: aggregate.average_charge,
                },
            );
        }

        let figures = EnergyFigures::compute(&snapshots, &self.config);
        let broadcast = EnergyBroadcast::on_battery(&aggregate, &figures);
        info!(
            present = broadcast.present,
            average_charge = ?aggregate.average_charge,
            blade_energy = broadcast.blade_energy,
            nvdimm_energy = broadcast.nvdimm_energy,
            "Broadcasting energy storage state"
        );
        let acks = self.services.blades.broadcast_energy_storage(&broadcast);
        for (blade_id, code) in acks.iter().filter(|(_, code)| !code.is_success()) {
            warn!(blade_id, %code, "Blade did not acknowledge energy storage broadcast");
        }
        report.broadcast = Some(broadcast);
    }

    fn trigger_critical_battery(&self, state: &mut LoopState, event: CriticalBatteryEvent) -> bool {
        if state.critical_fired {
            debug!("Critical battery action already ran this discharge episode");
            return false;
        }
        if self
            .critical_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Critical battery action still running");
            return false;
        }

        warn!(
            discharge_time = ?event.discharge_time,
            average_charge = ?event.average_charge,
            "Triggering critical battery action"
        );
        let platform = Arc::clone(&self.services.platform);
        let in_flight = InFlight(Arc::clone(&self.critical_in_flight));
        let spawned = thread::Builder::new()
            .name("psu-critical-battery".into())
            .spawn(move || {
                let _in_flight = in_flight;
                platform.critical_battery(&event);
            });
        match spawned {
            Ok(_detached) => {
                state.critical_fired = true;
                true
            }
            Err(err) => {
                self.critical_in_flight.store(false, Ordering::Release);
                error!(error = %err, "Failed to start critical battery action");
                false
            }
        }
    }

    fn escalate(&self, state: &mut LoopState, unresolved: &[UnresolvedFault]) {
        let failed = !unresolved.is_empty();
        if state.indicator != Some(failed) {
            if failed {
                warn!(count = unresolved.len(), "Asserting chassis PSU failure indicator");
            } else {
                info!("Clearing chassis PSU failure indicator");
            }
            self.services.indicator.set_psu_failure(failed);
            state.indicator = Some(failed);
        }
        if !failed && self.config.dpc_auto_deassert {
            self.deassert_dpc();
        }
    }

    fn deassert_dpc(&self) {
        let blades = &self.services.blades;
        for blade_id in blades.powered_blades() {
            match blades.alert_config(blade_id) {
                Ok(config) if config.dpc_asserted => {
                    let code = blades.set_alert_config(
                        blade_id,
                        BladeAlertConfig {
                            dpc_asserted: false,
                            ..config
                        },
                    );
                    if code.is_success() {
                        info!(blade_id, "Deasserted blade DPC override");
                    } else {
                        warn!(blade_id, %code, "Blade DPC deassertion failed");
                    }
                }
                Ok(_) => {}
                Err(code) => warn!(blade_id, %code, "Blade alert configuration read failed"),
            }
        }
    }

    fn record(&self, report: &PassReport, duration: Duration) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.last_pass_duration = duration;
        if report.investigated {
            stats.sweeps += 1;
            stats.last_faults.clone_from(&report.faults);
            stats.unresolved.clone_from(&report.unresolved);
            stats.failure_indicator = !report.unresolved.is_empty();
        }
        if report.broadcast.is_some() {
            stats.broadcasts += 1;
        }
        if report.critical_triggered {
            stats.critical_actions += 1;
        }
    }

    /// Start the loop on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Spawn`] if the thread cannot be started.
    pub fn spawn(self: Arc<Self>) -> MonitorResult<MonitorHandle> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let monitor = Arc::clone(&self);
        let thread = thread::Builder::new()
            .name("psu-monitor".into())
            .spawn(move || {
                match catch_unwind(AssertUnwindSafe(|| monitor.run_loop(&shutdown_rx))) {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        error!("PSU monitor loop panicked, host must restart it");
                        Err(MonitorError::LoopPanicked)
                    }
                }
            })
            .map_err(MonitorError::Spawn)?;
        Ok(MonitorHandle {
            monitor: self,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn run_loop(&self, shutdown: &Receiver<()>) {
        let interval = self.config.pass_interval();
        info!(
            alert_mode = self.config.alert_monitoring_enabled,
            interval = ?interval,
            psus = self.registry.len(),
            "PSU monitor started"
        );
        let mut previous: Option<Instant> = None;
        loop {
            let started = Instant::now();
            let elapsed = previous.map_or(Duration::ZERO, |at| started.duration_since(at));
            let report = self.run_pass(elapsed);
            if !report.faults.is_empty() {
                debug!(faults = report.faults.len(), unresolved = report.unresolved.len(), "Pass finished");
            }
            previous = Some(started);

            let wait = interval.saturating_sub(started.elapsed());
            match shutdown.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("PSU monitor stopped");
    }
}

fn classify_battery(
    entry: &PsuEntry,
    psu: &dyn PowerSupply,
    timer: Option<&mut DischargeTimer>,
    now: Instant,
) -> (Option<FaultType>, DischargeState) {
    let report = psu.battery_status();
    let health = psu.battery_health();

    let (fault, state) = match (&health, report.is_success()) {
        (Ok(health), true) => {
            let power = report.status.power_output_w.unwrap_or(0);
            let state = DischargeState::classify(*health, power);
            if let Some(timer) = timer {
                timer.observe(state, now);
            }
            let fault = if report.status.fault_asserted() {
                Some(FaultType::BatteryFault)
            } else if state == DischargeState::Discharging {
                Some(FaultType::OnBattery)
            } else {
                None
            };
            (fault, state)
        }
        (Err(err), _) => {
            warn!(psu_id = %entry.id(), error = %err, "Battery health read failed");
            (Some(FaultType::BatteryFault), DischargeState::Unknown)
        }
        (Ok(_), false) => {
            warn!(psu_id = %entry.id(), code = %report.code, "Battery status read failed");
            (Some(FaultType::BatteryFault), DischargeState::Unknown)
        }
    };

    entry.set_energy_storage(EnergyStorageSnapshot::from_readings(
        &report,
        health.ok(),
        state,
    ));
    (fault, state)
}

struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running monitor loop.
///
/// Dropping the handle stops the loop after its current pass.
#[derive(Debug)]
pub struct MonitorHandle {
    monitor: Arc<PsuMonitor>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<MonitorResult<()>>>,
}

impl MonitorHandle {
    /// The running monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<PsuMonitor> {
        &self.monitor
    }

    /// Snapshot of the pass counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.monitor.stats()
    }

    /// True once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::LoopPanicked`] if the loop died.
    pub fn shutdown(mut self) -> MonitorResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> MonitorResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            if shutdown.send(()).is_err() {
                debug!("Monitor loop already exited");
            }
        }
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(Err(MonitorError::LoopPanicked)),
            None => Ok(()),
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "PSU monitor stopped with an error");
        }
    }
}
