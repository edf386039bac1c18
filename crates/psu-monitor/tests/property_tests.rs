//! Property-based tests for the energy figures

use chrono::Utc;
use proptest::prelude::*;
use psu_device::{DischargeState, EnergyStorageSnapshot};
use psu_monitor::{BatteryAggregate, EnergyFigures, MonitorConfig};

fn arb_pack() -> impl Strategy<Value = EnergyStorageSnapshot> {
    (any::<bool>(), proptest::option::of(0u8..=100)).prop_map(|(present, charge_level)| EnergyStorageSnapshot {
        present,
        charge_level,
        power_output_w: 0,
        fault: false,
        state: DischargeState::Discharging,
        updated_at: Utc::now(),
    })
}

proptest! {
    #[test]
    fn prop_average_stays_within_present_range(packs in prop::collection::vec(arb_pack(), 0..8)) {
        let aggregate = BatteryAggregate::from_snapshots(&packs);
        let present = packs.iter().filter(|p| p.present).count();
        let charged: Vec<u8> = packs.iter().filter(|p| p.present).filter_map(|p| p.charge_level).collect();
        prop_assert_eq!(aggregate.present_count, present);
        prop_assert_eq!(aggregate.present, present > 0);
        match (charged.iter().min(), charged.iter().max()) {
            (Some(min), Some(max)) => {
                let average = aggregate.average_charge.unwrap_or(0);
                prop_assert!(average >= *min);
                prop_assert!(average <= *max);
            }
            _ => prop_assert_eq!(aggregate.average_charge, None),
        }
    }

    #[test]
    fn prop_shares_never_exceed_available(
        packs in prop::collection::vec(arb_pack(), 0..8),
        blades in 1u16..48,
        nvdimms in 0u16..16,
        capacity in 0u32..200_000,
    ) {
        let config = MonitorConfig {
            blade_population: blades,
            nvdimms_per_blade: nvdimms,
            battery_capacity_joules: capacity,
            ..MonitorConfig::default()
        };
        let figures = EnergyFigures::compute(&packs, &config);
        let present = u64::try_from(packs.iter().filter(|p| p.present).count()).unwrap_or(u64::MAX);
        let ceiling = u64::from(capacity) * present;
        prop_assert!(figures.available_joules <= ceiling);
        prop_assert!(figures.blade_joules * u64::from(blades) <= figures.available_joules);
        if nvdimms == 0 {
            prop_assert_eq!(figures.nvdimm_joules, 0);
        } else {
            prop_assert!(figures.nvdimm_joules * u64::from(nvdimms) <= figures.blade_joules);
        }
    }

    #[test]
    fn prop_more_charge_never_lowers_energy(
        packs in prop::collection::vec(arb_pack(), 1..8),
        boost in 1u8..50,
    ) {
        let config = MonitorConfig::default();
        let boosted: Vec<_> = packs
            .iter()
            .map(|p| EnergyStorageSnapshot {
                charge_level: p.charge_level.map(|c| c.saturating_add(boost).min(100)),
                ..*p
            })
            .collect();
        let before = EnergyFigures::compute(&packs, &config);
        let after = EnergyFigures::compute(&boosted, &config);
        prop_assert!(after.available_joules >= before.available_joules);
        prop_assert!(after.blade_units >= before.blade_units);
    }
}
