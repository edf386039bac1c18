//! Property-based tests for image parsing and write planning

use proptest::prelude::*;
use psu_firmware_update::prelude::*;
use psu_firmware_update::{PlanStep, RecordPayload};
use psu_test_helpers::prelude::*;

const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";

fn arb_layout() -> impl Strategy<Value = TargetLayout> {
    (0u16..8, 0u16..8, 8u16..16, 0u8..3, any::<bool>()).prop_map(
        |(start, end, page_end, final_page, primary)| {
            let target = if primary {
                Target::Primary
            } else {
                Target::Secondary
            };
            let rom_page_end = page_end * 16;
            let write_start = start * 16;
            let write_end = if final_page == 0 {
                (write_start + end * 16).min(rom_page_end)
            } else {
                end * 16
            };
            TargetLayout {
                write_start,
                write_end,
                rom_page_end,
                final_rom_page: final_page,
                ..TargetLayout::for_target(target)
            }
        },
    )
}

proptest! {
    #[test]
    fn prop_data_record_parses(address in any::<u32>(), payload in any::<[u8; 16]>()) {
        let image = FirmwareImage::parse(&record_line(address, &payload))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let record = image.records().first().copied();
        prop_assert!(record.is_some());
        if let Some(record) = record {
            prop_assert_eq!(record.address, address);
            prop_assert_eq!(record.payload, RecordPayload::Data(payload));
            prop_assert_eq!(record.line, 1);
        }
    }

    #[test]
    fn prop_single_digit_change_is_detected(
        address in any::<u32>(),
        payload in any::<[u8; 8]>(),
        position in 1usize..27,
        digit in 0usize..16,
    ) {
        let line = record_line(address, &payload);
        let mut bytes = line.into_bytes();
        let replacement = HEX_DIGITS.get(digit).copied().unwrap_or(b'0');
        let Some(slot) = bytes.get_mut(position) else {
            return Err(TestCaseError::fail("position out of range"));
        };
        prop_assume!(*slot != replacement);
        *slot = replacement;
        let text = String::from_utf8(bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let is_corrupt = matches!(
            FirmwareImage::parse(&text),
            Err(FirmwareUpdateError::CorruptImage { line: 1, .. })
        );
        prop_assert!(is_corrupt, "accepted {}", text);
    }

    #[test]
    fn prop_lowercase_images_parse_identically(payload in any::<[u8; 16]>()) {
        let text = format!("{}\n:00000001ff\n", record_line(0x0001_0020, &payload));
        let upper = FirmwareImage::parse(&text.to_uppercase())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let lower = FirmwareImage::parse(&text.to_lowercase())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(upper, lower);
    }

    #[test]
    fn prop_plan_covers_exactly_the_write_window(layout in arb_layout()) {
        let builder = ImageBuilder::new(layout);
        let image = FirmwareImage::parse(&builder.build())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let plan = WritePlan::build(&image, &layout)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(plan.data_lines(), builder.expected_data_lines());
        prop_assert_eq!(plan.page_advances(), usize::from(layout.final_rom_page));

        let mut expected_page = 0u8;
        for step in plan.steps() {
            match *step {
                PlanStep::Data { page, offset, .. } => {
                    prop_assert_eq!(page, expected_page);
                    if page == 0 {
                        prop_assert!(offset >= layout.write_start);
                    }
                    if page == layout.final_rom_page {
                        prop_assert!(offset <= layout.write_end);
                    } else {
                        prop_assert!(offset <= layout.rom_page_end);
                    }
                }
                PlanStep::PageAdvance { page, .. } => {
                    expected_page += 1;
                    prop_assert_eq!(page, expected_page);
                }
            }
        }
        prop_assert_eq!(expected_page, layout.final_rom_page);
    }

    #[test]
    fn prop_truncated_images_never_plan(layout in arb_layout()) {
        let image = FirmwareImage::parse(&ImageBuilder::new(layout).truncated().build())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let is_incomplete = matches!(
            WritePlan::build(&image, &layout),
            Err(FirmwareUpdateError::IncompleteImage { .. })
        );
        prop_assert!(is_incomplete);
    }
}
