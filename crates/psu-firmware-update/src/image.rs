//! Hex-record firmware images.
//!
//! One record per line, an optional leading `:` marker, all fields hex:
//!
//! ```text
//! data record  AAAAAAAA DD..(16 bytes)..DD CC   42 chars
//! info record  AAAAAAAA DD..(8 bytes)..DD  CC   26 chars
//! end of file  00000001FF
//! ```
//!
//! `CC` is the two's complement of the sum of the address and payload bytes.
//! Lines are validated once on load; everything downstream works on
//! [`HexRecord`] fields.

use crate::error::{FirmwareUpdateError, FirmwareUpdateResult};
use crate::target::{Target, TargetLayout};
use psu_pmbus::twos_complement_checksum;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DATA_RECORD_CHARS: usize = 42;
const INFO_RECORD_CHARS: usize = 26;
const END_OF_FILE_RECORD: &str = "00000001FF";

/// Payload of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPayload {
    /// Sixteen bytes of program memory.
    Data([u8; 16]),
    /// Eight bytes of image metadata, such as the model id.
    Info([u8; 8]),
}

/// One validated image line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexRecord {
    /// 1-based line number in the file.
    pub line: usize,
    /// Record address.
    pub address: u32,
    /// Record payload.
    pub payload: RecordPayload,
}

impl HexRecord {
    /// Low 16 bits of the address: the offset within the current ROM page.
    #[must_use]
    pub fn page_offset(&self) -> u16 {
        let [_, _, hi, lo] = self.address.to_be_bytes();
        u16::from_be_bytes([hi, lo])
    }
}

/// A parsed firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareImage {
    records: Vec<HexRecord>,
    end_of_file_line: Option<usize>,
}

impl FirmwareImage {
    /// Read and parse an image file.
    ///
    /// # Errors
    ///
    /// Returns [`FirmwareUpdateError::Io`] if the file cannot be read and
    /// [`FirmwareUpdateError::CorruptImage`] for a malformed line.
    pub fn load(path: &Path) -> FirmwareUpdateResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| FirmwareUpdateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse image text.
    ///
    /// # Errors
    ///
    /// Returns [`FirmwareUpdateError::CorruptImage`] naming the first bad line.
    pub fn parse(text: &str) -> FirmwareUpdateResult<Self> {
        let mut image = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            let body = trimmed.strip_prefix(':').unwrap_or(trimmed).trim();
            if body.is_empty() {
                continue;
            }
            if let Some(eof_line) = image.end_of_file_line {
                return Err(FirmwareUpdateError::corrupt(
                    line,
                    format!("record after end-of-file marker on line {eof_line}"),
                ));
            }
            if body.eq_ignore_ascii_case(END_OF_FILE_RECORD) {
                image.end_of_file_line = Some(line);
                continue;
            }
            image.records.push(parse_record(line, body)?);
        }
        Ok(image)
    }

    /// All records in file order.
    #[must_use]
    pub fn records(&self) -> &[HexRecord] {
        &self.records
    }

    /// True if the image carried an end-of-file record.
    #[must_use]
    pub fn has_end_of_file(&self) -> bool {
        self.end_of_file_line.is_some()
    }

    /// First record at `address`.
    #[must_use]
    pub fn find(&self, address: u32) -> Option<&HexRecord> {
        self.records.iter().find(|r| r.address == address)
    }

    /// Model id for `layout`'s target.
    ///
    /// # Errors
    ///
    /// Fails when no record sits at the model id address or that record is
    /// not an info record.
    pub fn model_id(&self, layout: &TargetLayout) -> FirmwareUpdateResult<[u8; 8]> {
        let record = self
            .find(layout.model_id_address)
            .ok_or(FirmwareUpdateError::ModelIdMissing {
                address: layout.model_id_address,
            })?;
        match record.payload {
            RecordPayload::Info(bytes) => Ok(bytes),
            RecordPayload::Data(_) => Err(FirmwareUpdateError::ModelIdMalformed {
                line: record.line,
            }),
        }
    }

    /// Offline summary for `layout`, validating the model id and write plan.
    ///
    /// # Errors
    ///
    /// Fails with the same errors an update would hit before touching the PSU.
    pub fn summarize(&self, layout: &TargetLayout) -> FirmwareUpdateResult<ImageSummary> {
        let model_id = self.model_id(layout)?;
        let plan = WritePlan::build(self, layout)?;
        let (data, info) = self
            .records
            .iter()
            .fold((0, 0), |(data, info), r| match r.payload {
                RecordPayload::Data(_) => (data + 1, info),
                RecordPayload::Info(_) => (data, info + 1),
            });
        Ok(ImageSummary {
            target: layout.target,
            data_records: data,
            info_records: info,
            has_end_of_file: self.has_end_of_file(),
            model_id: hex::encode_upper(model_id),
            rom_pages: plan.page_advances() + 1,
            write_lines: plan.data_lines(),
            write_transactions: plan.write_transactions(),
        })
    }
}

fn parse_record(line: usize, body: &str) -> FirmwareUpdateResult<HexRecord> {
    if body.len() != DATA_RECORD_CHARS && body.len() != INFO_RECORD_CHARS {
        return Err(FirmwareUpdateError::corrupt(
            line,
            format!(
                "record is {} characters, expected {DATA_RECORD_CHARS} or {INFO_RECORD_CHARS}",
                body.len()
            ),
        ));
    }
    let bytes = hex::decode(body)
        .map_err(|e| FirmwareUpdateError::corrupt(line, format!("invalid hex: {e}")))?;
    let (carried, covered) = bytes
        .split_last()
        .ok_or_else(|| FirmwareUpdateError::corrupt(line, "empty record"))?;
    let computed = twos_complement_checksum(covered);
    if computed != *carried {
        return Err(FirmwareUpdateError::corrupt(
            line,
            format!("checksum {carried:#04x} does not match computed {computed:#04x}"),
        ));
    }
    let (address, payload) = covered
        .split_first_chunk::<4>()
        .ok_or_else(|| FirmwareUpdateError::corrupt(line, "record too short"))?;
    let payload = if let Ok(data) = <[u8; 16]>::try_from(payload) {
        RecordPayload::Data(data)
    } else if let Ok(info) = <[u8; 8]>::try_from(payload) {
        RecordPayload::Info(info)
    } else {
        return Err(FirmwareUpdateError::corrupt(line, "unexpected payload size"));
    };
    Ok(HexRecord {
        line,
        address: u32::from_be_bytes(*address),
        payload,
    })
}

/// One bootloader write derived from the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    /// Program a data record as two 8-byte halves.
    Data {
        /// 1-based image line.
        line: usize,
        /// ROM page the record belongs to.
        page: u8,
        /// Page-relative address of the first half.
        offset: u16,
        /// Record payload.
        bytes: [u8; 16],
    },
    /// Advance to the next ROM page.
    PageAdvance {
        /// 1-based image line.
        line: usize,
        /// ROM page entered.
        page: u8,
        /// Data sent with `WriteRomPageData`.
        bytes: [u8; 8],
    },
}

impl PlanStep {
    /// 1-based image line this step came from.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::Data { line, .. } | Self::PageAdvance { line, .. } => *line,
        }
    }
}

/// The ordered writes that program a target, from its write start to its
/// write end on the final ROM page.
///
/// The record after a ROM-page-end record is a page-advance record, not
/// program data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    steps: Vec<PlanStep>,
}

impl WritePlan {
    /// Derive the plan for `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`FirmwareUpdateError::IncompleteImage`] unless the image
    /// reaches the write end address and the final ROM page together.
    pub fn build(image: &FirmwareImage, layout: &TargetLayout) -> FirmwareUpdateResult<Self> {
        let mut steps = Vec::new();
        let mut page = 0u8;
        let mut started = false;
        let mut advance_next = false;

        for record in image.records() {
            let RecordPayload::Data(bytes) = record.payload else {
                continue;
            };
            let offset = record.page_offset();
            if !started {
                if offset != layout.write_start {
                    continue;
                }
                started = true;
            }

            if advance_next {
                advance_next = false;
                page = page.checked_add(1).ok_or_else(|| {
                    FirmwareUpdateError::corrupt(record.line, "ROM page counter overflow")
                })?;
                let head = bytes.first_chunk::<8>().copied().unwrap_or_default();
                steps.push(PlanStep::PageAdvance {
                    line: record.line,
                    page,
                    bytes: head,
                });
                continue;
            }

            steps.push(PlanStep::Data {
                line: record.line,
                page,
                offset,
                bytes,
            });
            if offset == layout.write_end && page == layout.final_rom_page {
                return Ok(Self { steps });
            }
            if offset == layout.rom_page_end {
                advance_next = true;
            }
        }

        Err(FirmwareUpdateError::IncompleteImage {
            end: layout.write_end,
            final_page: layout.final_rom_page,
        })
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of data records programmed.
    #[must_use]
    pub fn data_lines(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Data { .. }))
            .count()
    }

    /// Number of ROM page advances.
    #[must_use]
    pub fn page_advances(&self) -> usize {
        self.steps.len() - self.data_lines()
    }

    /// Bootloader writes needed: two per data record, one per page advance.
    #[must_use]
    pub fn write_transactions(&self) -> usize {
        self.data_lines() * 2 + self.page_advances()
    }
}

/// Offline description of an image for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Target the image was checked against.
    pub target: Target,
    /// Data records in the file.
    pub data_records: usize,
    /// Info records in the file.
    pub info_records: usize,
    /// End-of-file record present.
    pub has_end_of_file: bool,
    /// Model id, hex.
    pub model_id: String,
    /// ROM pages touched by the write plan.
    pub rom_pages: usize,
    /// Data records programmed.
    pub write_lines: usize,
    /// Bootloader writes in the plan.
    pub write_transactions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: u32, payload: &[u8]) -> String {
        let mut bytes = address.to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        let checksum = twos_complement_checksum(&bytes);
        bytes.push(checksum);
        format!(":{}", hex::encode_upper(bytes))
    }

    fn tiny_layout() -> TargetLayout {
        TargetLayout {
            write_start: 0x0020,
            write_end: 0x0010,
            rom_page_end: 0x0030,
            final_rom_page: 1,
            ..TargetLayout::PRIMARY
        }
    }

    fn tiny_image() -> String {
        let mut lines = Vec::new();
        for offset in (0x00..=0x30u32).step_by(0x10) {
            lines.push(record(offset, &[u8::try_from(offset).unwrap_or_default(); 16]));
        }
        lines.push(record(0x0001_0000, &[0xAA; 16]));
        lines.push(record(0x0000, &[0x40; 16]));
        lines.push(record(0x0010, &[0x50; 16]));
        lines.push(record(0x00FF_0000, b"MODEL-01"));
        lines.push(":00000001FF".to_string());
        lines.join("\n")
    }

    #[test]
    fn test_parse_skips_blank_lines_and_markers() -> FirmwareUpdateResult<()> {
        let text = format!("\n  {}  \n\n{}\n", record(0x10, &[1; 16]), "00000001FF");
        let image = FirmwareImage::parse(&text)?;
        assert_eq!(image.records().len(), 1);
        assert!(image.has_end_of_file());
        let first = image.records().first().copied();
        assert_eq!(first.map(|r| r.line), Some(2));
        Ok(())
    }

    #[test]
    fn test_wrong_length_names_line() {
        let text = format!("{}\n:0000001000AA", record(0, &[0; 16]));
        let err = FirmwareImage::parse(&text).err();
        assert!(matches!(
            err,
            Some(FirmwareUpdateError::CorruptImage { line: 2, .. })
        ));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // carried checksum is 0x70; replace it with 0x00
        let mut line = record(0x20, &[7; 16]);
        line.truncate(line.len() - 2);
        line.push_str("00");
        let err = FirmwareImage::parse(&line).err();
        assert!(matches!(
            err,
            Some(FirmwareUpdateError::CorruptImage { line: 1, .. })
        ));
    }

    #[test]
    fn test_non_hex_rejected() {
        let line = format!(":{}", "Z".repeat(DATA_RECORD_CHARS));
        assert!(FirmwareImage::parse(&line).is_err());
    }

    #[test]
    fn test_record_after_eof_rejected() {
        let text = format!(":00000001FF\n{}", record(0, &[0; 16]));
        let err = FirmwareImage::parse(&text).err();
        assert!(matches!(
            err,
            Some(FirmwareUpdateError::CorruptImage { line: 2, .. })
        ));
    }

    #[test]
    fn test_model_id_extraction() -> FirmwareUpdateResult<()> {
        let image = FirmwareImage::parse(&tiny_image())?;
        assert_eq!(&image.model_id(&tiny_layout())?, b"MODEL-01");
        let secondary = TargetLayout::SECONDARY;
        assert!(matches!(
            image.model_id(&secondary),
            Err(FirmwareUpdateError::ModelIdMissing { address: 0x00FE_0000 })
        ));
        Ok(())
    }

    #[test]
    fn test_model_id_on_data_record_is_malformed() -> FirmwareUpdateResult<()> {
        let image = FirmwareImage::parse(&record(0x00FF_0000, &[0; 16]))?;
        assert!(matches!(
            image.model_id(&TargetLayout::PRIMARY),
            Err(FirmwareUpdateError::ModelIdMalformed { line: 1 })
        ));
        Ok(())
    }

    #[test]
    fn test_plan_advances_page_after_page_end() -> FirmwareUpdateResult<()> {
        let image = FirmwareImage::parse(&tiny_image())?;
        let plan = WritePlan::build(&image, &tiny_layout())?;
        let summary: Vec<(char, u8, usize)> = plan
            .steps()
            .iter()
            .map(|s| match s {
                PlanStep::Data { page, offset, .. } => ('D', *page, usize::from(*offset)),
                PlanStep::PageAdvance { page, .. } => ('P', *page, 0),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ('D', 0, 0x20),
                ('D', 0, 0x30),
                ('P', 1, 0),
                ('D', 1, 0x00),
                ('D', 1, 0x10)
            ]
        );
        assert_eq!(plan.write_transactions(), 9);
        Ok(())
    }

    #[test]
    fn test_end_address_on_wrong_page_is_incomplete() -> FirmwareUpdateResult<()> {
        // write_end 0x10 also appears on page 0 before write_start, and the
        // image stops before page 1 reaches it.
        let text = [
            record(0x00, &[0; 16]),
            record(0x10, &[0; 16]),
            record(0x20, &[0; 16]),
            record(0x30, &[0; 16]),
        ]
        .join("\n");
        let image = FirmwareImage::parse(&text)?;
        assert!(matches!(
            WritePlan::build(&image, &tiny_layout()),
            Err(FirmwareUpdateError::IncompleteImage {
                end: 0x0010,
                final_page: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn test_summary() -> FirmwareUpdateResult<()> {
        let image = FirmwareImage::parse(&tiny_image())?;
        let summary = image.summarize(&tiny_layout())?;
        assert_eq!(summary.data_records, 7);
        assert_eq!(summary.info_records, 1);
        assert_eq!(summary.rom_pages, 2);
        assert_eq!(summary.write_lines, 4);
        assert_eq!(summary.model_id, "4D4F44454C2D3031");
        Ok(())
    }
}
