//! Synthetic firmware images.
//!
//! [`ImageBuilder`] lays records out the way real images are: page 0 from
//! address 0 up to its ROM page end, a page-advance record, the next page,
//! and so on up to the write end of the final page. The model id info
//! record and the end-of-file marker follow.

use psu_firmware_update::{Target, TargetLayout};
use psu_pmbus::twos_complement_checksum;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A layout small enough for fast tests, keeping the production passwords.
///
/// Primary spans two ROM pages so page advances are exercised; secondary
/// fits on page 0.
pub fn small_layout(target: Target) -> TargetLayout {
    let production = TargetLayout::for_target(target);
    match target {
        Target::Primary => TargetLayout {
            write_start: 0x0040,
            write_end: 0x0060,
            rom_page_end: 0x00F0,
            final_rom_page: 1,
            ..production
        },
        Target::Secondary => TargetLayout {
            write_start: 0x0020,
            write_end: 0x0080,
            rom_page_end: 0x00F0,
            final_rom_page: 0,
            ..production
        },
    }
}

/// Deterministic payload of the record at (`page`, `offset`).
pub fn payload_for(page: u8, offset: u16) -> [u8; 16] {
    let [hi, lo] = offset.to_be_bytes();
    core::array::from_fn(|i| {
        let i = u8::try_from(i).unwrap();
        page.wrapping_mul(0x40) ^ hi ^ lo.wrapping_add(i)
    })
}

/// One image line with a leading `:` marker.
pub fn record_line(address: u32, payload: &[u8]) -> String {
    let mut bytes = address.to_be_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes.push(twos_complement_checksum(&bytes));
    format!(":{}", hex::encode_upper(bytes))
}

/// Builder for synthetic images.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    layout: TargetLayout,
    model_id: Option<[u8; 8]>,
    stop_short: bool,
    corrupt_line: Option<usize>,
}

impl ImageBuilder {
    /// Image for `layout` with model id `PSU-0001`.
    pub fn new(layout: TargetLayout) -> Self {
        Self {
            layout,
            model_id: Some(*b"PSU-0001"),
            stop_short: false,
            corrupt_line: None,
        }
    }

    /// Use `model_id`.
    pub fn model_id(mut self, model_id: [u8; 8]) -> Self {
        self.model_id = Some(model_id);
        self
    }

    /// Leave the model id record out.
    pub fn without_model_id(mut self) -> Self {
        self.model_id = None;
        self
    }

    /// End one record before the write end.
    pub fn truncated(mut self) -> Self {
        self.stop_short = true;
        self
    }

    /// Break the checksum of 1-based `line`.
    pub fn corrupt_line(mut self, line: usize) -> Self {
        self.corrupt_line = Some(line);
        self
    }

    /// Records as image lines.
    pub fn lines(&self) -> Vec<String> {
        let layout = &self.layout;
        let mut lines = Vec::new();
        for page in 0..=layout.final_rom_page {
            let base = u32::from(page) << 16;
            let last = if page == layout.final_rom_page {
                layout.write_end
            } else {
                layout.rom_page_end
            };
            for offset in (0..=last).step_by(16) {
                if self.stop_short && page == layout.final_rom_page && offset == last {
                    break;
                }
                lines.push(record_line(base | u32::from(offset), &payload_for(page, offset)));
            }
            if page < layout.final_rom_page {
                let next = u32::from(page + 1) << 16;
                lines.push(record_line(next, &[0xA0 | page; 16]));
            }
        }
        if let Some(model_id) = self.model_id {
            lines.push(record_line(layout.model_id_address, &model_id));
        }
        lines.push(":00000001FF".into());

        if let Some(line) = self.corrupt_line {
            if let Some(text) = lines.get_mut(line - 1) {
                let checksum = u8::from_str_radix(&text[text.len() - 2..], 16).unwrap();
                text.truncate(text.len() - 2);
                text.push_str(&format!("{:02X}", !checksum));
            }
        }
        lines
    }

    /// Image text.
    pub fn build(&self) -> String {
        let mut text = self.lines().join("\n");
        text.push('\n');
        text
    }

    /// Write the image to a temporary file.
    pub fn write_temp(&self) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".hex").tempfile().unwrap();
        file.write_all(self.build().as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    /// Write the image into `dir` and return its path.
    pub fn write_into(&self, dir: &std::path::Path) -> PathBuf {
        let path = dir.join(format!("{}.hex", self.layout.target));
        std::fs::write(&path, self.build()).unwrap();
        path
    }

    /// Data records the engine programs for this layout.
    pub fn expected_data_lines(&self) -> usize {
        let layout = &self.layout;
        let per_line = 16usize;
        let mut lines = 0;
        for page in 0..=layout.final_rom_page {
            let first = if page == 0 { layout.write_start } else { 0 };
            let last = if page == layout.final_rom_page {
                layout.write_end
            } else {
                layout.rom_page_end
            };
            lines += usize::from(last - first) / per_line + 1;
        }
        lines
    }
}
