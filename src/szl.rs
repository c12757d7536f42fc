//! System Status List (SZL) decoding
//!
//! Turns reassembled SZL payloads into typed diagnostics: the CPU
//! operating mode from SZL 0x0424 and module identification records from
//! SZL 0x0011.

use crate::constants::SZL_MODULE_RECORD_SIZE;
use crate::error::{S7Error, S7Result};

/// A decoded SZL payload: header plus fixed-size data records.
#[derive(Debug, Clone)]
pub struct SzlData {
    /// SZL id the server answered with.
    pub id: u16,
    /// SZL index.
    pub index: u16,
    /// Size of one data record in bytes.
    pub record_len: usize,
    /// Number of records the header announced.
    pub record_count: usize,
    /// Raw record bytes, `record_len * record_count` when complete.
    pub records: Vec<u8>,
}

impl SzlData {
    /// Parse a reassembled SZL data unit:
    /// `id(u16), index(u16), record_len(u16), record_count(u16), records...`
    pub fn parse(data: &[u8]) -> S7Result<Self> {
        if data.len() < 8 {
            return Err(S7Error::protocol(format!(
                "SZL payload too short: {} bytes",
                data.len()
            )));
        }
        let id = u16::from_be_bytes([data[0], data[1]]);
        let index = u16::from_be_bytes([data[2], data[3]]);
        let record_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let record_count = u16::from_be_bytes([data[6], data[7]]) as usize;
        Ok(Self {
            id,
            index,
            record_len,
            record_count,
            records: data[8..].to_vec(),
        })
    }

    /// Iterate over complete records.
    pub fn iter_records(&self) -> impl Iterator<Item = &[u8]> {
        self.records
            .chunks_exact(self.record_len.max(1))
            .take(self.record_count)
    }
}

/// Identification of one module from SZL 0x0011.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Record index (module position).
    pub index: u16,
    /// Order number (MLFB), trailing spaces trimmed.
    pub order_number: String,
    /// Decoded hardware version, e.g. `V1.0`.
    pub hardware_version: String,
    /// Decoded firmware version, e.g. `V2.8`, or `N/A` when absent.
    pub firmware_version: String,
}

/// CPU operating mode from SZL 0x0424.
///
/// The mode byte sits at offset 3 of the first record: 0x08 is RUN,
/// 0x03 is STOP; anything else is reported verbatim.
pub fn cpu_status(szl: &SzlData) -> S7Result<String> {
    let record = szl
        .records
        .get(..4)
        .ok_or_else(|| S7Error::protocol("SZL 0x0424 record too short for a status byte"))?;
    Ok(match record[3] {
        0x08 => "RUN".to_string(),
        0x03 => "STOP".to_string(),
        other => format!("UNKNOWN(0x{other:02X})"),
    })
}

/// Decode the 28-byte module records of SZL 0x0011.
///
/// Record layout: `index(u16), order_number(20 ASCII bytes), reserved(u16),
/// hw_version(2), fw_version(2)`.
pub fn module_list(szl: &SzlData) -> S7Result<Vec<ModuleInfo>> {
    if szl.record_len != SZL_MODULE_RECORD_SIZE {
        return Err(S7Error::protocol(format!(
            "unexpected SZL 0x0011 record size {} (want {})",
            szl.record_len, SZL_MODULE_RECORD_SIZE
        )));
    }
    let mut modules = Vec::with_capacity(szl.record_count);
    for record in szl.iter_records() {
        let index = u16::from_be_bytes([record[0], record[1]]);
        let order_number: String = record[2..22]
            .iter()
            .map(|&b| char::from(b))
            .collect::<String>()
            .trim_end()
            .to_string();
        let hw = [record[24], record[25]];
        let fw = [record[26], record[27]];
        modules.push(ModuleInfo {
            index,
            order_number,
            hardware_version: format_hardware_version(hw),
            firmware_version: format_firmware_version(fw),
        });
    }
    if modules.is_empty() {
        return Err(S7Error::protocol("SZL 0x0011 response carries no records"));
    }
    Ok(modules)
}

/// Hardware version: nibbles of the first byte when set, the second byte
/// as a plain number otherwise.
fn format_hardware_version(hw: [u8; 2]) -> String {
    if hw[0] != 0 {
        format!("V{}.{}", hw[0] >> 4, hw[0] & 0x0F)
    } else {
        format!("V{}", hw[1])
    }
}

/// Firmware version: two spaces mean "not available"; this decoding is not
/// verified for every S7-300/400 firmware line.
fn format_firmware_version(fw: [u8; 2]) -> String {
    if fw == [0x20, 0x20] {
        "N/A".to_string()
    } else {
        format!("V{}.{}", fw[0], fw[1])
    }
}
