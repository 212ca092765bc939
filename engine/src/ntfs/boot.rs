// NTFS boot sector
// Only the geometry fields the MFT walker needs

use findex_core::FindexError;

/// Geometry read from sector 0 of the volume.
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
}

impl BootSector {
    pub fn cluster_bytes(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }
}

/// Parse a raw boot sector.
///
/// Validates the NTFS OEM id and that the geometry is sane (power-of-two
/// sector size, nonzero cluster factor) before the walker derives buffer
/// alignments from it.
pub fn parse_boot_sector(data: &[u8]) -> Result<BootSector, FindexError> {
    if data.len() < 512 {
        return Err(FindexError::Other(format!(
            "Boot sector too short: {} bytes",
            data.len()
        )));
    }
    if &data[3..11] != b"NTFS    " {
        return Err(FindexError::Other("Volume is not NTFS".to_string()));
    }

    let bytes_per_sector = u16::from_le_bytes([data[11], data[12]]);
    let sectors_per_cluster = data[13];

    if !bytes_per_sector.is_power_of_two() || bytes_per_sector < 256 {
        return Err(FindexError::Other(format!(
            "Implausible sector size: {bytes_per_sector}"
        )));
    }
    if sectors_per_cluster == 0 {
        return Err(FindexError::Other("Zero sectors per cluster".to_string()));
    }

    Ok(BootSector {
        bytes_per_sector,
        sectors_per_cluster,
    })
}
