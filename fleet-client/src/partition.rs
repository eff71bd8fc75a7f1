//! Partition lookup in a disk image or block device (MBR and GPT).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const SECTOR_SIZE: u64 = 512;

const MBR_SIGNATURE: [u8; 2] = [0x55, 0xaa];
const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const GPT_PROTECTIVE: u8 = 0xee;
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const GPT_MIN_ENTRY_SIZE: u32 = 48;
const GPT_MAX_ENTRY_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Byte offset of the first sector.
    pub offset: u64,
    pub size: u64,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Find partition `number` (1-based) of the image or device at `path`.
pub fn find_partition(path: &Path, number: u8) -> io::Result<Partition> {
    let mut file = File::open(path)?;
    let mut mbr = [0u8; SECTOR_SIZE as usize];
    file.read_exact(&mut mbr)?;

    if is_protective_mbr(&mbr) {
        let mut header = [0u8; SECTOR_SIZE as usize];
        file.seek(SeekFrom::Start(SECTOR_SIZE))?;
        file.read_exact(&mut header)?;
        let table = GptTable::parse(&header)?;
        if number == 0 || u32::from(number) > table.entries {
            return Err(invalid(format!("no partition {} in GPT", number)));
        }
        let mut entry = vec![0u8; table.entry_size as usize];
        let at = table
            .entries_lba
            .checked_mul(SECTOR_SIZE)
            .and_then(|start| {
                start.checked_add(u64::from(number - 1) * u64::from(table.entry_size))
            })
            .ok_or_else(|| invalid("GPT entry table out of range"))?;
        file.seek(SeekFrom::Start(at))?;
        file.read_exact(&mut entry)?;
        return gpt_entry(&entry)?
            .ok_or_else(|| invalid(format!("partition {} is unused", number)));
    }

    mbr_partition(&mbr, number)
}

fn is_protective_mbr(mbr: &[u8]) -> bool {
    mbr[510..512] == MBR_SIGNATURE && mbr[MBR_TABLE_OFFSET + 4] == GPT_PROTECTIVE
}

/// Primary MBR partitions only; logical partitions are not followed.
fn mbr_partition(mbr: &[u8], number: u8) -> io::Result<Partition> {
    if mbr[510..512] != MBR_SIGNATURE {
        return Err(invalid("no partition table found"));
    }
    if !(1..=4).contains(&number) {
        return Err(invalid(format!(
            "partition {} is not a primary MBR partition",
            number
        )));
    }
    let entry = MBR_TABLE_OFFSET + usize::from(number - 1) * MBR_ENTRY_SIZE;
    let kind = mbr[entry + 4];
    let start = u64::from(le_u32(mbr, entry + 8));
    let sectors = u64::from(le_u32(mbr, entry + 12));
    if kind == 0 || sectors == 0 {
        return Err(invalid(format!("partition {} is unused", number)));
    }
    Ok(Partition {
        offset: start * SECTOR_SIZE,
        size: sectors * SECTOR_SIZE,
    })
}

struct GptTable {
    entries_lba: u64,
    entries: u32,
    entry_size: u32,
}

impl GptTable {
    fn parse(header: &[u8]) -> io::Result<Self> {
        if &header[0..8] != GPT_SIGNATURE {
            return Err(invalid("missing GPT header"));
        }
        let table = Self {
            entries_lba: le_u64(header, 72),
            entries: le_u32(header, 80),
            entry_size: le_u32(header, 84),
        };
        if !(GPT_MIN_ENTRY_SIZE..=GPT_MAX_ENTRY_SIZE).contains(&table.entry_size) {
            return Err(invalid(format!(
                "unsupported GPT entry size {}",
                table.entry_size
            )));
        }
        Ok(table)
    }
}

/// `None` for an unused entry.
fn gpt_entry(entry: &[u8]) -> io::Result<Option<Partition>> {
    if entry[0..16].iter().all(|b| *b == 0) {
        return Ok(None);
    }
    let first = le_u64(entry, 32);
    let last = le_u64(entry, 40);
    let sectors = last
        .checked_sub(first)
        .and_then(|span| span.checked_add(1))
        .ok_or_else(|| invalid("GPT entry ends before it starts"))?;
    match (first.checked_mul(SECTOR_SIZE), sectors.checked_mul(SECTOR_SIZE)) {
        (Some(offset), Some(size)) => Ok(Some(Partition { offset, size })),
        _ => Err(invalid("GPT entry out of range")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mbr_with(entries: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut mbr = vec![0u8; SECTOR_SIZE as usize];
        for (i, (kind, start, sectors)) in entries.iter().enumerate() {
            let at = MBR_TABLE_OFFSET + i * MBR_ENTRY_SIZE;
            mbr[at + 4] = *kind;
            mbr[at + 8..at + 12].copy_from_slice(&start.to_le_bytes());
            mbr[at + 12..at + 16].copy_from_slice(&sectors.to_le_bytes());
        }
        mbr[510] = 0x55;
        mbr[511] = 0xaa;
        mbr
    }

    #[test]
    fn test_mbr_partition_offsets() {
        let mbr = mbr_with(&[(0x0c, 8192, 81920), (0x83, 90112, 1_000_000)]);
        assert_eq!(
            mbr_partition(&mbr, 1).unwrap(),
            Partition {
                offset: 8192 * 512,
                size: 81920 * 512
            }
        );
        assert_eq!(mbr_partition(&mbr, 2).unwrap().offset, 90112 * 512);
        assert!(mbr_partition(&mbr, 3).is_err());
        assert!(mbr_partition(&mbr, 5).is_err());
    }

    #[test]
    fn test_missing_signature() {
        let mut mbr = mbr_with(&[(0x0c, 2048, 100)]);
        mbr[511] = 0;
        assert!(mbr_partition(&mbr, 1).is_err());
    }

    #[test]
    fn test_find_partition_in_gpt_image() {
        let mut image = mbr_with(&[(GPT_PROTECTIVE, 1, 0xffff_ffff)]);

        let mut header = vec![0u8; SECTOR_SIZE as usize];
        header[0..8].copy_from_slice(GPT_SIGNATURE);
        header[72..80].copy_from_slice(&2u64.to_le_bytes());
        header[80..84].copy_from_slice(&128u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());
        image.extend_from_slice(&header);

        let mut entries = vec![0u8; 4 * 128];
        entries[0] = 0xaf; // any non-zero type GUID
        entries[32..40].copy_from_slice(&2048u64.to_le_bytes());
        entries[40..48].copy_from_slice(&4095u64.to_le_bytes());
        image.extend_from_slice(&entries);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();

        let partition = find_partition(file.path(), 1).unwrap();
        assert_eq!(
            partition,
            Partition {
                offset: 2048 * 512,
                size: 2048 * 512
            }
        );
        assert!(find_partition(file.path(), 2).is_err());
    }

    fn gpt_image(entry_size: u32, entries_lba: u64, first: u64, last: u64) -> Vec<u8> {
        let mut image = mbr_with(&[(GPT_PROTECTIVE, 1, 0xffff_ffff)]);
        let mut header = vec![0u8; SECTOR_SIZE as usize];
        header[0..8].copy_from_slice(GPT_SIGNATURE);
        header[72..80].copy_from_slice(&entries_lba.to_le_bytes());
        header[80..84].copy_from_slice(&4u32.to_le_bytes());
        header[84..88].copy_from_slice(&entry_size.to_le_bytes());
        image.extend_from_slice(&header);

        let mut entries = vec![0u8; 4 * 128];
        entries[0] = 0xaf;
        entries[32..40].copy_from_slice(&first.to_le_bytes());
        entries[40..48].copy_from_slice(&last.to_le_bytes());
        image.extend_from_slice(&entries);
        image
    }

    fn find_in(image: &[u8], number: u8) -> io::Result<Partition> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(image).unwrap();
        find_partition(file.path(), number)
    }

    #[test]
    fn test_corrupt_gpt_is_invalid_data() {
        let cases = [
            // Entry size that would need a huge buffer.
            gpt_image(0xffff_ffff, 2, 2048, 4095),
            gpt_image(16, 2, 2048, 4095),
            // Entry table offset overflows.
            gpt_image(128, u64::MAX, 2048, 4095),
            // Last sector before the first.
            gpt_image(128, 2, 4095, 2048),
            // Partition offset overflows.
            gpt_image(128, 2, u64::MAX / 2, u64::MAX / 2 + 1),
        ];
        for image in cases {
            let err = find_in(&image, 1).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "{}", err);
        }
    }

    #[test]
    fn test_find_partition_in_mbr_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&mbr_with(&[(0x0c, 2048, 4096)])).unwrap();
        assert_eq!(find_partition(file.path(), 1).unwrap().offset, 2048 * 512);
    }
}
