//! Block device registry.
//!
//! A fixed-size, named directory of block devices. Drivers register
//! themselves once at init; filesystems look a device up by name and issue
//! sector reads/writes through this layer rather than talking to hardware
//! directly.

use alloc::{string::String, sync::Arc};

use spin::Mutex;

use crate::error::{FsError, KernelError, KernelResult};
use crate::sync::IrqSpinlock;

pub const DEFAULT_SECTOR_SIZE: usize = 512;
const MAX_DEVICES: usize = 8;

/// Operations a block device driver must provide. `read`/`write` work in
/// whole sectors of `sector_size()` bytes.
pub trait BlockDevice: Send + Sync {
    fn sector_size(&self) -> usize {
        DEFAULT_SECTOR_SIZE
    }

    fn sector_count(&self) -> u64;

    fn is_writable(&self) -> bool {
        true
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> KernelResult<()>;

    fn write_sector(&self, sector: u64, buf: &[u8]) -> KernelResult<()>;

    fn flush(&self) -> KernelResult<()> {
        Ok(())
    }
}

struct Entry {
    name: String,
    major: u32,
    device: Arc<dyn BlockDevice>,
    lock: Mutex<()>,
}

struct Registry {
    entries: [Option<Entry>; MAX_DEVICES],
    next_major: u32,
}

static REGISTRY: IrqSpinlock<Registry> = IrqSpinlock::new(Registry {
    entries: [const { None }; MAX_DEVICES],
    next_major: 1,
});

/// Register a named block device. Rejects a duplicate name. Assigns the
/// next free major number.
pub fn register(name: &str, device: Arc<dyn BlockDevice>) -> KernelResult<()> {
    let mut reg = REGISTRY.lock();
    if reg.entries.iter().flatten().any(|e| e.name == name) {
        return Err(KernelError::FsError(FsError::AlreadyExists));
    }
    let slot = reg
        .entries
        .iter_mut()
        .find(|e| e.is_none())
        .ok_or(KernelError::FsError(FsError::IoError))?;
    let major = reg.next_major;
    reg.next_major += 1;
    *slot = Some(Entry {
        name: String::from(name),
        major,
        device,
        lock: Mutex::new(()),
    });
    Ok(())
}

/// Look up a registered device by name.
pub fn find(name: &str) -> Option<Arc<dyn BlockDevice>> {
    let reg = REGISTRY.lock();
    reg.entries
        .iter()
        .flatten()
        .find(|e| e.name == name)
        .map(|e| e.device.clone())
}

fn with_entry<R>(name: &str, f: impl FnOnce(&Entry) -> KernelResult<R>) -> KernelResult<R> {
    let reg = REGISTRY.lock();
    let entry = reg
        .entries
        .iter()
        .flatten()
        .find(|e| e.name == name)
        .ok_or(KernelError::FsError(FsError::NotFound))?;
    let _guard = entry.lock.lock();
    f(entry)
}

/// Read `count` sectors starting at `sector` from the named device into
/// `buf`. `buf` must be exactly `count * sector_size()` bytes.
pub fn read(name: &str, sector: u64, count: u64, buf: &mut [u8]) -> KernelResult<()> {
    with_entry(name, |entry| {
        let size = entry.device.sector_size();
        if sector + count > entry.device.sector_count() || buf.len() < (count as usize) * size {
            return Err(KernelError::InvalidArgument { name: "sector", value: "out_of_bounds" });
        }
        for i in 0..count {
            let start = (i as usize) * size;
            entry.device.read_sector(sector + i, &mut buf[start..start + size])?;
        }
        Ok(())
    })
}

/// Write `count` sectors starting at `sector` on the named device from `buf`.
pub fn write(name: &str, sector: u64, count: u64, buf: &[u8]) -> KernelResult<()> {
    with_entry(name, |entry| {
        if !entry.device.is_writable() {
            return Err(KernelError::FsError(FsError::ReadOnly));
        }
        let size = entry.device.sector_size();
        if sector + count > entry.device.sector_count() || buf.len() < (count as usize) * size {
            return Err(KernelError::InvalidArgument { name: "sector", value: "out_of_bounds" });
        }
        for i in 0..count {
            let start = (i as usize) * size;
            entry.device.write_sector(sector + i, &buf[start..start + size])?;
        }
        Ok(())
    })
}

/// Major number assigned to a registered device, if any.
pub fn major_of(name: &str) -> Option<u32> {
    let reg = REGISTRY.lock();
    reg.entries.iter().flatten().find(|e| e.name == name).map(|e| e.major)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    struct RamDisk {
        sectors: Mutex<alloc::vec::Vec<u8>>,
    }

    impl BlockDevice for RamDisk {
        fn sector_count(&self) -> u64 {
            (self.sectors.lock().len() / DEFAULT_SECTOR_SIZE) as u64
        }

        fn read_sector(&self, sector: u64, buf: &mut [u8]) -> KernelResult<()> {
            let data = self.sectors.lock();
            let start = sector as usize * DEFAULT_SECTOR_SIZE;
            buf.copy_from_slice(&data[start..start + DEFAULT_SECTOR_SIZE]);
            Ok(())
        }

        fn write_sector(&self, sector: u64, buf: &[u8]) -> KernelResult<()> {
            let mut data = self.sectors.lock();
            let start = sector as usize * DEFAULT_SECTOR_SIZE;
            data[start..start + DEFAULT_SECTOR_SIZE].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test_case]
    fn register_find_round_trip() {
        let disk = Arc::new(RamDisk {
            sectors: Mutex::new(vec![0u8; DEFAULT_SECTOR_SIZE * 4]),
        });
        register("test0", disk).unwrap();
        assert!(find("test0").is_some());
        assert!(major_of("test0").is_some());

        let mut buf = [0u8; DEFAULT_SECTOR_SIZE];
        buf[0] = 0x42;
        write("test0", 1, 1, &buf).unwrap();
        let mut out = [0u8; DEFAULT_SECTOR_SIZE];
        read("test0", 1, 1, &mut out).unwrap();
        assert_eq!(out[0], 0x42);
    }

    #[test_case]
    fn duplicate_name_rejected() {
        let disk = Arc::new(RamDisk {
            sectors: Mutex::new(vec![0u8; DEFAULT_SECTOR_SIZE]),
        });
        register("dup", disk.clone()).unwrap();
        assert!(register("dup", disk).is_err());
    }
}
