//! ATA PIO driver for the primary IDE bus, master drive.
//!
//! Implements just enough of the ATA command set — IDENTIFY, READ SECTORS,
//! WRITE SECTORS, FLUSH CACHE — to back a single 512-byte-sector block
//! device, using LBA28 addressing and programmed I/O (no DMA, no IRQs).

use crate::arch::x86_64::{inb, inw, outb, outw};
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::{BlockDevice, DEFAULT_SECTOR_SIZE};

const IO_BASE: u16 = 0x1F0;
const CONTROL_BASE: u16 = 0x3F6;

const REG_DATA: u16 = IO_BASE;
const REG_ERROR: u16 = IO_BASE + 1;
const REG_SECTOR_COUNT: u16 = IO_BASE + 2;
const REG_LBA_LOW: u16 = IO_BASE + 3;
const REG_LBA_MID: u16 = IO_BASE + 4;
const REG_LBA_HIGH: u16 = IO_BASE + 5;
const REG_DRIVE_HEAD: u16 = IO_BASE + 6;
const REG_STATUS: u16 = IO_BASE + 7;
const REG_COMMAND: u16 = IO_BASE + 7;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_FLUSH_CACHE: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

pub struct AtaDrive {
    sector_count: u64,
}

impl AtaDrive {
    /// Select the primary master and run IDENTIFY to learn the drive's
    /// sector count.
    pub fn identify() -> KernelResult<Self> {
        select_master(0);
        // SAFETY: writing 0 to the sector-count/LBA registers before
        // IDENTIFY matches the documented command sequence.
        unsafe {
            outb(REG_SECTOR_COUNT, 0);
            outb(REG_LBA_LOW, 0);
            outb(REG_LBA_MID, 0);
            outb(REG_LBA_HIGH, 0);
            outb(REG_COMMAND, CMD_IDENTIFY);
        }

        // SAFETY: reading the status port has no side effects.
        let status = unsafe { inb(REG_STATUS) };
        if status == 0 {
            return Err(KernelError::HardwareError { device: "ata0", code: 0 });
        }

        wait_not_busy();
        // SAFETY: LBA mid/high are read back as part of the documented
        // IDENTIFY non-ATA-device probe.
        let lba_mid = unsafe { inb(REG_LBA_MID) };
        let lba_high = unsafe { inb(REG_LBA_HIGH) };
        if lba_mid != 0 || lba_high != 0 {
            return Err(KernelError::HardwareError { device: "ata0", code: 1 });
        }

        wait_drq()?;

        let mut identify_data = [0u16; 256];
        // SAFETY: 256 16-bit reads from the data port is the documented
        // IDENTIFY response size.
        unsafe {
            for word in identify_data.iter_mut() {
                *word = inw(REG_DATA);
            }
        }

        let lba28_sectors =
            (identify_data[61] as u32) << 16 | identify_data[60] as u32;

        Ok(Self { sector_count: lba28_sectors as u64 })
    }
}

fn select_master(lba_high_bits: u8) {
    // SAFETY: 0xE0 selects the primary master with LBA mode; the top 4 bits
    // of the LBA28 address are ORed in as the register documents.
    unsafe {
        outb(REG_DRIVE_HEAD, 0xE0 | (lba_high_bits & 0x0F));
    }
}

fn wait_not_busy() {
    // SAFETY: polling the status port for BSY to clear is the documented
    // way to wait for the drive to finish its current command.
    while unsafe { inb(REG_STATUS) } & STATUS_BSY != 0 {
        core::hint::spin_loop();
    }
}

fn wait_drq() -> KernelResult<()> {
    loop {
        // SAFETY: see wait_not_busy.
        let status = unsafe { inb(REG_STATUS) };
        if status & STATUS_ERR != 0 {
            return Err(KernelError::HardwareError { device: "ata0", code: status as u32 });
        }
        if status & STATUS_DRQ != 0 {
            return Ok(());
        }
        core::hint::spin_loop();
    }
}

/// Four reads of the alternate status register, the documented 400 ns delay
/// after issuing a command.
fn delay_400ns() {
    // SAFETY: the control-base status register is read-only and has no
    // side effects beyond the read itself.
    unsafe {
        for _ in 0..4 {
            inb(CONTROL_BASE);
        }
    }
}

fn setup_lba28(lba: u32, sector_count: u8) {
    select_master((lba >> 24) as u8);
    // SAFETY: programming the sector-count and LBA registers ahead of a
    // READ/WRITE SECTORS command is the documented sequence.
    unsafe {
        outb(REG_SECTOR_COUNT, sector_count);
        outb(REG_LBA_LOW, lba as u8);
        outb(REG_LBA_MID, (lba >> 8) as u8);
        outb(REG_LBA_HIGH, (lba >> 16) as u8);
    }
}

impl BlockDevice for AtaDrive {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> KernelResult<()> {
        if buf.len() < DEFAULT_SECTOR_SIZE {
            return Err(KernelError::InvalidArgument { name: "buf", value: "too_small" });
        }
        setup_lba28(sector as u32, 1);
        // SAFETY: issuing READ SECTORS after programming LBA/count is the
        // documented command sequence.
        unsafe {
            outb(REG_COMMAND, CMD_READ_SECTORS);
        }
        delay_400ns();
        wait_not_busy();
        wait_drq()?;
        // SAFETY: 256 words is exactly one 512-byte sector, matching `buf`'s
        // validated length.
        unsafe {
            for i in 0..256 {
                let word = inw(REG_DATA);
                buf[i * 2] = word as u8;
                buf[i * 2 + 1] = (word >> 8) as u8;
            }
        }
        Ok(())
    }

    fn write_sector(&self, sector: u64, buf: &[u8]) -> KernelResult<()> {
        if buf.len() < DEFAULT_SECTOR_SIZE {
            return Err(KernelError::InvalidArgument { name: "buf", value: "too_small" });
        }
        setup_lba28(sector as u32, 1);
        // SAFETY: see read_sector.
        unsafe {
            outb(REG_COMMAND, CMD_WRITE_SECTORS);
        }
        delay_400ns();
        wait_not_busy();
        wait_drq()?;
        // SAFETY: 256 words is exactly one 512-byte sector.
        unsafe {
            for i in 0..256 {
                let word = buf[i * 2] as u16 | (buf[i * 2 + 1] as u16) << 8;
                outw(REG_DATA, word);
            }
        }
        delay_400ns();
        self.flush()
    }

    fn flush(&self) -> KernelResult<()> {
        // SAFETY: FLUSH CACHE takes no parameters beyond the command byte.
        unsafe {
            outb(REG_COMMAND, CMD_FLUSH_CACHE);
        }
        wait_not_busy();
        Ok(())
    }
}

/// Probe the primary master and, if present, register it with the
/// block-device registry as `"hda"`.
pub fn init() {
    match AtaDrive::identify() {
        Ok(drive) => {
            log::info!("ata: hda identified, {} sectors", drive.sector_count());
            if let Err(e) = crate::fs::blockdev::register("hda", alloc::sync::Arc::new(drive)) {
                log::error!("ata: failed to register hda: {}", e);
            }
        }
        Err(e) => {
            log::warn!("ata: no primary master drive found: {}", e);
        }
    }
}
