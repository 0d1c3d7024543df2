//! FAT32 filesystem driver.
//!
//! Operates entirely through the block-device registry's `read`/`write`,
//! one sector at a time for FAT entries and `sectors_per_cluster` sectors at
//! a time for data clusters. Short 8.3 names only; long-filename and
//! volume-label entries are skipped on read and never produced on write.

use core::ops::ControlFlow;

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use spin::Mutex;

use super::{blockdev, DirEntry, Inode, Metadata, NodeType, Superblock};
use crate::error::{FsError, KernelError, KernelResult};

const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = 0x0F;
const END_OF_CHAIN: u32 = 0x0FFF_FFFF;
const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// The on-disk BIOS Parameter Block plus the FAT32 extension, in field
/// order. Copied out of a full 512-byte sector buffer by exact struct size
/// only — copying the whole sector into this (smaller) struct would
/// overrun it.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct BootSector {
    jmp: [u8; 3],
    oem: [u8; 8],
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entries: u16,
    total_sectors_16: u16,
    media: u8,
    fat_size_16: u16,
    sectors_per_track: u16,
    num_heads: u16,
    hidden_sectors: u32,
    total_sectors_32: u32,
    fat_size_32: u32,
    ext_flags: u16,
    fs_version: u16,
    root_cluster: u32,
    fs_info: u16,
    backup_boot_sector: u16,
    reserved: [u8; 12],
    drive_number: u8,
    reserved1: u8,
    boot_signature: u8,
    volume_id: u32,
    volume_label: [u8; 11],
    fs_type_label: [u8; 8],
}

impl BootSector {
    const fn zero() -> Self {
        Self {
            jmp: [0; 3],
            oem: [0; 8],
            bytes_per_sector: 0,
            sectors_per_cluster: 0,
            reserved_sectors: 0,
            num_fats: 0,
            root_entries: 0,
            total_sectors_16: 0,
            media: 0,
            fat_size_16: 0,
            sectors_per_track: 0,
            num_heads: 0,
            hidden_sectors: 0,
            total_sectors_32: 0,
            fat_size_32: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info: 0,
            backup_boot_sector: 0,
            reserved: [0; 12],
            drive_number: 0,
            reserved1: 0,
            boot_signature: 0,
            volume_id: 0,
            volume_label: [0; 11],
            fs_type_label: [0; 8],
        }
    }
}

/// A decoded 32-byte directory entry slot.
#[derive(Clone, Copy)]
struct RawDirEntry {
    name: [u8; 11],
    attr: u8,
    cluster_high: u16,
    cluster_low: u16,
    file_size: u32,
}

impl RawDirEntry {
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            name: b[0..11].try_into().unwrap(),
            attr: b[11],
            cluster_high: u16::from_le_bytes(b[20..22].try_into().unwrap()),
            cluster_low: u16::from_le_bytes(b[26..28].try_into().unwrap()),
            file_size: u32::from_le_bytes(b[28..32].try_into().unwrap()),
        }
    }

    fn first_cluster(&self) -> u32 {
        ((self.cluster_high as u32) << 16) | self.cluster_low as u32
    }

    fn is_end(&self) -> bool {
        self.name[0] == 0x00
    }

    fn is_free(&self) -> bool {
        self.name[0] == 0x00 || self.name[0] == 0xE5
    }

    fn is_lfn_or_volume(&self) -> bool {
        self.attr == ATTR_LFN || self.attr & ATTR_VOLUME_ID != 0
    }

    fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    fn write_to(buf: &mut [u8], name: &[u8; 11], attr: u8, cluster: u32, size: u32) {
        buf[0..11].copy_from_slice(name);
        buf[11] = attr;
        buf[12..20].fill(0);
        buf[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        buf[22..26].fill(0);
        buf[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        buf[28..32].copy_from_slice(&size.to_le_bytes());
    }
}

/// Convert a conventional name (`"readme.txt"`) to its packed 8.3 form.
/// Rejects names with reserved characters or components too long to fit.
fn name_to_83(name: &str) -> KernelResult<[u8; 11]> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(KernelError::FsError(FsError::InvalidPath));
    }
    if name.chars().any(|c| "\\/:*?\"<>|".contains(c)) {
        return Err(KernelError::FsError(FsError::InvalidPath));
    }
    let (base, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return Err(KernelError::FsError(FsError::InvalidPath));
    }
    let mut packed = [b' '; 11];
    for (i, c) in base.bytes().enumerate() {
        packed[i] = c.to_ascii_uppercase();
    }
    for (i, c) in ext.bytes().enumerate() {
        packed[8 + i] = c.to_ascii_uppercase();
    }
    Ok(packed)
}

/// Convert a packed 8.3 name back to conventional lower-case form.
fn name_from_83(raw: &[u8; 11]) -> String {
    let base = core::str::from_utf8(&raw[0..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        base.to_ascii_lowercase()
    } else {
        format!("{}.{}", base.to_ascii_lowercase(), ext.to_ascii_lowercase())
    }
}

struct NodeInfo {
    first_cluster: u32,
    entry_cluster: u32,
    entry_offset: usize,
    is_dir: bool,
    size: u32,
}

/// Filesystem-wide state shared by every `Fat32Inode` mounted from it.
struct Fat32Fs {
    device: String,
    sectors_per_cluster: u8,
    num_fats: u8,
    fat_size_32: u32,
    fat_offset: u32,
    data_offset: u32,
    total_clusters: u32,
    cluster_size: u32,
    alloc_lock: Mutex<()>,
}

impl Fat32Fs {
    fn sector_of_cluster(&self, cluster: u32) -> u64 {
        self.data_offset as u64 + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    fn read_cluster(&self, cluster: u32, buf: &mut [u8]) -> KernelResult<()> {
        blockdev::read(&self.device, self.sector_of_cluster(cluster), self.sectors_per_cluster as u64, buf)
    }

    fn write_cluster(&self, cluster: u32, buf: &[u8]) -> KernelResult<()> {
        blockdev::write(&self.device, self.sector_of_cluster(cluster), self.sectors_per_cluster as u64, buf)
    }

    fn fat_entry_location(&self, cluster: u32) -> (u64, usize) {
        let byte_offset = cluster as u64 * 4;
        let sector_in_fat = byte_offset / 512;
        let offset_in_sector = (byte_offset % 512) as usize;
        (self.fat_offset as u64 + sector_in_fat, offset_in_sector)
    }

    /// Next cluster in the chain, or `None` at end-of-chain / out-of-range.
    fn next_cluster(&self, cluster: u32) -> KernelResult<Option<u32>> {
        if cluster < 2 || cluster > self.total_clusters + 1 {
            return Ok(None);
        }
        let (sector, offset) = self.fat_entry_location(cluster);
        let mut sector_buf = [0u8; 512];
        blockdev::read(&self.device, sector, 1, &mut sector_buf)?;
        let raw = u32::from_le_bytes(sector_buf[offset..offset + 4].try_into().unwrap()) & FAT_ENTRY_MASK;
        if raw < 2 || raw >= 0x0FFF_FFF8 {
            Ok(None)
        } else {
            Ok(Some(raw))
        }
    }

    /// Set `cluster`'s FAT entry, preserving its reserved high nibble, and
    /// mirror the write to the secondary FAT if present.
    fn set_entry(&self, cluster: u32, value: u32) -> KernelResult<()> {
        let (sector, offset) = self.fat_entry_location(cluster);
        let mut sector_buf = [0u8; 512];
        blockdev::read(&self.device, sector, 1, &mut sector_buf)?;
        let existing = u32::from_le_bytes(sector_buf[offset..offset + 4].try_into().unwrap());
        let new_value = (existing & !FAT_ENTRY_MASK) | (value & FAT_ENTRY_MASK);
        sector_buf[offset..offset + 4].copy_from_slice(&new_value.to_le_bytes());
        blockdev::write(&self.device, sector, 1, &sector_buf)?;
        if self.num_fats > 1 {
            blockdev::write(&self.device, sector + self.fat_size_32 as u64, 1, &sector_buf)?;
        }
        Ok(())
    }

    /// Linear scan from cluster 2 for the first free FAT entry, marks it
    /// end-of-chain, and returns its index.
    fn allocate_cluster(&self) -> KernelResult<u32> {
        let _guard = self.alloc_lock.lock();
        for cluster in 2..=self.total_clusters + 1 {
            let (sector, offset) = self.fat_entry_location(cluster);
            let mut sector_buf = [0u8; 512];
            blockdev::read(&self.device, sector, 1, &mut sector_buf)?;
            let raw = u32::from_le_bytes(sector_buf[offset..offset + 4].try_into().unwrap()) & FAT_ENTRY_MASK;
            if raw == 0 {
                self.set_entry(cluster, END_OF_CHAIN)?;
                return Ok(cluster);
            }
        }
        Err(KernelError::FsError(FsError::IoError))
    }

    fn free_chain(&self, start: u32) -> KernelResult<()> {
        let _guard = self.alloc_lock.lock();
        let mut cluster = start;
        while cluster >= 2 {
            let next = self.next_cluster(cluster)?;
            self.set_entry(cluster, 0)?;
            match next {
                Some(n) => cluster = n,
                None => break,
            }
        }
        Ok(())
    }

    /// Visit every occupied directory slot starting at `dir_cluster`,
    /// stopping at the first end-of-entries marker or when `visit` asks to
    /// break.
    fn scan_dir(
        &self,
        dir_cluster: u32,
        mut visit: impl FnMut(u32, usize, RawDirEntry) -> KernelResult<ControlFlow<()>>,
    ) -> KernelResult<()> {
        let mut cluster = dir_cluster;
        let entries_per_cluster = (self.cluster_size / 32) as usize;
        loop {
            let mut buf = vec![0u8; self.cluster_size as usize];
            self.read_cluster(cluster, &mut buf)?;
            for slot in 0..entries_per_cluster {
                let offset = slot * 32;
                let raw = RawDirEntry::from_bytes(&buf[offset..offset + 32]);
                if raw.is_end() {
                    return Ok(());
                }
                if let ControlFlow::Break(()) = visit(cluster, offset, raw)? {
                    return Ok(());
                }
            }
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
    }

    fn lookup_in_dir(&self, dir_cluster: u32, name: &str) -> KernelResult<NodeInfo> {
        let target = name_to_83(name)?;
        let mut found = None;
        self.scan_dir(dir_cluster, |cluster, offset, raw| {
            if !raw.is_free() && !raw.is_lfn_or_volume() && raw.name == target {
                found = Some(NodeInfo {
                    first_cluster: raw.first_cluster(),
                    entry_cluster: cluster,
                    entry_offset: offset,
                    is_dir: raw.is_directory(),
                    size: raw.file_size,
                });
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        found.ok_or(KernelError::FsError(FsError::NotFound))
    }

    fn find_free_slot(&self, dir_cluster: u32) -> KernelResult<Option<(u32, usize)>> {
        let mut cluster = dir_cluster;
        let entries_per_cluster = (self.cluster_size / 32) as usize;
        loop {
            let mut buf = vec![0u8; self.cluster_size as usize];
            self.read_cluster(cluster, &mut buf)?;
            for slot in 0..entries_per_cluster {
                let offset = slot * 32;
                if buf[offset] == 0x00 || buf[offset] == 0xE5 {
                    return Ok(Some((cluster, offset)));
                }
            }
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(None),
            }
        }
    }

    fn write_entry(&self, entry_cluster: u32, entry_offset: usize, name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> KernelResult<()> {
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.read_cluster(entry_cluster, &mut buf)?;
        RawDirEntry::write_to(&mut buf[entry_offset..entry_offset + 32], name, attr, cluster, size);
        self.write_cluster(entry_cluster, &buf)
    }

    fn mark_entry_deleted(&self, entry_cluster: u32, entry_offset: usize) -> KernelResult<()> {
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.read_cluster(entry_cluster, &mut buf)?;
        buf[entry_offset] = 0xE5;
        self.write_cluster(entry_cluster, &buf)
    }

    fn update_entry_cluster(&self, entry_cluster: u32, entry_offset: usize, new_cluster: u32) -> KernelResult<()> {
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.read_cluster(entry_cluster, &mut buf)?;
        buf[entry_offset + 20..entry_offset + 22].copy_from_slice(&((new_cluster >> 16) as u16).to_le_bytes());
        buf[entry_offset + 26..entry_offset + 28].copy_from_slice(&(new_cluster as u16).to_le_bytes());
        self.write_cluster(entry_cluster, &buf)
    }

    fn update_entry_size(&self, entry_cluster: u32, entry_offset: usize, new_size: u32) -> KernelResult<()> {
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.read_cluster(entry_cluster, &mut buf)?;
        buf[entry_offset + 28..entry_offset + 32].copy_from_slice(&new_size.to_le_bytes());
        self.write_cluster(entry_cluster, &buf)
    }

    fn create_in_dir(&self, dir_cluster: u32, name: &str, node_type: NodeType) -> KernelResult<NodeInfo> {
        let packed_name = name_to_83(name)?;
        if self.lookup_in_dir(dir_cluster, name).is_ok() {
            return Err(KernelError::FsError(FsError::AlreadyExists));
        }

        let data_cluster = self.allocate_cluster()?;
        if node_type == NodeType::Directory {
            let zeros = vec![0u8; self.cluster_size as usize];
            self.write_cluster(data_cluster, &zeros)?;
        }

        let (entry_cluster, entry_offset) = match self.find_free_slot(dir_cluster)? {
            Some(loc) => loc,
            None => {
                let mut last = dir_cluster;
                while let Some(next) = self.next_cluster(last)? {
                    last = next;
                }
                let new_cluster = self.allocate_cluster()?;
                self.set_entry(last, new_cluster)?;
                let zeros = vec![0u8; self.cluster_size as usize];
                self.write_cluster(new_cluster, &zeros)?;
                (new_cluster, 0)
            }
        };

        let attr = if node_type == NodeType::Directory { ATTR_DIRECTORY } else { 0 };
        self.write_entry(entry_cluster, entry_offset, &packed_name, attr, data_cluster, 0)?;

        Ok(NodeInfo { first_cluster: data_cluster, entry_cluster, entry_offset, is_dir: node_type == NodeType::Directory, size: 0 })
    }

    fn unlink_in_dir(&self, dir_cluster: u32, name: &str) -> KernelResult<()> {
        let info = self.lookup_in_dir(dir_cluster, name)?;
        if info.is_dir {
            return Err(KernelError::FsError(FsError::IsADirectory));
        }
        if info.first_cluster >= 2 {
            self.free_chain(info.first_cluster)?;
        }
        self.mark_entry_deleted(info.entry_cluster, info.entry_offset)
    }

    fn rmdir_in_dir(&self, dir_cluster: u32, name: &str) -> KernelResult<()> {
        let info = self.lookup_in_dir(dir_cluster, name)?;
        if !info.is_dir {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let mut non_empty = false;
        self.scan_dir(info.first_cluster, |_c, _o, raw| {
            if raw.is_free() || raw.is_lfn_or_volume() {
                Ok(ControlFlow::Continue(()))
            } else {
                non_empty = true;
                Ok(ControlFlow::Break(()))
            }
        })?;
        if non_empty {
            return Err(KernelError::FsError(FsError::DirectoryNotEmpty));
        }
        if info.first_cluster >= 2 {
            self.free_chain(info.first_cluster)?;
        }
        self.mark_entry_deleted(info.entry_cluster, info.entry_offset)
    }

    fn read_data(&self, first_cluster: u32, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        if first_cluster < 2 || buf.is_empty() {
            return Ok(0);
        }
        let cluster_size = self.cluster_size as u64;
        let mut cluster = first_cluster;
        let mut skip = offset / cluster_size;
        while skip > 0 {
            cluster = match self.next_cluster(cluster)? {
                Some(next) => next,
                None => return Ok(0),
            };
            skip -= 1;
        }

        let mut cluster_buf = vec![0u8; self.cluster_size as usize];
        let mut written = 0usize;
        let mut intra_offset = (offset % cluster_size) as usize;
        loop {
            self.read_cluster(cluster, &mut cluster_buf)?;
            let available = cluster_buf.len() - intra_offset;
            let take = core::cmp::min(available, buf.len() - written);
            buf[written..written + take].copy_from_slice(&cluster_buf[intra_offset..intra_offset + take]);
            written += take;
            intra_offset = 0;
            if written >= buf.len() {
                break;
            }
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }
        Ok(written)
    }

    /// Returns bytes written and the (possibly newly-allocated) first
    /// cluster of the chain.
    fn write_data(&self, first_cluster: u32, offset: u64, buf: &[u8]) -> KernelResult<(usize, u32)> {
        if buf.is_empty() {
            return Ok((0, first_cluster));
        }
        let cluster_size = self.cluster_size as u64;
        let mut first_cluster = first_cluster;
        if first_cluster < 2 {
            first_cluster = self.allocate_cluster()?;
        }

        let mut cluster = first_cluster;
        let mut skip = offset / cluster_size;
        while skip > 0 {
            cluster = match self.next_cluster(cluster)? {
                Some(next) => next,
                None => {
                    let new_cluster = self.allocate_cluster()?;
                    self.set_entry(cluster, new_cluster)?;
                    new_cluster
                }
            };
            skip -= 1;
        }

        let mut cluster_buf = vec![0u8; self.cluster_size as usize];
        let mut written = 0usize;
        let mut intra_offset = (offset % cluster_size) as usize;
        loop {
            self.read_cluster(cluster, &mut cluster_buf)?;
            let available = cluster_buf.len() - intra_offset;
            let take = core::cmp::min(available, buf.len() - written);
            cluster_buf[intra_offset..intra_offset + take].copy_from_slice(&buf[written..written + take]);
            self.write_cluster(cluster, &cluster_buf)?;
            written += take;
            intra_offset = 0;
            if written >= buf.len() {
                break;
            }
            cluster = match self.next_cluster(cluster)? {
                Some(next) => next,
                None => {
                    let new_cluster = self.allocate_cluster()?;
                    self.set_entry(cluster, new_cluster)?;
                    new_cluster
                }
            };
        }
        Ok((written, first_cluster))
    }

    fn readdir_in_dir(&self, dir_cluster: u32, offset: u64, max: usize) -> KernelResult<(Vec<DirEntry>, u64)> {
        let start_slot = (offset / 32) as u64;
        let mut entries = Vec::new();
        let mut slot_index = 0u64;
        let mut consumed = 0u64;
        self.scan_dir(dir_cluster, |_cluster, _offset, raw| {
            if slot_index < start_slot {
                slot_index += 1;
                return Ok(ControlFlow::Continue(()));
            }
            slot_index += 1;
            consumed += 1;
            if !raw.is_free() && !raw.is_lfn_or_volume() {
                entries.push(DirEntry {
                    name: name_from_83(&raw.name),
                    node_type: if raw.is_directory() { NodeType::Directory } else { NodeType::File },
                });
            }
            if entries.len() >= max {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })?;
        Ok((entries, (start_slot + consumed) * 32))
    }
}

struct Fat32NodeState {
    first_cluster: u32,
    size: u64,
}

/// One VFS node backed by a FAT32 entry. `entry_cluster`/`entry_offset`
/// locate the 32-byte directory slot this node was found at (unused, and
/// zero, for the root directory, which has no entry of its own).
struct Fat32Inode {
    fs: Arc<Fat32Fs>,
    state: Mutex<Fat32NodeState>,
    entry_cluster: u32,
    entry_offset: usize,
    is_root: bool,
    node_type: NodeType,
}

impl Inode for Fat32Inode {
    fn metadata(&self) -> KernelResult<Metadata> {
        let state = self.state.lock();
        Ok(Metadata {
            size: state.size,
            node_type: self.node_type,
            mode: if self.node_type == NodeType::Directory { 0o755 } else { 0o644 },
        })
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>> {
        if self.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let dir_cluster = self.state.lock().first_cluster;
        let info = self.fs.lookup_in_dir(dir_cluster, name)?;
        Ok(Arc::new(Fat32Inode {
            fs: self.fs.clone(),
            state: Mutex::new(Fat32NodeState { first_cluster: info.first_cluster, size: info.size as u64 }),
            entry_cluster: info.entry_cluster,
            entry_offset: info.entry_offset,
            is_root: false,
            node_type: if info.is_dir { NodeType::Directory } else { NodeType::File },
        }))
    }

    fn create(&self, name: &str, node_type: NodeType, _mode: u32) -> KernelResult<Arc<dyn Inode>> {
        if self.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let dir_cluster = self.state.lock().first_cluster;
        let info = self.fs.create_in_dir(dir_cluster, name, node_type)?;
        Ok(Arc::new(Fat32Inode {
            fs: self.fs.clone(),
            state: Mutex::new(Fat32NodeState { first_cluster: info.first_cluster, size: 0 }),
            entry_cluster: info.entry_cluster,
            entry_offset: info.entry_offset,
            is_root: false,
            node_type,
        }))
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        if self.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let dir_cluster = self.state.lock().first_cluster;
        self.fs.unlink_in_dir(dir_cluster, name)
    }

    fn rmdir(&self, name: &str) -> KernelResult<()> {
        if self.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let dir_cluster = self.state.lock().first_cluster;
        self.fs.rmdir_in_dir(dir_cluster, name)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        if self.node_type == NodeType::Directory {
            return Err(KernelError::FsError(FsError::IsADirectory));
        }
        let state = self.state.lock();
        if offset >= state.size {
            return Ok(0);
        }
        let to_read = core::cmp::min(buf.len() as u64, state.size - offset) as usize;
        self.fs.read_data(state.first_cluster, offset, &mut buf[..to_read])
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        if self.node_type == NodeType::Directory {
            return Err(KernelError::FsError(FsError::IsADirectory));
        }
        let mut state = self.state.lock();
        let was_empty = state.first_cluster < 2;
        let (written, first_cluster) = self.fs.write_data(state.first_cluster, offset, buf)?;
        if was_empty && first_cluster >= 2 && !self.is_root {
            self.fs.update_entry_cluster(self.entry_cluster, self.entry_offset, first_cluster)?;
        }
        state.first_cluster = first_cluster;
        let new_end = offset + written as u64;
        if new_end > state.size {
            state.size = new_end;
            if !self.is_root {
                self.fs.update_entry_size(self.entry_cluster, self.entry_offset, new_end as u32)?;
            }
        }
        Ok(written)
    }

    fn readdir(&self, offset: u64, max: usize) -> KernelResult<(Vec<DirEntry>, u64)> {
        if self.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        let dir_cluster = self.state.lock().first_cluster;
        self.fs.readdir_in_dir(dir_cluster, offset, max)
    }

    fn truncate(&self, size: u64) -> KernelResult<()> {
        if self.node_type == NodeType::Directory {
            return Err(KernelError::FsError(FsError::IsADirectory));
        }
        self.state.lock().size = size;
        Ok(())
    }
}

/// Read sector 0, validate the boot sector, and build the filesystem's
/// root node.
pub fn mount(dev: &str, _flags: u32) -> KernelResult<Superblock> {
    let mut sector = [0u8; 512];
    blockdev::read(dev, 0, 1, &mut sector)?;

    let mut boot = BootSector::zero();
    let struct_size = core::mem::size_of::<BootSector>();
    if struct_size > sector.len() {
        return Err(KernelError::Corruption { structure: "fat32_boot_sector", detail: "struct_size_exceeds_sector" });
    }
    // SAFETY: `struct_size` was just checked not to exceed `sector`'s 512
    // bytes, so this copies only the boot-sector struct's own fields —
    // copying the full sector into a (smaller) struct would overrun it.
    unsafe {
        core::ptr::copy_nonoverlapping(sector.as_ptr(), &mut boot as *mut BootSector as *mut u8, struct_size);
    }

    if boot.bytes_per_sector != 512 {
        return Err(KernelError::FsError(FsError::UnknownFsType));
    }
    if boot.root_entries != 0 || boot.total_sectors_16 != 0 || boot.fat_size_16 != 0 {
        return Err(KernelError::FsError(FsError::UnknownFsType));
    }
    if boot.sectors_per_cluster == 0 || boot.num_fats == 0 {
        return Err(KernelError::FsError(FsError::UnknownFsType));
    }

    let fat_offset = boot.reserved_sectors as u32;
    let data_offset = fat_offset + boot.num_fats as u32 * boot.fat_size_32;
    if boot.total_sectors_32 <= data_offset {
        return Err(KernelError::FsError(FsError::UnknownFsType));
    }
    let total_clusters = (boot.total_sectors_32 - data_offset) / boot.sectors_per_cluster as u32;
    let cluster_size = boot.bytes_per_sector as u32 * boot.sectors_per_cluster as u32;

    let fs = Arc::new(Fat32Fs {
        device: dev.to_string(),
        sectors_per_cluster: boot.sectors_per_cluster,
        num_fats: boot.num_fats,
        fat_size_32: boot.fat_size_32,
        fat_offset,
        data_offset,
        total_clusters,
        cluster_size,
        alloc_lock: Mutex::new(()),
    });

    let root = Arc::new(Fat32Inode {
        fs,
        state: Mutex::new(Fat32NodeState { first_cluster: boot.root_cluster, size: 0 }),
        entry_cluster: 0,
        entry_offset: 0,
        is_root: true,
        node_type: NodeType::Directory,
    });

    Ok(Superblock { fs_type: "fat32", root })
}

pub fn unmount(_sb: &Superblock) -> KernelResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::{BlockDevice, DEFAULT_SECTOR_SIZE};

    struct RamDisk {
        sectors: Mutex<Vec<u8>>,
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

    /// One reserved sector, one FAT sector, 16 one-sector data clusters.
    fn format_test_image(device_name: &str) {
        const TOTAL_SECTORS: u32 = 18;
        let mut image = vec![0u8; TOTAL_SECTORS as usize * DEFAULT_SECTOR_SIZE];

        image[11..13].copy_from_slice(&512u16.to_le_bytes()); // bytes_per_sector
        image[13] = 1; // sectors_per_cluster
        image[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved_sectors
        image[16] = 1; // num_fats
        image[32..36].copy_from_slice(&TOTAL_SECTORS.to_le_bytes()); // total_sectors_32
        image[36..40].copy_from_slice(&1u32.to_le_bytes()); // fat_size_32
        image[44..48].copy_from_slice(&2u32.to_le_bytes()); // root_cluster

        // FAT sector (sector 1): mark the root cluster (2) end-of-chain.
        let fat_sector_start = 512;
        image[fat_sector_start + 8..fat_sector_start + 12].copy_from_slice(&END_OF_CHAIN.to_le_bytes());

        blockdev::register(device_name, Arc::new(RamDisk { sectors: Mutex::new(image) })).unwrap();
    }

    #[test_case]
    fn name_round_trips_through_83_form() {
        let packed = name_to_83("readme.txt").unwrap();
        assert_eq!(name_from_83(&packed), "readme.txt");
        let packed_no_ext = name_to_83("bin").unwrap();
        assert_eq!(name_from_83(&packed_no_ext), "bin");
    }

    #[test_case]
    fn rejects_reserved_characters() {
        assert!(name_to_83("bad:name").is_err());
    }

    #[test_case]
    fn mount_create_write_read_lookup_unlink_round_trip() {
        format_test_image("fat32test0");
        let sb = mount("fat32test0", 0).unwrap();

        let file = sb.root.create("hello.txt", NodeType::File, 0o644).unwrap();
        assert_eq!(file.write_at(0, b"hi there").unwrap(), 8);

        let found = sb.root.lookup("hello.txt").unwrap();
        assert_eq!(found.metadata().unwrap().size, 8);
        let mut buf = [0u8; 8];
        assert_eq!(found.read_at(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"hi there");

        sb.root.unlink("hello.txt").unwrap();
        assert!(sb.root.lookup("hello.txt").is_err());
    }

    #[test_case]
    fn mkdir_then_rmdir_round_trip() {
        format_test_image("fat32test1");
        let sb = mount("fat32test1", 0).unwrap();

        sb.root.create("sub", NodeType::Directory, 0o755).unwrap();
        let sub = sb.root.lookup("sub").unwrap();
        assert_eq!(sub.metadata().unwrap().node_type, NodeType::Directory);

        sb.root.rmdir("sub").unwrap();
        assert!(sb.root.lookup("sub").is_err());
    }
}
