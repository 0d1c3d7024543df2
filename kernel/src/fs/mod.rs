//! Virtual filesystem: a single namespace over pluggable filesystem
//! drivers, a longest-prefix-match mount table, and a fixed-size
//! file-descriptor table.
//!
//! Path resolution never holds the VFS lock across a filesystem call —
//! driver methods (`lookup`, `create`, ...) are given their own locking
//! inside the FAT32 layer. Intermediate nodes produced mid-walk are plain
//! `Arc<dyn Inode>`s, freed by Rust's own reference counting once the walk
//! moves past them or the caller drops the final node.

pub mod blockdev;
pub mod fat32;
pub mod file;

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

pub use file::{can_read, can_write, flags, File, FileDescriptor, FileTable, SeekFrom, MAX_OPEN_FILES};

use crate::error::{FsError, KernelError, KernelResult};
use crate::sync::IrqSpinlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn d_type(self) -> u8 {
        match self {
            NodeType::File => 1,
            NodeType::Directory => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub size: u64,
    pub node_type: NodeType,
    pub mode: u32,
}

pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
}

/// One file or directory, as surfaced by a filesystem driver. Nodes are
/// produced fresh by `lookup`/`create`; the resolver owns every
/// intermediate node it walks through except the mount root, which the
/// mount table owns for the mount's lifetime.
pub trait Inode: Send + Sync {
    fn metadata(&self) -> KernelResult<Metadata>;

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>>;

    fn create(&self, name: &str, node_type: NodeType, mode: u32) -> KernelResult<Arc<dyn Inode>>;

    fn unlink(&self, name: &str) -> KernelResult<()>;

    fn rmdir(&self, name: &str) -> KernelResult<()>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize>;

    fn write_at(&self, offset: u64, buf: &[u8]) -> KernelResult<usize>;

    fn readdir(&self, offset: u64, max: usize) -> KernelResult<(Vec<DirEntry>, u64)>;

    /// Shrink or grow the node's logical size without touching its data.
    /// Only `O_TRUNC` needs this; filesystems that can't support it return
    /// `FsError::NotSupported`.
    fn truncate(&self, _size: u64) -> KernelResult<()> {
        Err(KernelError::FsError(FsError::NotSupported))
    }
}

/// A mounted filesystem instance.
pub struct Superblock {
    pub fs_type: &'static str,
    pub root: Arc<dyn Inode>,
}

type MountFn = fn(dev: &str, flags: u32) -> KernelResult<Superblock>;
type UnmountFn = fn(&Superblock) -> KernelResult<()>;

struct FsTypeEntry {
    name: &'static str,
    mount_fn: MountFn,
    unmount_fn: UnmountFn,
}

struct MountEntry {
    mountpoint: String,
    superblock: Superblock,
}

struct VfsState {
    fs_types: Vec<FsTypeEntry>,
    mounts: Vec<MountEntry>,
    cwd: String,
}

static STATE: IrqSpinlock<VfsState> = IrqSpinlock::new(VfsState {
    fs_types: Vec::new(),
    mounts: Vec::new(),
    cwd: String::new(),
});

static FD_TABLE: IrqSpinlock<FileTable> = IrqSpinlock::new(FileTable::new());

/// Register a filesystem driver under `name`. Rejects a duplicate name.
pub fn register_fs(name: &'static str, mount_fn: MountFn, unmount_fn: UnmountFn) -> KernelResult<()> {
    let mut state = STATE.lock();
    if state.fs_types.iter().any(|e| e.name == name) {
        return Err(KernelError::FsError(FsError::AlreadyExists));
    }
    state.fs_types.push(FsTypeEntry { name, mount_fn, unmount_fn });
    Ok(())
}

/// Mount `dev` at `mountpoint` using the registered `fstype` driver. If
/// mounting at `/` and no CWD is set yet, the CWD becomes `/`.
pub fn mount(dev: &str, mountpoint: &str, fstype: &str, mount_flags: u32) -> KernelResult<()> {
    let mut state = STATE.lock();
    if state.mounts.iter().any(|m| m.mountpoint == mountpoint) {
        return Err(KernelError::FsError(FsError::AlreadyMounted));
    }
    let mount_fn = state
        .fs_types
        .iter()
        .find(|e| e.name == fstype)
        .map(|e| e.mount_fn)
        .ok_or(KernelError::FsError(FsError::UnknownFsType))?;
    let superblock = mount_fn(dev, mount_flags)?;
    state.mounts.push(MountEntry { mountpoint: mountpoint.to_string(), superblock });
    if mountpoint == "/" && state.cwd.is_empty() {
        state.cwd = String::from("/");
    }
    Ok(())
}

/// Unmount the filesystem at `mountpoint`.
pub fn unmount(mountpoint: &str) -> KernelResult<()> {
    let mut state = STATE.lock();
    let index = state
        .mounts
        .iter()
        .position(|m| m.mountpoint == mountpoint)
        .ok_or(KernelError::FsError(FsError::NotMounted))?;
    let unmount_fn = state
        .fs_types
        .iter()
        .find(|e| e.name == state.mounts[index].superblock.fs_type)
        .map(|e| e.unmount_fn)
        .ok_or(KernelError::FsError(FsError::UnknownFsType))?;
    unmount_fn(&state.mounts[index].superblock)?;
    state.mounts.remove(index);
    Ok(())
}

fn prefix_matches(mountpoint: &str, path: &str) -> bool {
    if mountpoint == "/" {
        return true;
    }
    path.len() >= mountpoint.len()
        && path.starts_with(mountpoint)
        && path.as_bytes().get(mountpoint.len()).copied().map_or(true, |b| b == b'/')
}

fn split_mount(state: &VfsState, path: &str) -> KernelResult<(Arc<dyn Inode>, String)> {
    let mount = state
        .mounts
        .iter()
        .filter(|m| prefix_matches(&m.mountpoint, path))
        .max_by_key(|m| m.mountpoint.len())
        .ok_or(KernelError::FsError(FsError::NoRootFs))?;
    let residual = if mount.mountpoint == "/" {
        path.trim_start_matches('/').to_string()
    } else {
        path[mount.mountpoint.len()..].trim_start_matches('/').to_string()
    };
    Ok((mount.superblock.root.clone(), residual))
}

/// Walk `residual`'s tokens from `root`, honouring `.`/`..`. `..` never pops
/// past `root` itself.
fn walk(root: Arc<dyn Inode>, residual: &str) -> KernelResult<Arc<dyn Inode>> {
    let mut stack: Vec<Arc<dyn Inode>> = vec![root];
    for token in residual.split('/').filter(|t| !t.is_empty()) {
        match token {
            "." => {}
            ".." => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            name => {
                let next = stack.last().expect("walk stack never empties").lookup(name)?;
                stack.push(next);
            }
        }
    }
    Ok(stack.pop().expect("walk stack never empties"))
}

fn to_absolute(path: &str) -> KernelResult<String> {
    if path.starts_with('/') {
        return Ok(path.to_string());
    }
    let cwd = STATE.lock().cwd.clone();
    if cwd.is_empty() {
        return Err(KernelError::FsError(FsError::NoRootFs));
    }
    if cwd == "/" {
        Ok(format!("/{}", path))
    } else {
        Ok(format!("{}/{}", cwd, path))
    }
}

/// Resolve `path` (absolute or relative to the CWD) to its node.
pub fn resolve(path: &str) -> KernelResult<Arc<dyn Inode>> {
    let absolute = to_absolute(path)?;
    let (root, residual) = {
        let state = STATE.lock();
        split_mount(&state, &absolute)?
    };
    walk(root, &residual)
}

/// Split `path` into its parent directory path and final component.
fn split_path(path: &str) -> KernelResult<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(KernelError::FsError(FsError::InvalidPath));
    }
    match trimmed.rfind('/') {
        Some(0) => Ok((String::from("/"), trimmed[1..].to_string())),
        Some(idx) => Ok((trimmed[..idx].to_string(), trimmed[idx + 1..].to_string())),
        None => Ok((get_cwd(), trimmed.to_string())),
    }
}

fn check_access(mode: u32, want_read: bool, want_write: bool) -> KernelResult<()> {
    let granted = (!want_read || mode & 0o400 != 0) && (!want_write || mode & 0o200 != 0);
    if granted {
        Ok(())
    } else {
        Err(KernelError::FsError(FsError::PermissionDenied))
    }
}

fn resolve_or_create(path: &str, raw_flags: u32, mode: u32) -> KernelResult<Arc<dyn Inode>> {
    match resolve(path) {
        Ok(node) if raw_flags & flags::CREAT != 0 && raw_flags & flags::EXCL != 0 => {
            let _ = node;
            Err(KernelError::FsError(FsError::AlreadyExists))
        }
        Ok(node) => Ok(node),
        Err(KernelError::FsError(FsError::NotFound)) if raw_flags & flags::CREAT != 0 => {
            let (dir_path, name) = split_path(path)?;
            let dir = resolve(&dir_path)?;
            let node_type = if raw_flags & flags::DIRECTORY != 0 { NodeType::Directory } else { NodeType::File };
            dir.create(&name, node_type, mode)
        }
        Err(e) => Err(e),
    }
}

/// Resolve (creating if `CREAT` is set) and open `path`, returning a new fd.
pub fn open(path: &str, raw_flags: u32, mode: u32) -> KernelResult<FileDescriptor> {
    let node = resolve_or_create(path, raw_flags, mode)?;
    let meta = node.metadata()?;

    if raw_flags & flags::DIRECTORY != 0 && meta.node_type != NodeType::Directory {
        return Err(KernelError::FsError(FsError::NotADirectory));
    }
    if meta.node_type == NodeType::Directory && can_write(raw_flags) {
        return Err(KernelError::FsError(FsError::IsADirectory));
    }
    check_access(meta.mode, can_read(raw_flags), can_write(raw_flags))?;

    if raw_flags & flags::TRUNC != 0 && can_write(raw_flags) {
        node.truncate(0)?;
    }

    let file = Arc::new(File::new(node, raw_flags));
    FD_TABLE.lock().alloc_fd(file)
}

pub fn close(fd: FileDescriptor) -> KernelResult<()> {
    FD_TABLE.lock().free_fd(fd)
}

pub fn read(fd: FileDescriptor, buf: &mut [u8]) -> KernelResult<usize> {
    FD_TABLE.lock().get(fd)?.read(buf)
}

pub fn write(fd: FileDescriptor, buf: &[u8]) -> KernelResult<usize> {
    FD_TABLE.lock().get(fd)?.write(buf)
}

pub fn lseek(fd: FileDescriptor, from: SeekFrom) -> KernelResult<u64> {
    FD_TABLE.lock().get(fd)?.seek(from)
}

pub fn stat(path: &str) -> KernelResult<Metadata> {
    resolve(path)?.metadata()
}

pub fn fstat(fd: FileDescriptor) -> KernelResult<Metadata> {
    FD_TABLE.lock().get(fd)?.node.metadata()
}

pub fn readdir(fd: FileDescriptor, max: usize) -> KernelResult<Vec<DirEntry>> {
    FD_TABLE.lock().get(fd)?.readdir(max)
}

pub fn mkdir(path: &str, mode: u32) -> KernelResult<()> {
    let (dir_path, name) = split_path(path)?;
    let dir = resolve(&dir_path)?;
    dir.create(&name, NodeType::Directory, mode)?;
    Ok(())
}

pub fn rmdir(path: &str) -> KernelResult<()> {
    let (dir_path, name) = split_path(path)?;
    resolve(&dir_path)?.rmdir(&name)
}

pub fn unlink(path: &str) -> KernelResult<()> {
    let (dir_path, name) = split_path(path)?;
    resolve(&dir_path)?.unlink(&name)
}

pub fn get_cwd() -> String {
    STATE.lock().cwd.clone()
}

pub fn set_cwd(path: &str) -> KernelResult<()> {
    let absolute = to_absolute(path)?;
    let node = resolve(&absolute)?;
    if node.metadata()?.node_type != NodeType::Directory {
        return Err(KernelError::FsError(FsError::NotADirectory));
    }
    STATE.lock().cwd = absolute;
    Ok(())
}

/// Register the FAT32 driver and mount it at `/` from `device`.
pub fn init(device: &str) -> KernelResult<()> {
    register_fs("fat32", fat32::mount, fat32::unmount)?;
    mount(device, "/", "fat32", 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemDir {
        mode: u32,
    }

    impl Inode for MemDir {
        fn metadata(&self) -> KernelResult<Metadata> {
            Ok(Metadata { size: 0, node_type: NodeType::Directory, mode: self.mode })
        }
        fn lookup(&self, _name: &str) -> KernelResult<Arc<dyn Inode>> {
            Err(KernelError::FsError(FsError::NotFound))
        }
        fn create(&self, _name: &str, _node_type: NodeType, _mode: u32) -> KernelResult<Arc<dyn Inode>> {
            Err(KernelError::FsError(FsError::NotSupported))
        }
        fn unlink(&self, _name: &str) -> KernelResult<()> {
            Err(KernelError::FsError(FsError::NotSupported))
        }
        fn rmdir(&self, _name: &str) -> KernelResult<()> {
            Err(KernelError::FsError(FsError::NotSupported))
        }
        fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> KernelResult<usize> {
            Err(KernelError::FsError(FsError::IsADirectory))
        }
        fn write_at(&self, _offset: u64, _buf: &[u8]) -> KernelResult<usize> {
            Err(KernelError::FsError(FsError::IsADirectory))
        }
        fn readdir(&self, _offset: u64, _max: usize) -> KernelResult<(Vec<DirEntry>, u64)> {
            Ok((Vec::new(), 0))
        }
    }

    fn mount_mem(_dev: &str, _flags: u32) -> KernelResult<Superblock> {
        Ok(Superblock { fs_type: "memtest", root: Arc::new(MemDir { mode: 0o755 }) })
    }

    fn unmount_mem(_sb: &Superblock) -> KernelResult<()> {
        Ok(())
    }

    #[test_case]
    fn prefix_match_prefers_longest_mountpoint() {
        assert!(prefix_matches("/", "/foo/bar"));
        assert!(prefix_matches("/foo", "/foo/bar"));
        assert!(!prefix_matches("/foo", "/foobar"));
    }

    #[test_case]
    fn mount_root_sets_cwd() {
        register_fs("memtest", mount_mem, unmount_mem).ok();
        mount("ram0", "/", "memtest", 0).unwrap();
        assert_eq!(get_cwd(), "/");
        let root = resolve("/").unwrap();
        assert_eq!(root.metadata().unwrap().node_type, NodeType::Directory);
    }
}
