//! Filesystem and I/O syscalls.
//!
//! `read`/`write` special-case fd 0/1/2 to the keyboard ring buffer and the
//! VGA console before falling through to the VFS file table for every other
//! descriptor.

use crate::drivers::keyboard;
use crate::fs::{self, DirEntry, SeekFrom};

const STDIN: usize = 0;
const STDOUT: usize = 1;
const STDERR: usize = 2;
const MAX_PATH_LEN: usize = 4096;

/// Copy a NUL-terminated path string out of user space. The caller must
/// provide a valid, null-terminated string in mapped memory; this kernel
/// has no user/kernel address separation to validate against, so the only
/// defense is the length cap.
fn read_user_path(ptr: usize) -> Result<alloc::string::String, isize> {
    if ptr == 0 {
        return Err(-1);
    }
    // SAFETY: `ptr` is trusted to point at a null-terminated string, per
    // this syscall's contract; the loop never reads past MAX_PATH_LEN bytes.
    let bytes = unsafe {
        let mut bytes = alloc::vec::Vec::new();
        let mut cursor = ptr as *const u8;
        for _ in 0..MAX_PATH_LEN {
            let byte = *cursor;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cursor = cursor.add(1);
        }
        bytes
    };
    core::str::from_utf8(&bytes).map(alloc::string::ToString::to_string).map_err(|_| -1)
}

pub fn sys_open(path_ptr: usize, raw_flags: usize, mode: usize) -> isize {
    let path = match read_user_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match fs::open(&path, raw_flags as u32, mode as u32) {
        Ok(fd) => fd as isize,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_close(fd: usize) -> isize {
    match fs::close(fd) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_read(fd: usize, buf_ptr: usize, count: usize) -> isize {
    if buf_ptr == 0 {
        return -1;
    }
    // SAFETY: `buf_ptr` is trusted to reference a writable buffer of at
    // least `count` bytes, per this syscall's contract.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, count) };

    if fd == STDIN {
        let mut n = 0;
        while n < buf.len() {
            match keyboard::getchar() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                    if byte == b'\n' {
                        break;
                    }
                }
                None => break,
            }
        }
        return n as isize;
    }

    match fs::read(fd, buf) {
        Ok(n) => n as isize,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_write(fd: usize, buf_ptr: usize, count: usize) -> isize {
    if buf_ptr == 0 {
        return -1;
    }
    // SAFETY: `buf_ptr` is trusted to reference a readable buffer of at
    // least `count` bytes, per this syscall's contract.
    let buf = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, count) };

    if fd == STDOUT || fd == STDERR {
        match core::str::from_utf8(buf) {
            Ok(s) => {
                crate::print!("{}", s);
                buf.len() as isize
            }
            Err(_) => -1,
        }
    } else {
        match fs::write(fd, buf) {
            Ok(n) => n as isize,
            Err(e) => e.to_errno(),
        }
    }
}

pub fn sys_lseek(fd: usize, offset: isize, whence: usize) -> isize {
    let from = match whence {
        0 => SeekFrom::Start(offset as i64),
        1 => SeekFrom::Current(offset as i64),
        2 => SeekFrom::End(offset as i64),
        _ => return -1,
    };
    match fs::lseek(fd, from) {
        Ok(pos) => pos as isize,
        Err(e) => e.to_errno(),
    }
}

/// Matches the layout `sys_stat`/`sys_fstat` write into `buf_ptr`: 64-bit
/// size, 32-bit mode, zero-padded to 16 bytes.
#[repr(C)]
struct FileStat {
    size: u64,
    mode: u32,
    _reserved: u32,
}

fn write_stat(buf_ptr: usize, meta: fs::Metadata) -> isize {
    if buf_ptr == 0 {
        return -1;
    }
    // SAFETY: `buf_ptr` is trusted to reference a writable `FileStat`-sized
    // buffer, per this syscall's contract.
    let type_bits = match meta.node_type {
        fs::NodeType::Directory => 0o040000,
        fs::NodeType::File => 0o100000,
    };
    unsafe {
        let stat = &mut *(buf_ptr as *mut FileStat);
        stat.size = meta.size;
        stat.mode = meta.mode | type_bits;
        stat._reserved = 0;
    }
    0
}

pub fn sys_stat(path_ptr: usize, buf_ptr: usize) -> isize {
    let path = match read_user_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match fs::stat(&path) {
        Ok(meta) => write_stat(buf_ptr, meta),
        Err(e) => e.to_errno(),
    }
}

pub fn sys_fstat(fd: usize, buf_ptr: usize) -> isize {
    match fs::fstat(fd) {
        Ok(meta) => write_stat(buf_ptr, meta),
        Err(e) => e.to_errno(),
    }
}

pub fn sys_mkdir(path_ptr: usize, mode: usize) -> isize {
    let path = match read_user_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match fs::mkdir(&path, mode as u32) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_rmdir(path_ptr: usize) -> isize {
    let path = match read_user_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match fs::rmdir(&path) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_unlink(path_ptr: usize) -> isize {
    let path = match read_user_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    match fs::unlink(&path) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// One packed `dirent`: a u8 `d_type` followed by the name, NUL-terminated.
/// Entries are packed back to back into `buf_ptr` until the next one
/// wouldn't fit; returns the number of bytes written.
fn pack_dirents(buf: &mut [u8], entries: &[DirEntry]) -> usize {
    let mut written = 0;
    for entry in entries {
        let name_bytes = entry.name.as_bytes();
        let needed = 1 + name_bytes.len() + 1;
        if written + needed > buf.len() {
            break;
        }
        buf[written] = entry.node_type.d_type();
        written += 1;
        buf[written..written + name_bytes.len()].copy_from_slice(name_bytes);
        written += name_bytes.len();
        buf[written] = 0;
        written += 1;
    }
    written
}

pub fn sys_getdents(fd: usize, buf_ptr: usize, count: usize) -> isize {
    if buf_ptr == 0 {
        return -1;
    }
    // SAFETY: `buf_ptr` is trusted to reference a writable buffer of at
    // least `count` bytes, per this syscall's contract.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, count) };
    match fs::readdir(fd, 64) {
        Ok(entries) => pack_dirents(buf, &entries) as isize,
        Err(e) => e.to_errno(),
    }
}

