//! Interactive text shell: a line editor over the keyboard ring buffer,
//! dispatched against a small builtin command table that exercises the VFS.
//!
//! The exact command set is intentionally minimal — this shell exists to
//! drive the rest of the kernel end-to-end from a keyboard, not to be a
//! real user-space program.

use alloc::{string::String, vec::Vec};

use crate::drivers::keyboard;
use crate::fs;

const LINE_BUFFER_CAPACITY: usize = 256;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;

/// Block until a decoded byte is available, without busy-spinning the CPU
/// in a tight loop — `hlt` wakes on the next interrupt (the keyboard's, if
/// nothing else fires first).
fn read_byte() -> u8 {
    loop {
        if let Some(byte) = keyboard::getchar() {
            return byte;
        }
        crate::arch::x86_64::idle();
    }
}

/// Read one line, echoing each character and honouring backspace. Returns
/// the line without its trailing newline.
fn read_line() -> String {
    let mut line = String::with_capacity(LINE_BUFFER_CAPACITY);
    loop {
        let byte = read_byte();
        match byte {
            b'\n' | b'\r' => {
                crate::println!();
                return line;
            }
            BACKSPACE | DELETE => {
                if line.pop().is_some() {
                    crate::print!("\u{8} \u{8}");
                }
            }
            _ if line.len() < LINE_BUFFER_CAPACITY && byte.is_ascii() => {
                line.push(byte as char);
                crate::print!("{}", byte as char);
            }
            _ => {}
        }
    }
}

fn run_ls(args: &[&str]) {
    let path = args.first().copied().unwrap_or(".");
    let resolved = if path == "." { fs::get_cwd() } else { String::from(path) };
    let fd = match fs::open(&resolved, fs::flags::RDONLY | fs::flags::DIRECTORY, 0) {
        Ok(fd) => fd,
        Err(e) => {
            crate::println!("ls: {}: {}", path, e);
            return;
        }
    };
    loop {
        match fs::readdir(fd, 32) {
            Ok(entries) if entries.is_empty() => break,
            Ok(entries) => {
                for entry in entries {
                    let marker = if entry.node_type == fs::NodeType::Directory { "/" } else { "" };
                    crate::println!("{}{}", entry.name, marker);
                }
            }
            Err(e) => {
                crate::println!("ls: {}: {}", path, e);
                break;
            }
        }
    }
    let _ = fs::close(fd);
}

fn run_cat(args: &[&str]) {
    let Some(path) = args.first() else {
        crate::println!("usage: cat <path>");
        return;
    };
    let fd = match fs::open(path, fs::flags::RDONLY, 0) {
        Ok(fd) => fd,
        Err(e) => {
            crate::println!("cat: {}: {}", path, e);
            return;
        }
    };
    let mut buf = [0u8; 128];
    loop {
        match fs::read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(s) = core::str::from_utf8(&buf[..n]) {
                    crate::print!("{}", s);
                } else {
                    crate::println!("cat: {}: not valid utf-8", path);
                    break;
                }
            }
            Err(e) => {
                crate::println!("cat: {}: {}", path, e);
                break;
            }
        }
    }
    let _ = fs::close(fd);
}

fn run_write(args: &[&str]) {
    let Some((&path, text_parts)) = args.split_first() else {
        crate::println!("usage: write <path> <text>");
        return;
    };
    let text = text_parts.join(" ");
    let open_flags = fs::flags::WRONLY | fs::flags::CREAT | fs::flags::TRUNC;
    let fd = match fs::open(path, open_flags, 0o644) {
        Ok(fd) => fd,
        Err(e) => {
            crate::println!("write: {}: {}", path, e);
            return;
        }
    };
    if let Err(e) = fs::write(fd, text.as_bytes()) {
        crate::println!("write: {}: {}", path, e);
    }
    let _ = fs::close(fd);
}

fn run_mkdir(args: &[&str]) {
    let Some(path) = args.first() else {
        crate::println!("usage: mkdir <path>");
        return;
    };
    if let Err(e) = fs::mkdir(path, 0o755) {
        crate::println!("mkdir: {}: {}", path, e);
    }
}

fn run_rmdir(args: &[&str]) {
    let Some(path) = args.first() else {
        crate::println!("usage: rmdir <path>");
        return;
    };
    if let Err(e) = fs::rmdir(path) {
        crate::println!("rmdir: {}: {}", path, e);
    }
}

fn run_rm(args: &[&str]) {
    let Some(path) = args.first() else {
        crate::println!("usage: rm <path>");
        return;
    };
    if let Err(e) = fs::unlink(path) {
        crate::println!("rm: {}: {}", path, e);
    }
}

fn run_cd(args: &[&str]) {
    let path = args.first().copied().unwrap_or("/");
    if let Err(e) = fs::set_cwd(path) {
        crate::println!("cd: {}: {}", path, e);
    }
}

fn run_pwd() {
    crate::println!("{}", fs::get_cwd());
}

fn run_help() {
    crate::println!("commands: ls cat write mkdir rmdir rm cd pwd help");
}

fn dispatch(line: &str) {
    let mut tokens = line.split_whitespace();
    let Some(command) = tokens.next() else { return };
    let args: Vec<&str> = tokens.collect();

    match command {
        "ls" => run_ls(&args),
        "cat" => run_cat(&args),
        "write" | "echo" => run_write(&args),
        "mkdir" => run_mkdir(&args),
        "rmdir" => run_rmdir(&args),
        "rm" => run_rm(&args),
        "cd" => run_cd(&args),
        "pwd" => run_pwd(),
        "help" => run_help(),
        other => crate::println!("{}: command not found", other),
    }
}

/// Run the shell's read-dispatch loop forever. Never returns; this is the
/// kernel's idle activity once boot finishes.
pub fn run() -> ! {
    crate::println!("kernel shell ready, type 'help' for commands");
    loop {
        crate::print!("{}> ", fs::get_cwd());
        let line = read_line();
        if !line.trim().is_empty() {
            dispatch(&line);
        }
    }
}
