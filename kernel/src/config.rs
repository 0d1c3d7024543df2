//! Boot-time configuration.
//!
//! The only configuration surface this kernel has is the Multiboot2 command
//! line: there is no filesystem mounted yet when `arch::x86_64::multiboot`
//! hands the string to us, so a tokenized `key=value`/`key` view of it is
//! the whole story.

use log::LevelFilter;

/// A parsed view over the boot command line. Borrows the underlying string,
/// which itself borrows the Multiboot2 info block (valid for the kernel's
/// lifetime since the bootloader does not reclaim that memory).
pub struct BootConfig<'a> {
    raw: &'a str,
}

impl<'a> BootConfig<'a> {
    pub fn parse(raw: &'a str) -> Self {
        Self { raw }
    }

    pub fn empty() -> Self {
        Self { raw: "" }
    }

    fn tokens(&self) -> impl Iterator<Item = &'a str> {
        self.raw.split_whitespace()
    }

    /// Look up `key=value` and return `value`, or `None` if absent or bare.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.tokens().find_map(|tok| {
            let (k, v) = tok.split_once('=')?;
            if k == key {
                Some(v)
            } else {
                None
            }
        })
    }

    /// True if `key` appears as a bare token or `key=...`.
    pub fn has(&self, key: &str) -> bool {
        self.tokens()
            .any(|tok| tok == key || tok.split_once('=').is_some_and(|(k, _)| k == key))
    }

    /// `log=debug|info|warn|error|trace`, defaulting to `Info`.
    pub fn log_level(&self) -> LevelFilter {
        match self.get("log") {
            Some("trace") => LevelFilter::Trace,
            Some("debug") => LevelFilter::Debug,
            Some("warn") => LevelFilter::Warn,
            Some("error") => LevelFilter::Error,
            Some("off") => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    /// `root=<devname>` override of the default boot disk, defaulting to "hda".
    pub fn root_device(&self) -> &'a str {
        self.get("root").unwrap_or("hda")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn parses_key_value_tokens() {
        let cfg = BootConfig::parse("log=debug root=hdb quiet");
        assert_eq!(cfg.log_level(), LevelFilter::Debug);
        assert_eq!(cfg.root_device(), "hdb");
        assert!(cfg.has("quiet"));
        assert!(!cfg.has("verbose"));
    }

    #[test_case]
    fn defaults_when_empty() {
        let cfg = BootConfig::empty();
        assert_eq!(cfg.log_level(), LevelFilter::Info);
        assert_eq!(cfg.root_device(), "hda");
    }
}
