//! Boundary to the external VM engine.
//!
//! The engine (CPU, devices, serial console) lives outside this crate; the
//! build and restore pipelines consume exactly the capabilities named on
//! [`VmEngine`] and treat captured state as an opaque blob.

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;

/// Kernel command line used when the config does not override it.
pub const DEFAULT_CMDLINE: &[&str] = &["root=/dev/ram0", "rw", "init=/init", "console=ttyS0", "quiet"];

/// Opaque machine state produced by the engine's capture operation.
///
/// Nothing in this crate parses or branches on the contents; the blob is
/// compressed, persisted, fetched, and handed back to the engine unchanged.
pub struct StateBlob(Vec<u8>);

impl StateBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for StateBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the size; the contents are the engine's business.
        f.debug_struct("StateBlob").field("len", &self.0.len()).finish()
    }
}

/// Capabilities this crate consumes from the VM engine.
///
/// `serial_output` hands over the receiving end of the engine's serial byte
/// stream; the capture pipeline drains it one byte at a time. Input flows
/// the other way through `serial_send`.
pub trait VmEngine {
    fn run(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn capture_state(&mut self) -> Result<StateBlob>;
    fn restore_state(&mut self, state: StateBlob) -> Result<()>;
    fn serial_output(&mut self) -> Receiver<u8>;
    fn serial_send(&mut self, data: &[u8]) -> Result<()>;
}

/// Builder for the boot parameters an embedder needs to construct an
/// engine instance.
#[derive(Debug, Clone)]
pub struct BootOptions {
    memory_mb: u32,
    vga_memory_mb: u32,
    kernel: Option<PathBuf>,
    initrd: Option<PathBuf>,
    bios: Option<PathBuf>,
    vga_bios: Option<PathBuf>,
    cmdline: Vec<String>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            vga_memory_mb: 2,
            kernel: None,
            initrd: None,
            bios: None,
            vga_bios: None,
            cmdline: DEFAULT_CMDLINE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BootOptions {
    pub fn new(memory_mb: u32) -> Self {
        Self {
            memory_mb,
            ..Default::default()
        }
    }

    pub fn vga_memory_mb(mut self, mb: u32) -> Self {
        self.vga_memory_mb = mb;
        self
    }

    pub fn kernel(mut self, path: PathBuf) -> Self {
        self.kernel = Some(path);
        self
    }

    pub fn initrd(mut self, path: PathBuf) -> Self {
        self.initrd = Some(path);
        self
    }

    pub fn bios(mut self, path: PathBuf) -> Self {
        self.bios = Some(path);
        self
    }

    pub fn vga_bios(mut self, path: PathBuf) -> Self {
        self.vga_bios = Some(path);
        self
    }

    pub fn cmdline(mut self, args: &[String]) -> Self {
        self.cmdline = args.to_vec();
        self
    }

    pub fn memory_bytes(&self) -> u64 {
        u64::from(self.memory_mb) * 1024 * 1024
    }

    pub fn vga_memory_bytes(&self) -> u64 {
        u64::from(self.vga_memory_mb) * 1024 * 1024
    }

    pub fn kernel_path(&self) -> Option<&PathBuf> {
        self.kernel.as_ref()
    }

    pub fn initrd_path(&self) -> Option<&PathBuf> {
        self.initrd.as_ref()
    }

    pub fn bios_path(&self) -> Option<&PathBuf> {
        self.bios.as_ref()
    }

    pub fn vga_bios_path(&self) -> Option<&PathBuf> {
        self.vga_bios.as_ref()
    }

    /// Space-joined kernel command line.
    pub fn cmdline_string(&self) -> String {
        self.cmdline.join(" ")
    }
}
