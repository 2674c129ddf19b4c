//! Build configuration.
//!
//! `sandbox.toml` names the inputs and outputs of both pipelines:
//!
//! ```toml
//! [build]
//! system_dir = "initrd/system"
//! permissions = "initrd/permissions.json"
//! image_output = "public/assets/filesystem.img"
//! state_output = "public/dist/initial_state.bin"
//!
//! [boot]
//! memory_mb = 128
//! kernel = "linux/images/bzImage"
//! bios = "public/bios/seabios.bin"
//! vga_bios = "public/bios/vgabios.bin"
//! ```
//!
//! Relative paths resolve against the config file's directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::{BootOptions, DEFAULT_CMDLINE};
use crate::snapshot::capture::{CaptureOptions, DEFAULT_PROMPT};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    build: BuildToml,
    boot: BootToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    system_dir: String,
    permissions: String,
    image_output: String,
    state_output: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootToml {
    memory_mb: Option<u32>,
    vga_memory_mb: Option<u32>,
    kernel: String,
    bios: String,
    vga_bios: String,
    cmdline: Option<Vec<String>>,
    prompt: Option<String>,
}

/// Loaded and validated build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub system_dir: PathBuf,
    pub permissions: PathBuf,
    pub image_output: PathBuf,
    pub state_output: PathBuf,
    pub memory_mb: u32,
    pub vga_memory_mb: u32,
    pub kernel: PathBuf,
    pub bios: PathBuf,
    pub vga_bios: PathBuf,
    pub cmdline: Vec<String>,
    pub prompt: String,
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        let parsed: ConfigToml = toml::from_str(&text)
            .with_context(|| format!("parsing build config '{}'", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let memory_mb = parsed.boot.memory_mb.unwrap_or(128);
        if memory_mb == 0 {
            bail!(
                "invalid build config '{}': boot.memory_mb must be non-zero",
                path.display()
            );
        }

        let prompt = parsed
            .boot
            .prompt
            .unwrap_or_else(|| String::from_utf8_lossy(DEFAULT_PROMPT).into_owned());
        if prompt.is_empty() {
            bail!(
                "invalid build config '{}': boot.prompt must be non-empty",
                path.display()
            );
        }

        let cmdline = parsed
            .boot
            .cmdline
            .unwrap_or_else(|| DEFAULT_CMDLINE.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            system_dir: resolve(base, &parsed.build.system_dir),
            permissions: resolve(base, &parsed.build.permissions),
            image_output: resolve(base, &parsed.build.image_output),
            state_output: resolve(base, &parsed.build.state_output),
            memory_mb,
            vga_memory_mb: parsed.boot.vga_memory_mb.unwrap_or(2),
            kernel: resolve(base, &parsed.boot.kernel),
            bios: resolve(base, &parsed.boot.bios),
            vga_bios: resolve(base, &parsed.boot.vga_bios),
            cmdline,
            prompt,
        })
    }

    /// Boot parameters for the embedder's engine factory.
    pub fn boot_options(&self) -> BootOptions {
        BootOptions::new(self.memory_mb)
            .vga_memory_mb(self.vga_memory_mb)
            .kernel(self.kernel.clone())
            .initrd(self.image_output.clone())
            .bios(self.bios.clone())
            .vga_bios(self.vga_bios.clone())
            .cmdline(&self.cmdline)
    }

    /// Options for the capture run.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            prompt: self.prompt.as_bytes().to_vec(),
            ..Default::default()
        }
    }
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
