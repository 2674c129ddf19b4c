//! Preflight checks for build validation.
//!
//! Validates that every configured input exists before any work starts, so
//! a missing kernel or permissions document fails with one clear message
//! instead of a cryptic error mid-pipeline.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::BuildConfig;

/// Check that every labeled input path exists.
///
/// All missing paths are collected into a single error.
pub fn check_inputs(inputs: &[(&str, &Path)]) -> Result<()> {
    let mut missing = Vec::new();

    for (label, path) in inputs {
        if !path.exists() {
            missing.push(format!("  {} ({})", path.display(), label));
        }
    }

    if !missing.is_empty() {
        bail!("Missing build inputs:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Inputs needed to build the boot image.
pub fn check_image_inputs(config: &BuildConfig) -> Result<()> {
    check_inputs(&[
        ("system tree", &config.system_dir),
        ("permissions document", &config.permissions),
    ])
}

/// Inputs needed to boot the engine for state capture. The boot image must
/// already have been built.
pub fn check_boot_inputs(config: &BuildConfig) -> Result<()> {
    check_inputs(&[
        ("kernel image", &config.kernel),
        ("BIOS image", &config.bios),
        ("VGA BIOS image", &config.vga_bios),
        ("boot image", &config.image_output),
    ])
}
