use anyhow::{bail, Result};
use std::path::Path;

use sandbox_builder::artifact::{initramfs, manifest};
use sandbox_builder::config::BuildConfig;
use sandbox_builder::permissions::PermissionSet;
use sandbox_builder::preflight;

const DEFAULT_CONFIG: &str = "sandbox.toml";

fn usage() -> &'static str {
    "Usage:\n  sandbox-builder image [config.toml]"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd] if cmd == "image" => build_image(Path::new(DEFAULT_CONFIG)),
        [cmd, config] if cmd == "image" => build_image(Path::new(config)),
        _ => bail!(usage()),
    }
}

fn build_image(config_path: &Path) -> Result<()> {
    let config = BuildConfig::load(config_path)?;
    preflight::check_image_inputs(&config)?;

    let perms = PermissionSet::load(&config.permissions)?;
    let size = initramfs::build_image(&config.system_dir, &perms, &config.image_output)?;
    manifest::write_checksum_sidecar(&config.image_output)?;

    let mut build_manifest = manifest::BuildManifest::new();
    build_manifest.record(&config.image_output)?;
    if let Some(dir) = config.image_output.parent() {
        build_manifest.write(dir)?;
    }

    println!("Created: {} ({} bytes)", config.image_output.display(), size);
    Ok(())
}
