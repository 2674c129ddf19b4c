//! Build-side state capture.
//!
//! Boots the engine, watches its serial output for the guest shell prompt,
//! captures machine state, and persists it compressed so client sessions
//! can resume instead of re-booting.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use crate::artifact::manifest;
use crate::engine::VmEngine;
use crate::snapshot;

/// Prompt printed by the guest shell once the boot has finished.
pub const DEFAULT_PROMPT: &[u8] = b"/ # ";

/// Rolling matcher for the readiness prompt in the serial byte stream.
///
/// Scanning for literal prompt text couples us to the guest shell, but the
/// engine exposes no boot-completion event. Keeping the heuristic behind
/// this type means the wait loop is the only caller to change if one ever
/// appears.
#[derive(Debug, Clone)]
pub struct PromptWatcher {
    pattern: Vec<u8>,
    window: Vec<u8>,
}

impl PromptWatcher {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
            window: Vec::with_capacity(pattern.len()),
        }
    }

    /// Feed one serial byte; true once the stream ends with the prompt.
    ///
    /// Carriage returns are dropped so matching works regardless of the
    /// guest's line discipline.
    pub fn push(&mut self, byte: u8) -> bool {
        if byte == b'\r' || self.pattern.is_empty() {
            return false;
        }
        self.window.push(byte);
        if self.window.len() > self.pattern.len() {
            let excess = self.window.len() - self.pattern.len();
            self.window.drain(..excess);
        }
        self.window == self.pattern
    }
}

/// Options for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Prompt bytes that mark the guest shell as ready.
    pub prompt: Vec<u8>,
    /// Mirror serial output to stdout while waiting, carriage returns
    /// stripped.
    pub echo_serial: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_vec(),
            echo_serial: true,
        }
    }
}

/// Block until the prompt appears in the serial stream.
///
/// There is deliberately no timeout or cancellation: a guest that stalls
/// during boot simply never completes, and the operator kills the build. A
/// serial stream that disconnects before the prompt is a fatal capture
/// error.
pub fn wait_for_prompt(serial: &Receiver<u8>, options: &CaptureOptions) -> Result<()> {
    let mut watcher = PromptWatcher::new(&options.prompt);
    let stdout = io::stdout();
    for byte in serial.iter() {
        if options.echo_serial && byte != b'\r' {
            let mut out = stdout.lock();
            let _ = out.write_all(&[byte]);
            let _ = out.flush();
        }
        if watcher.push(byte) {
            return Ok(());
        }
    }
    bail!("serial stream ended before the guest shell prompt appeared");
}

/// Boot the engine, capture its state at the prompt, persist it compressed.
///
/// `boot_image` is the freshly built filesystem image; once the snapshot
/// exists it is deleted, since sessions restore from the snapshot instead
/// of re-booting from the image. Capture failures abort; there is no retry.
pub fn generate_state<E: VmEngine>(
    engine: &mut E,
    options: &CaptureOptions,
    state_output: &Path,
    boot_image: Option<&Path>,
) -> Result<()> {
    let serial = engine.serial_output();

    println!("Booting VM...\n");
    let start = Instant::now();
    engine.run().context("starting VM engine")?;
    wait_for_prompt(&serial, options)?;
    println!("\n\n=== VM ready in {:.1}s ===", start.elapsed().as_secs_f64());

    println!("Saving state...");
    let state = engine.capture_state().context("capturing VM state")?;
    let raw_len = state.len() as u64;
    let compressed_len = snapshot::save_state(&state, state_output)?;
    manifest::write_checksum_sidecar(state_output)?;
    println!(
        "State saved: {} ({:.2} MB -> {:.2} MB)",
        state_output.display(),
        mib(raw_len),
        mib(compressed_len)
    );

    if let Some(image) = boot_image {
        fs::remove_file(image)
            .with_context(|| format!("removing boot image '{}'", image.display()))?;
    }

    engine.stop().context("stopping VM engine")?;
    Ok(())
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
