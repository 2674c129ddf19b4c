//! Build and snapshot infrastructure for the sandbox VM.
//!
//! Two pipelines share one data model:
//!
//! - **Boot image**: resolve permissions for a staged system tree, encode
//!   it as a deterministic newc cpio archive, and write it gzip-compressed
//!   for the boot loader to consume as the initrd.
//! - **State snapshot**: boot the VM engine once at build time, capture its
//!   post-boot state at the guest shell prompt, and persist it compressed;
//!   client sessions stream it back down, decompress it on the fly, and
//!   resume instantly instead of re-booting.
//!
//! # Architecture
//!
//! ```text
//! permissions ──► artifact::initramfs ──► filesystem.img ──► engine boot
//!                                              │
//! engine (external) ──► snapshot::capture ─────┴──► initial_state.bin
//!                                                        │
//! snapshot::transport ◄──────────────────────────────────┘
//!        │
//!        └──► engine restore + resume
//! ```
//!
//! The VM engine itself (CPU, devices, terminal) is an external
//! collaborator consumed through [`engine::VmEngine`]; captured state is an
//! opaque blob this crate never inspects.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod permissions;
pub mod preflight;
pub mod snapshot;

pub use config::BuildConfig;
pub use engine::{BootOptions, StateBlob, VmEngine};
pub use permissions::PermissionSet;
