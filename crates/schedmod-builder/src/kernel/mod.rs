//! Everything derived from the target kernel build before a sandbox exists.

pub mod inputs;
pub mod version;

pub use inputs::{KernelInputs, KernelLayoutConfig};
pub use version::{KernelIdentity, resolve_identity};
