//! Compute target selection.
//!
//! The target is probed once and then passed explicitly to model constructors.
//! Tests should pass [`ComputeTarget::Cpu`] directly instead of relying on the
//! probe.

use std::fmt;
use std::sync::OnceLock;

/// Set to any value to keep auto-selection on the CPU.
pub const DISABLE_CUDA_ENV: &str = "ZONOS_DISABLE_CUDA";

/// Device a model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeTarget {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl ComputeTarget {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

/// Device selection preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// CUDA device 0 when available, CPU otherwise. Metal/MPS is never picked.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
}

/// Resolve a selection preference to a concrete target.
///
/// Explicit choices are honoured as given; only `Auto` probes the runtime.
pub fn select_compute_target(selection: DeviceSelection) -> ComputeTarget {
    match selection {
        DeviceSelection::Cpu => ComputeTarget::Cpu,
        DeviceSelection::Cuda(ordinal) => ComputeTarget::Cuda(ordinal),
        DeviceSelection::Auto => {
            if std::env::var_os(DISABLE_CUDA_ENV).is_some() {
                log::info!("{DISABLE_CUDA_ENV} set, using CPU");
                return ComputeTarget::Cpu;
            }
            if cuda_available() {
                log::info!("Auto-selected CUDA device 0");
                ComputeTarget::Cuda(0)
            } else {
                log::info!("Using CPU");
                ComputeTarget::Cpu
            }
        }
    }
}

/// The auto-selected target, probed on first call and cached for the process.
pub fn default_compute_target() -> ComputeTarget {
    static DEFAULT: OnceLock<ComputeTarget> = OnceLock::new();
    *DEFAULT.get_or_init(|| select_compute_target(DeviceSelection::Auto))
}

#[cfg(feature = "onnx")]
fn cuda_available() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            log::debug!("CUDA probe failed: {e}");
            false
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn cuda_available() -> bool {
    false
}
