use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};

/// Host memory signal consulted before preloading.
pub trait MemoryPressure {
    /// Fraction of memory in use, in `[0, 1]`.
    fn used_fraction(&self) -> f32;
}

/// Reads `/proc/meminfo`. Reports no pressure when the file is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryPressure for SystemMemory {
    fn used_fraction(&self) -> f32 {
        match fs::read_to_string("/proc/meminfo") {
            Ok(content) => parse_meminfo(&content).unwrap_or_else(|| {
                tracing::debug!("Unrecognised /proc/meminfo layout");
                0.0
            }),
            Err(e) => {
                tracing::debug!("Could not read memory status: {}", e);
                0.0
            }
        }
    }
}

fn parse_meminfo(content: &str) -> Option<f32> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => {
                available = parts.next().and_then(|v| v.parse::<u64>().ok())
            }
            _ => {}
        }
    }

    let total = total.filter(|t| *t > 0)? as f64;
    let available = available? as f64;
    Some((1.0 - available / total).clamp(0.0, 1.0) as f32)
}

/// Settable signal, for simulations and tests.
#[derive(Debug, Default)]
pub struct FixedPressure {
    bits: AtomicU32,
}

impl FixedPressure {
    pub fn new(fraction: f32) -> Self {
        let pressure = Self::default();
        pressure.set(fraction);
        pressure
    }

    pub fn set(&self, fraction: f32) {
        self.bits
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl MemoryPressure for FixedPressure {
    fn used_fraction(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
