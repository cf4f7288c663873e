//! Process memory sampling
//!
//! The monitor and the adaptive pools only need one number: how much of the
//! machine this process currently occupies. On Linux that comes straight from
//! procfs; elsewhere the sampler reports zero pressure.

/// Source of memory-pressure readings in `[0.0, 1.0]`
pub trait MemorySampler: Send + Sync {
    fn pressure(&self) -> f64;
}

/// Resident set size over total physical memory
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemorySampler;

impl MemorySampler for ProcessMemorySampler {
    fn pressure(&self) -> f64 {
        match (resident_bytes(), total_memory_bytes()) {
            (Some(used), Some(total)) if total > 0 => (used as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Resident memory of this process in bytes
#[must_use]
pub fn resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        return read_kb_field(&status, "VmRSS:");
    }

    #[allow(unreachable_code)]
    None
}

/// Physical memory installed in bytes
#[must_use]
pub fn total_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        return read_kb_field(&meminfo, "MemTotal:");
    }

    #[allow(unreachable_code)]
    None
}

fn read_kb_field(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
