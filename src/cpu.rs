//! CPU topology helpers: cpuset parsing, detection, and worker pinning.
//!
//! Cpuset strings use the Linux taskset/numactl format:
//! - Single CPUs: `"0"`, `"5"`
//! - Inclusive ranges: `"0-7"`, `"16-23"`
//! - Mixed: `"0-3,8-11"`, `"0,2,4,6-8"`

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};

use core_affinity::CoreId;
use tracing::debug;

use crate::error::{Result, StrideError};

/// Parse a cpuset string into a sorted, deduplicated vector of CPU IDs.
///
/// # Examples
///
/// ```
/// use stride_rs::cpu::parse_cpuset;
///
/// assert_eq!(parse_cpuset("0-3,8").unwrap(), vec![0, 1, 2, 3, 8]);
/// assert_eq!(parse_cpuset("4,2,0").unwrap(), vec![0, 2, 4]);
/// ```
///
/// # Errors
///
/// Returns `StrideError::InvalidCpuSet` if the string cannot be parsed.
pub fn parse_cpuset(s: &str) -> Result<Vec<usize>> {
    let mut cpus: Vec<usize> = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_part)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    if cpus.is_empty() {
        return Err(StrideError::InvalidCpuSet(format!(
            "no CPU IDs in {s:?}"
        )));
    }

    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

fn parse_part(part: &str) -> Result<RangeInclusive<usize>> {
    let parse_id = |text: &str| -> Result<usize> {
        text.trim()
            .parse()
            .map_err(|_| StrideError::InvalidCpuSet(format!("invalid CPU ID {text:?}")))
    };

    match part.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (parse_id(lo)?, parse_id(hi)?);
            if lo > hi {
                return Err(StrideError::InvalidCpuSet(format!(
                    "range start {lo} > end {hi} in {part:?}"
                )));
            }
            Ok(lo..=hi)
        }
        None => {
            let id = parse_id(part)?;
            Ok(id..=id)
        }
    }
}

/// Enumerate the logical CPU IDs available to this process.
pub fn available_cpus() -> Vec<usize> {
    core_affinity::get_core_ids()
        .map(|ids| ids.into_iter().map(|id| id.id).collect())
        .unwrap_or_default()
}

/// Check that every CPU in the set exists on this system.
///
/// # Errors
///
/// Returns `StrideError::CpuNotAvailable` naming the first missing CPU.
pub fn validate_cpuset(cpus: &[usize]) -> Result<()> {
    let available = available_cpus();
    match cpus.iter().find(|cpu| !available.contains(cpu)) {
        Some(&missing) => Err(StrideError::CpuNotAvailable(missing)),
        None => Ok(()),
    }
}

/// Parse a cpuset string and validate it against the CPUs on this system.
pub fn parse_and_validate_cpuset(s: &str) -> Result<Vec<usize>> {
    let cpus = parse_cpuset(s)?;
    validate_cpuset(&cpus)?;
    Ok(cpus)
}

/// Format a sorted CPU list back into compact cpuset notation.
///
/// ```
/// use stride_rs::cpu::format_cpuset;
///
/// assert_eq!(format_cpuset(&[0, 1, 2, 3, 8]), "0-3,8");
/// ```
pub fn format_cpuset(cpus: &[usize]) -> String {
    let mut parts = Vec::new();
    let mut iter = cpus.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap_or(end);
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }

    parts.join(",")
}

/// Pin the current thread to the given CPU.
///
/// # Errors
///
/// Returns `StrideError::AffinityFailed` if the pin does not take.
pub fn pin_to_cpu(cpu_id: usize) -> Result<()> {
    if core_affinity::set_for_current(CoreId { id: cpu_id }) {
        debug!(cpu_id, "pinned thread to CPU");
        Ok(())
    } else {
        Err(StrideError::AffinityFailed(cpu_id))
    }
}

/// Hands out CPUs to starting worker threads in round-robin order.
#[derive(Debug)]
pub(crate) struct CpuAllocator {
    cpus: Vec<usize>,
    next: AtomicUsize,
}

impl CpuAllocator {
    /// `cpus` must be non-empty; the runtime rejects empty cpusets before
    /// building its pool.
    pub fn new(cpus: Vec<usize>) -> Self {
        assert!(!cpus.is_empty(), "CpuAllocator requires at least one CPU");
        Self {
            cpus,
            next: AtomicUsize::new(0),
        }
    }

    /// Next CPU in round-robin order. Safe to call from any thread.
    pub fn allocate(&self) -> usize {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.cpus.len();
        self.cpus[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_range() {
        assert_eq!(parse_cpuset("0").unwrap(), vec![0]);
        assert_eq!(parse_cpuset("3-6").unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_parse_mixed() {
        assert_eq!(
            parse_cpuset("0-3,8-11").unwrap(),
            vec![0, 1, 2, 3, 8, 9, 10, 11]
        );
        assert_eq!(parse_cpuset("0,2-4,8").unwrap(), vec![0, 2, 3, 4, 8]);
    }

    #[test]
    fn test_parse_sorts_and_deduplicates() {
        assert_eq!(parse_cpuset("3,1,2,0").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpuset("0-2,1-3").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        assert_eq!(parse_cpuset(" 0-3 ").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpuset("0, 2, 4").unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_cpuset("").is_err());
        assert!(parse_cpuset("abc").is_err());
        assert!(parse_cpuset("0-abc").is_err());
        assert!(parse_cpuset("-1").is_err());
        assert!(parse_cpuset("5-3").is_err());
    }

    #[test]
    fn test_available_cpus_nonempty() {
        let cpus = available_cpus();
        assert!(!cpus.is_empty());
    }

    #[test]
    fn test_validate_cpuset() {
        assert!(validate_cpuset(&available_cpus()).is_ok());
        assert!(matches!(
            validate_cpuset(&[99999]),
            Err(StrideError::CpuNotAvailable(99999))
        ));
    }

    #[test]
    fn test_format_cpuset() {
        assert_eq!(format_cpuset(&[]), "");
        assert_eq!(format_cpuset(&[4]), "4");
        assert_eq!(format_cpuset(&[0, 1, 2, 3]), "0-3");
        assert_eq!(format_cpuset(&[0, 2, 3, 4, 8]), "0,2-4,8");
    }

    #[test]
    fn test_parse_format_round_trip() {
        let cpus = parse_cpuset("0-3,8,10-11").unwrap();
        assert_eq!(format_cpuset(&cpus), "0-3,8,10-11");
    }

    #[test]
    fn test_allocator_round_robin() {
        let allocator = CpuAllocator::new(vec![0, 2, 4]);
        assert_eq!(allocator.allocate(), 0);
        assert_eq!(allocator.allocate(), 2);
        assert_eq!(allocator.allocate(), 4);
        assert_eq!(allocator.allocate(), 0);
    }

    #[test]
    #[should_panic(expected = "CpuAllocator requires at least one CPU")]
    fn test_allocator_empty_panics() {
        let _ = CpuAllocator::new(vec![]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pin_to_cpu() {
        assert!(pin_to_cpu(0).is_ok());
    }
}
