//! Advisory CPU placement for workers.
//!
//! Worker `k` is pinned to the `k`-th entry of [`cpu_order`]: the first
//! hardware thread of every physical core comes first, then the remaining
//! hyperthread siblings. Pinning is a hint only; every failure is logged and
//! ignored.

use std::fs;

/// Order logical CPUs so that consecutive workers land on distinct cores.
pub fn cpu_order() -> Vec<usize> {
    let logical = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let siblings: Vec<Vec<usize>> = (0..logical).map(read_siblings).collect();
    interleave(&siblings)
}

/// Primary threads first, then secondaries, both in ascending CPU order.
///
/// `siblings[cpu]` lists the hardware threads sharing `cpu`'s core; an empty
/// entry means the topology is unknown and `cpu` counts as its own core.
fn interleave(siblings: &[Vec<usize>]) -> Vec<usize> {
    let is_primary = |cpu: usize| match siblings[cpu].iter().min() {
        Some(&first) => first == cpu,
        None => true,
    };
    let (mut order, secondaries): (Vec<usize>, Vec<usize>) =
        (0..siblings.len()).partition(|&cpu| is_primary(cpu));
    order.extend(secondaries);
    order
}

#[cfg(target_os = "linux")]
fn read_siblings(cpu: usize) -> Vec<usize> {
    let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/thread_siblings_list");
    fs::read_to_string(path)
        .map(|list| parse_cpu_list(&list))
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn read_siblings(_cpu: usize) -> Vec<usize> {
    Vec::new()
}

/// Parse the kernel's CPU list format, e.g. `0,4` or `0-1,8-9`.
fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    cpus.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(cpu) = part.parse() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus
}

/// Pin the calling thread (or, with `pid`, another process) to `cpu`.
#[cfg(target_os = "linux")]
pub(crate) fn pin(pid: Option<nix::unistd::Pid>, cpu: usize) -> Result<(), String> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu).map_err(|e| e.to_string())?;
    sched_setaffinity(pid.unwrap_or_else(|| Pid::from_raw(0)), &set).map_err(|e| e.to_string())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin(_pid: Option<nix::unistd::Pid>, _cpu: usize) -> Result<(), String> {
    Err("CPU pinning is only supported on Linux".to_string())
}

/// Pin worker `index` following `order`, logging failures.
pub(crate) fn hint(order: &[usize], index: usize, pid: Option<nix::unistd::Pid>) {
    if order.is_empty() {
        return;
    }
    let cpu = order[index % order.len()];
    match pin(pid, cpu) {
        Ok(()) => tracing::trace!(worker_id = index, cpu, "Pinned worker"),
        Err(e) => tracing::debug!(worker_id = index, cpu, error = %e, "CPU pinning hint ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0,4\n"), vec![0, 4]);
        assert_eq!(parse_cpu_list("0-1,8-9"), vec![0, 1, 8, 9]);
        assert_eq!(parse_cpu_list("3"), vec![3]);
        assert!(parse_cpu_list("").is_empty());
        assert_eq!(parse_cpu_list("x,2"), vec![2]);
    }

    #[test]
    fn test_interleave_hyperthreads() {
        // 4 cores, siblings numbered cpu and cpu + 4.
        let siblings: Vec<Vec<usize>> = (0..8).map(|c| vec![c % 4, c % 4 + 4]).collect();
        assert_eq!(interleave(&siblings), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_interleave_adjacent_siblings() {
        // 2 cores, siblings numbered pairwise (0,1) and (2,3).
        let siblings = vec![vec![0, 1], vec![0, 1], vec![2, 3], vec![2, 3]];
        assert_eq!(interleave(&siblings), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_interleave_unknown_topology() {
        let siblings = vec![Vec::new(); 3];
        assert_eq!(interleave(&siblings), vec![0, 1, 2]);
    }

    #[test]
    fn test_cpu_order_is_permutation() {
        let mut order = cpu_order();
        let n = order.len();
        assert!(n >= 1);
        order.sort_unstable();
        assert_eq!(order, (0..n).collect::<Vec<_>>());
    }
}
