// Per-process CPU tracking, EMA smoothing and stable top-N ranking

use super::host::RawProcess;
use crate::models::{ProcessInfo, round2};
use std::collections::HashMap;
use std::time::Instant;

/// Weight of the newest reading in the CPU moving average.
pub const EMA_ALPHA: f64 = 0.2;

/// Scores closer than this are treated as tied and ordered by PID.
pub const RANK_TIE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    cpu_time_ms: u64,
    at: Instant,
}

/// Remembers the previous CPU time and smoothed CPU of every live PID.
#[derive(Debug)]
pub struct ProcessTracker {
    keep: usize,
    samples: HashMap<i32, CpuSample>,
    smoothed: HashMap<i32, f64>,
}

/// CPU percent of one process between two readings, normalised to the core count.
pub fn raw_cpu_percent(prev_ms: u64, cur_ms: u64, elapsed_secs: f64, cores: usize) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let cpu_secs = cur_ms.saturating_sub(prev_ms) as f64 / 1000.0;
    let percent = cpu_secs / elapsed_secs * 100.0 / cores.max(1) as f64;
    percent.clamp(0.0, 100.0)
}

/// Exponential moving average; the first reading is taken as-is.
pub fn smooth(prev: Option<f64>, raw: f64) -> f64 {
    match prev {
        Some(prev) => EMA_ALPHA * raw + (1.0 - EMA_ALPHA) * prev,
        None => raw,
    }
}

/// Orders by descending score. Neighbours closer than [`RANK_TIE_THRESHOLD`] are put in
/// PID order so rankings do not flicker between ticks; only such neighbours ever swap, so
/// any two entries whose scores differ by the threshold or more stay in score order.
pub fn rank(processes: &mut [ProcessInfo]) {
    processes.sort_by(|a, b| b.score().total_cmp(&a.score()).then(a.pid.cmp(&b.pid)));
    for i in 1..processes.len() {
        let (upper, lower) = (&processes[i - 1], &processes[i]);
        if (upper.score() - lower.score()).abs() < RANK_TIE_THRESHOLD && lower.pid < upper.pid {
            processes.swap(i - 1, i);
        }
    }
}

impl ProcessTracker {
    pub fn new(keep: usize) -> Self {
        Self {
            keep,
            samples: HashMap::new(),
            smoothed: HashMap::new(),
        }
    }

    /// Number of PIDs with remembered state.
    pub fn tracked(&self) -> usize {
        self.samples.len()
    }

    /// Folds one scan into the tracker and returns the ranked top processes.
    /// Command line and user are left empty for the caller to fill in.
    pub fn update(
        &mut self,
        procs: Vec<RawProcess>,
        now: Instant,
        cores: usize,
        total_memory_bytes: u64,
    ) -> Vec<ProcessInfo> {
        let mut next_samples = HashMap::with_capacity(procs.len());
        let mut next_smoothed = HashMap::with_capacity(procs.len());
        let mut infos = Vec::with_capacity(procs.len());

        for p in procs {
            let raw = match self.samples.get(&p.pid) {
                Some(prev) => raw_cpu_percent(
                    prev.cpu_time_ms,
                    p.cpu_time_ms,
                    now.saturating_duration_since(prev.at).as_secs_f64(),
                    cores,
                ),
                None => 0.0,
            };
            let cpu = smooth(self.smoothed.get(&p.pid).copied(), raw);
            next_samples.insert(
                p.pid,
                CpuSample {
                    cpu_time_ms: p.cpu_time_ms,
                    at: now,
                },
            );
            next_smoothed.insert(p.pid, cpu);

            let memory_percent = if total_memory_bytes > 0 {
                p.memory_bytes as f64 / total_memory_bytes as f64 * 100.0
            } else {
                0.0
            };
            infos.push(ProcessInfo {
                pid: p.pid,
                name: p.name,
                cpu_percent: round2(cpu),
                memory_mb: round2(p.memory_bytes as f64 / (1024.0 * 1024.0)),
                memory_percent: round2(memory_percent),
                command: String::new(),
                user: String::new(),
            });
        }

        // PIDs missing from this scan are forgotten here.
        self.samples = next_samples;
        self.smoothed = next_smoothed;

        rank(&mut infos);
        infos.truncate(self.keep);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MB: u64 = 1024 * 1024;

    fn raw(pid: i32, cpu_time_ms: u64, memory_bytes: u64) -> RawProcess {
        RawProcess {
            pid,
            name: format!("p{pid}"),
            cpu_time_ms,
            memory_bytes,
        }
    }

    fn pids(processes: &[ProcessInfo]) -> Vec<i32> {
        processes.iter().map(|p| p.pid).collect()
    }

    /// Entries whose scores differ by the tie threshold or more appear in score order.
    fn assert_score_ordered(processes: &[ProcessInfo]) {
        for (i, a) in processes.iter().enumerate() {
            for b in &processes[i + 1..] {
                if (a.score() - b.score()).abs() >= RANK_TIE_THRESHOLD {
                    assert!(
                        a.score() > b.score(),
                        "pid {} ({}) ranked above pid {} ({})",
                        a.pid,
                        a.score(),
                        b.pid,
                        b.score()
                    );
                }
            }
        }
    }

    fn info(pid: i32, cpu: f64) -> ProcessInfo {
        ProcessInfo {
            pid,
            cpu_percent: cpu,
            ..Default::default()
        }
    }

    #[test]
    fn first_sighting_reports_zero() {
        let mut t = ProcessTracker::new(15);
        let out = t.update(vec![raw(1, 50_000, MB)], Instant::now(), 1, 1024 * MB);
        assert_eq!(out[0].cpu_percent, 0.0);
        assert_eq!(out[0].memory_mb, 1.0);
    }

    #[test]
    fn second_reading_is_smoothed() {
        let mut t = ProcessTracker::new(15);
        let start = Instant::now();
        t.update(vec![raw(1, 0, 0)], start, 1, 0);
        // One CPU-second in one second on one core = 100% raw; EMA from 0 gives 20%.
        let out = t.update(vec![raw(1, 1000, 0)], start + Duration::from_secs(1), 1, 0);
        assert_eq!(out[0].cpu_percent, 20.0);
    }

    #[test]
    fn raw_cpu_is_normalised_by_cores() {
        assert_eq!(raw_cpu_percent(0, 2000, 1.0, 4), 50.0);
        assert_eq!(raw_cpu_percent(5000, 1000, 1.0, 4), 0.0);
        assert_eq!(raw_cpu_percent(0, 1000, 0.0, 1), 0.0);
    }

    #[test]
    fn idle_process_decays_towards_zero() {
        let mut t = ProcessTracker::new(15);
        let start = Instant::now();
        t.update(vec![raw(7, 0, 0)], start, 1, 0);
        let mut cpu = t.update(vec![raw(7, 1000, 0)], start + Duration::from_secs(1), 1, 0)[0]
            .cpu_percent;
        for tick in 2..30u64 {
            let out = t.update(vec![raw(7, 1000, 0)], start + Duration::from_secs(tick), 1, 0);
            assert!(out[0].cpu_percent <= cpu);
            cpu = out[0].cpu_percent;
        }
        assert!(cpu < 1.0);
    }

    #[test]
    fn exited_processes_are_forgotten() {
        let mut t = ProcessTracker::new(15);
        let now = Instant::now();
        t.update(vec![raw(1, 0, 0), raw(2, 0, 0)], now, 1, 0);
        assert_eq!(t.tracked(), 2);
        let out = t.update(vec![raw(2, 0, 0)], now + Duration::from_secs(1), 1, 0);
        assert_eq!(t.tracked(), 1);
        assert!(out.iter().all(|p| p.pid != 1));
    }

    #[test]
    fn output_is_truncated_to_keep() {
        let mut t = ProcessTracker::new(3);
        let procs = (1..=10).map(|pid| raw(pid, 0, pid as u64 * MB)).collect();
        let out = t.update(procs, Instant::now(), 1, 0);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn near_ties_are_ordered_by_pid() {
        let mut a = vec![info(20, 5.3), info(10, 5.0), info(30, 9.0)];
        rank(&mut a);
        assert_eq!(pids(&a), vec![30, 10, 20]);

        // Scores swap slightly on the next tick; order must not change.
        let mut b = vec![info(20, 5.0), info(10, 5.3), info(30, 9.0)];
        rank(&mut b);
        assert_eq!(pids(&b), vec![30, 10, 20]);
    }

    #[test]
    fn chained_near_ties_do_not_bury_the_heaviest_process() {
        // Neighbouring scores are 0.4 apart, so every adjacent pair is a near-tie.
        let mut a: Vec<_> = (0..41).map(|i| info(i + 1, f64::from(i) * 0.4)).collect();
        rank(&mut a);
        assert_score_ordered(&a);
        assert!(a[0].score() >= 15.6 - 1e-9, "top entry has score {}", a[0].score());
        assert!(pids(&a[..2]).contains(&41));
        assert!(a.last().is_some_and(|p| p.score() < 0.5));
    }

    #[test]
    fn dense_low_cpu_distribution_keeps_heavy_processes_on_top() {
        let mut a: Vec<_> = (1..=200)
            .map(|pid| info(pid, f64::from(pid % 17) * 0.05))
            .collect();
        a.push(info(900, 42.0));
        a.push(info(901, 12.5));
        a.push(info(902, 12.3));
        rank(&mut a);
        assert_score_ordered(&a);
        assert_eq!(pids(&a[..3]), vec![900, 901, 902]);
    }

    #[test]
    fn clear_gaps_keep_score_order() {
        let mut a = vec![info(1, 1.0), info(2, 50.0), info(3, 25.0)];
        rank(&mut a);
        assert_eq!(pids(&a), vec![2, 3, 1]);
    }

    #[test]
    fn memory_contributes_to_score() {
        let heavy = ProcessInfo {
            pid: 2,
            memory_mb: 2048.0,
            ..Default::default()
        };
        let mut a = vec![info(1, 10.0), heavy];
        rank(&mut a);
        assert_eq!(a[0].pid, 2);
    }
}
