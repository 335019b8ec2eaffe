//! Per-CPU scheduling counters.
//!
//! Counters are updated with relaxed atomics from interrupt context and read
//! as a [`StatsSnapshot`]; a snapshot is not atomic across counters.

use portable_atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CpuStats {
    /// Switches performed on this CPU, idle switches included
    pub context_switches: AtomicU64,
    /// Preemption timer firings
    pub quantum_expirations: AtomicU64,
    /// Forced reschedules requested for this CPU
    pub preemption_requests: AtomicU64,
    /// Switches into the idle thread
    pub idle_switches: AtomicU64,
}

impl CpuStats {
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            quantum_expirations: AtomicU64::new(0),
            preemption_requests: AtomicU64::new(0),
            idle_switches: AtomicU64::new(0),
        }
    }

    pub fn record_context_switch(&self, to_idle: bool) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
        if to_idle {
            self.idle_switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_quantum_expiration(&self) {
        self.quantum_expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preemption_request(&self) {
        self.preemption_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            quantum_expirations: self.quantum_expirations.load(Ordering::Relaxed),
            preemption_requests: self.preemption_requests.load(Ordering::Relaxed),
            idle_switches: self.idle_switches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a CPU's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub context_switches: u64,
    pub quantum_expirations: u64,
    pub preemption_requests: u64,
    pub idle_switches: u64,
}

impl StatsSnapshot {
    /// Share of context switches that went to a real thread, in percent.
    pub fn busy_switch_ratio(&self) -> f64 {
        if self.context_switches > 0 {
            let busy = self.context_switches - self.idle_switches;
            (busy as f64 / self.context_switches as f64) * 100.0
        } else {
            0.0
        }
    }
}
