// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host resource sampling
//!
//! CPU utilization is derived from the 1-minute load average normalized by
//! the logical core count. Memory utilization is the used share of total
//! physical memory. Both are percentages rounded to two decimals.
//!
//! Sampling never fails: a host value that cannot be read reports 0 so a
//! single bad sample does not abort an export cycle.

use crate::registry::lock;
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

/// Physical memory, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: u64,
    pub free: u64,
}

pub trait HostStatsReader: Send + Sync {
    /// 1-minute load average
    fn load_average(&self) -> Option<f64>;
    /// Number of logical CPUs
    fn cpu_count(&self) -> usize;
    fn memory(&self) -> Option<MemoryStats>;
}

/// Reads host stats through `sysinfo`, with the core count from `num_cpus`
pub struct SysinfoStatsReader {
    sys: Mutex<System>,
}

impl SysinfoStatsReader {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoStatsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStatsReader for SysinfoStatsReader {
    fn load_average(&self) -> Option<f64> {
        let load = System::load_average().one;
        load.is_finite().then_some(load)
    }

    fn cpu_count(&self) -> usize {
        num_cpus::get()
    }

    fn memory(&self) -> Option<MemoryStats> {
        let mut sys = lock(&self.sys);
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return None;
        }
        Some(MemoryStats {
            total,
            free: sys.free_memory(),
        })
    }
}

pub struct Sampler {
    reader: Box<dyn HostStatsReader>,
}

impl Sampler {
    pub fn new(reader: Box<dyn HostStatsReader>) -> Self {
        Self { reader }
    }

    pub fn cpu_utilization(&self) -> f64 {
        let Some(load) = self.reader.load_average() else {
            debug!("Could not read load average, reporting 0% CPU");
            return 0.0;
        };
        let cores = self.reader.cpu_count();
        if cores == 0 || load < 0.0 {
            debug!("Unusable CPU sample: load {load}, {cores} cores");
            return 0.0;
        }
        (round2(load / cores as f64) * 100.0).clamp(0.0, 100.0)
    }

    pub fn memory_utilization(&self) -> f64 {
        match self.reader.memory() {
            Some(MemoryStats { total, free }) if total > 0 => {
                let used = total.saturating_sub(free);
                round2(used as f64 / total as f64 * 100.0)
            }
            _ => {
                debug!("Could not read host memory, reporting 0% memory");
                0.0
            }
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(Box::new(SysinfoStatsReader::new()))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
