//! Host-level figures for the periodic metrics push.

/// Point-in-time view of the machine the broadcaster runs on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSnapshot {
    pub load_average: [f64; 3],
    pub total_memory: u64,
    pub free_memory: u64,
    pub uptime_secs: u64,
}

impl HostSnapshot {
    /// Memory in use as hundredths of a percent, rounded half up. Zero when
    /// the total is unknown.
    #[must_use]
    pub fn memory_usage_hundredths(&self) -> u64 {
        let used = self.total_memory.saturating_sub(self.free_memory);
        used.saturating_mul(10_000)
            .saturating_add(self.total_memory / 2)
            .checked_div(self.total_memory)
            .unwrap_or(0)
    }

    /// Percentage in use with two decimals, e.g. `"33.33"`.
    #[must_use]
    pub fn memory_usage_label(&self) -> String {
        let hundredths = self.memory_usage_hundredths();
        format!("{}.{:02}", hundredths / 100, hundredths % 100)
    }
}

/// Reads load averages, memory totals and uptime.
///
/// Unsupported platforms report zeros rather than failing the push.
#[must_use]
pub fn read_host_snapshot() -> HostSnapshot {
    let (total_memory, free_memory, uptime_secs) = read_memory_and_uptime();
    HostSnapshot {
        load_average: read_load_average(),
        total_memory,
        free_memory,
        uptime_secs,
    }
}

#[cfg(unix)]
fn read_load_average() -> [f64; 3] {
    let mut loads = [0.0_f64; 3];
    // Safety: getloadavg writes at most `nelem` doubles into the provided buffer.
    let filled = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if filled < 0 {
        return [0.0; 3];
    }
    loads
}

#[cfg(not(unix))]
fn read_load_average() -> [f64; 3] {
    [0.0; 3]
}

#[cfg(target_os = "linux")]
fn read_memory_and_uptime() -> (u64, u64, u64) {
    // Safety: sysinfo is a plain C struct for which all-zero bytes are valid.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    // Safety: `info` is a valid, exclusively borrowed sysinfo struct.
    let rc = unsafe { libc::sysinfo(&mut info) };
    if rc != 0 {
        return (0, 0, 0);
    }
    let unit = u64::from(info.mem_unit).max(1);
    let total = u64::try_from(info.totalram)
        .unwrap_or(0)
        .saturating_mul(unit);
    let free = u64::try_from(info.freeram).unwrap_or(0).saturating_mul(unit);
    let uptime = u64::try_from(info.uptime).unwrap_or(0);
    (total, free, uptime)
}

#[cfg(not(target_os = "linux"))]
fn read_memory_and_uptime() -> (u64, u64, u64) {
    (0, 0, 0)
}
