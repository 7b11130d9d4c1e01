//! Host hardware fingerprint, captured once per job via `sysinfo`.

use executor_core::protocol::MachineSpecs;
use sysinfo::System;

pub fn capture() -> MachineSpecs {
    let mut system = System::new_all();
    system.refresh_all();

    let cpus: Vec<_> = system
        .cpus()
        .iter()
        .map(|cpu| {
            serde_json::json!({
                "brand": cpu.brand(),
                "frequency_mhz": cpu.frequency(),
            })
        })
        .collect();

    let document = serde_json::json!({
        "hostname": System::host_name(),
        "kernel_version": System::kernel_version(),
        "os_version": System::long_os_version(),
        "cpu_count": system.cpus().len(),
        "cpus": cpus,
        "total_memory_bytes": system.total_memory(),
        "total_swap_bytes": system.total_swap(),
    });

    MachineSpecs {
        captured_at: chrono::Utc::now(),
        document,
    }
}
