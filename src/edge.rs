//! Edge-device detection.
//!
//! Edge mode turns on frame skipping, resolution reduction and telemetry.
//! With `EdgeMode::Auto` the host decides: Raspberry Pi boards and ARM
//! machines run the edge profile.

use std::path::Path;

const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// True when the host looks like a constrained edge board.
pub fn detect_edge_device() -> bool {
    let detected = is_edge_host(Path::new(CPUINFO_PATH), std::env::consts::ARCH);
    log::debug!(
        "edge detection: arch={} edge={}",
        std::env::consts::ARCH,
        detected
    );
    detected
}

fn is_edge_host(cpuinfo: &Path, arch: &str) -> bool {
    match std::fs::read_to_string(cpuinfo) {
        Ok(contents) => contents.contains("Raspberry Pi") || is_arm(arch),
        Err(_) => false,
    }
}

fn is_arm(arch: &str) -> bool {
    let arch = arch.to_ascii_lowercase();
    arch.contains("arm") || arch == "aarch64"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cpuinfo(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp cpuinfo");
        file.write_all(contents.as_bytes()).expect("write cpuinfo");
        file
    }

    #[test]
    fn raspberry_pi_model_is_edge() {
        let file = cpuinfo("processor : 0\nModel : Raspberry Pi 4 Model B Rev 1.4\n");
        assert!(is_edge_host(file.path(), "x86_64"));
    }

    #[test]
    fn arm_arch_is_edge() {
        let file = cpuinfo("processor : 0\n");
        assert!(is_edge_host(file.path(), "aarch64"));
        assert!(is_edge_host(file.path(), "arm"));
    }

    #[test]
    fn desktop_is_not_edge() {
        let file = cpuinfo("model name : AMD Ryzen 9\n");
        assert!(!is_edge_host(file.path(), "x86_64"));
    }

    #[test]
    fn unreadable_cpuinfo_is_not_edge() {
        assert!(!is_edge_host(Path::new("/nonexistent/cpuinfo"), "aarch64"));
    }
}
