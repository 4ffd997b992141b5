mod common;

use common::TempDir;
use llbox::config::{CpuResources, MemoryResources, Resources};

#[test]
fn empty_cgroups_path_is_a_noop() {
    llbox::cgroup::configure("", &Resources::default(), nix::unistd::getpid()).unwrap();
}

#[test]
#[ignore = "requires root and permission to mount cgroup2"]
fn configure_writes_resource_limits_and_moves_the_calling_process_in() {
    let dir = TempDir::new().unwrap();
    let resources = Resources {
        memory: MemoryResources {
            limit: 100_000_000,
            swap: 150_000_000,
            reservation: 50_000_000,
        },
        cpu: CpuResources {
            period: 100_000,
            quota: 50_000,
            shares: 1024,
        },
    };

    llbox::cgroup::configure(
        dir.as_path().to_str().unwrap(),
        &resources,
        nix::unistd::getpid(),
    )
    .unwrap();

    let subgroup = dir.join("ll-box");
    assert_eq!(
        std::fs::read_to_string(subgroup.join("memory.max")).unwrap().trim(),
        "100000000"
    );
    assert_eq!(
        std::fs::read_to_string(subgroup.join("memory.swap.max")).unwrap().trim(),
        "50000000"
    );
    assert_eq!(
        std::fs::read_to_string(subgroup.join("cpu.max")).unwrap().trim(),
        "50000 100000"
    );
    assert_eq!(
        std::fs::read_to_string(subgroup.join("cpu.weight")).unwrap().trim(),
        "40"
    );
    let procs = std::fs::read_to_string(subgroup.join("cgroup.procs")).unwrap();
    assert_eq!(procs.trim(), nix::unistd::getpid().to_string());
}
