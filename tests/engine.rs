use llbox::config::{Annotations, Linux, Process, Runtime};
use llbox::{Engine, EngineOptions};

fn minimal_config() -> Runtime {
    Runtime {
        root: "/tmp/ll-box-test-root".into(),
        hostname: String::new(),
        process: Process {
            cwd: "/".into(),
            args: vec!["/bin/true".to_string()],
            env: Vec::new(),
        },
        mounts: Vec::new(),
        linux: Linux {
            namespaces: Vec::new(),
            uid_mappings: Vec::new(),
            gid_mappings: Vec::new(),
            resources: Default::default(),
            cgroups_path: String::new(),
            seccomp: None,
        },
        hooks: Default::default(),
        annotations: Annotations {
            container_root_path: "/tmp/ll-box-test-staging".into(),
            native: None,
            overlayfs: None,
            dbus_proxy_info: None,
        },
    }
}

#[test]
fn start_rejects_a_config_with_neither_native_nor_overlayfs_before_cloning_anything() {
    let engine = Engine::new(minimal_config(), EngineOptions::default());
    let err = engine.start().unwrap_err();
    assert!(err.to_string().contains("exactly one of"));
}
