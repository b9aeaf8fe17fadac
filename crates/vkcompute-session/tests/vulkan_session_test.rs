//! Integration test: DeviceSession on the system Vulkan driver
//!
//! Compiles small WGSL compute shaders to SPIR-V, writes them to disk and
//! brings up a full session through AshApi. Machines without a Vulkan loader
//! or a discrete GPU skip the test instead of failing it.
//!
//! Run with: cargo test --test vulkan_session_test -- --nocapture

use std::path::PathBuf;

use vkcompute_core::InstanceConfig;
use vkcompute_session::{
    run_plan, AshApi, DeviceSession, PlanError, SessionError, SessionPlan, SessionStatus,
    StorageBinding,
};

/// Compile WGSL to SPIR-V bytes using naga.
fn compile_wgsl_to_spirv(wgsl_source: &str, entry_point: &str) -> Vec<u8> {
    let module = naga::front::wgsl::parse_str(wgsl_source).expect("failed to parse WGSL");

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .expect("WGSL validation failed");

    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: entry_point.to_string(),
    };

    let mut writer =
        naga::back::spv::Writer::new(&options).expect("failed to create SPIR-V writer");
    let mut words = Vec::new();
    writer
        .write(&module, &info, Some(&pipeline_options), &None, &mut words)
        .expect("failed to generate SPIR-V");
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

const EMPTY_KERNEL: &str = r#"
@compute @workgroup_size(1)
fn main() {}
"#;

const DOUBLING_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] * 2u;
    }
}
"#;

fn write_kernel(dir: &tempfile::TempDir, wgsl: &str) -> PathBuf {
    let path = dir.path().join("compute.spv");
    std::fs::write(&path, compile_wgsl_to_spirv(wgsl, "main")).expect("failed to write shader");
    path
}

/// Environments without a usable GPU are not test failures.
fn unavailable(err: &PlanError) -> bool {
    matches!(
        err.source,
        SessionError::InstanceCreation(_)
            | SessionError::NoPhysicalDevices
            | SessionError::NoDiscreteGpu { .. }
            | SessionError::NoSuitableQueueFamily
    )
}

fn open_session() -> Option<DeviceSession<AshApi>> {
    match AshApi::load() {
        Ok(api) => Some(DeviceSession::new(api, InstanceConfig::default())),
        Err(e) => {
            println!("skipping: {}", e);
            None
        }
    }
}

#[test]
fn test_bare_pipeline_on_real_driver() {
    let Some(mut session) = open_session() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        enable_validation: false,
        shader_path: write_kernel(&dir, EMPTY_KERNEL),
        storage: None,
    };

    match run_plan(&mut session, &plan, |step, result| {
        println!("  {}: {}", step, if result.is_ok() { "ok" } else { "FAILED" });
    }) {
        Ok(()) => {}
        Err(e) if unavailable(&e) => {
            println!("skipping: {}", e);
            return;
        }
        Err(e) => panic!("{}", e),
    }

    assert_eq!(session.status(), SessionStatus::Ready);
    assert!(session.pipeline().is_some());
    assert!(session.descriptor_set().is_none());

    session.destroy();
    assert_eq!(session.status(), SessionStatus::Destroyed);
}

#[test]
fn test_storage_pipeline_on_real_driver() {
    let Some(mut session) = open_session() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let plan = SessionPlan {
        enable_validation: false,
        shader_path: write_kernel(&dir, DOUBLING_KERNEL),
        storage: Some(StorageBinding { buffer_size: 1024 }),
    };

    match run_plan(&mut session, &plan, |step, result| {
        println!("  {}: {}", step, if result.is_ok() { "ok" } else { "FAILED" });
    }) {
        Ok(()) => {}
        Err(e) if unavailable(&e) => {
            println!("skipping: {}", e);
            return;
        }
        Err(e) => panic!("{}", e),
    }

    assert!(session.pipeline().is_some());
    assert!(session.descriptor_set().is_some());

    let bytes = session.mapped_bytes_mut().expect("buffer memory not mapped");
    assert_eq!(bytes.len(), 1024);
    bytes[..4].copy_from_slice(&7u32.to_le_bytes());
    assert_eq!(&bytes[..4], &7u32.to_le_bytes());
}
