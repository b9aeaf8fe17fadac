mod report;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use vkcompute_core::config::default_config_path;
use vkcompute_core::VkComputeConfig;
use vkcompute_session::discovery::{discover_devices, DeviceSummary};
use vkcompute_session::{
    run_plan, AshApi, ComputeApi, DeviceSession, PlanError, SessionError, SessionPlan, Step,
};

use report::StepReport;

#[derive(Parser)]
#[command(name = "vkcompute")]
#[command(about = "vkcompute - Vulkan compute pipeline bring-up")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up a compute pipeline, report each step, then tear everything down
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Compiled SPIR-V compute shader
        #[arg(short, long)]
        shader: Option<String>,

        /// Do not enable the validation layer
        #[arg(long)]
        no_validation: bool,

        /// Build the bare pipeline without descriptor set or storage buffer
        #[arg(long)]
        no_storage: bool,

        /// Storage buffer size in bytes
        #[arg(short, long)]
        buffer_size: Option<u64>,

        /// Print the step report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List physical devices and the one a run would select
    Devices {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Print device information as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    vkcompute_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            shader,
            no_validation,
            no_storage,
            buffer_size,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(path) = shader {
                config.pipeline.shader_path = path;
            }
            if no_validation {
                config.instance.enable_validation = false;
            }
            if no_storage {
                config.pipeline.storage_buffer = false;
            }
            if let Some(size) = buffer_size {
                config.pipeline.buffer_size = size;
            }
            config.validate()?;

            let plan = SessionPlan::from_config(&config);
            let (reports, failure) = run_session(AshApi::load, &config, &plan);

            if json {
                println!("{}", report::render_json(&reports)?);
            } else {
                print!("{}", report::render_pretty("Vulkan Compute Bring-up", &reports));
            }

            if let Some(err) = &failure {
                eprintln!("{}", err);
            }
            let code = exit_code(&reports);
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Devices { config, json } => {
            let config = load_config(config.as_deref())?;
            let mut api = AshApi::load()?;
            let devices = discover_devices(&mut api, &config.instance)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_devices(&devices);
            }
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// An explicit path must load; otherwise fall back to the default search.
fn load_config(path: Option<&str>) -> anyhow::Result<VkComputeConfig> {
    match path {
        Some(path) => VkComputeConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path)),
        None => {
            let path = default_config_path();
            info!("using configuration {}", path);
            Ok(VkComputeConfig::load_or_default(&path))
        }
    }
}

/// Run every plan step on the driver `load` opens. The session is torn down
/// before this returns, whatever the outcome.
fn run_session<A, L>(
    load: L,
    config: &VkComputeConfig,
    plan: &SessionPlan,
) -> (Vec<StepReport>, Option<PlanError>)
where
    A: ComputeApi,
    L: FnOnce() -> Result<A, SessionError>,
{
    let planned = plan.steps();
    let mut reports = Vec::with_capacity(planned.len());

    let api = match load() {
        Ok(api) => api,
        Err(source) => {
            let err = PlanError {
                step: Step::CreateInstance,
                source,
            };
            reports.push(StepReport::fail(Step::CreateInstance, &err.source));
            report::fill_skipped(&mut reports, &planned);
            return (reports, Some(err));
        }
    };

    let mut session = DeviceSession::new(api, config.instance.clone());
    let result = run_plan(&mut session, plan, |step, result| {
        reports.push(StepReport::from_result(step, result));
    });
    session.destroy();
    drop(session);

    report::fill_skipped(&mut reports, &planned);
    (reports, result.err())
}

/// 1 when any step failed, 0 after a full run.
fn exit_code(reports: &[StepReport]) -> i32 {
    if report::has_failures(reports) {
        1
    } else {
        0
    }
}

fn print_devices(devices: &[DeviceSummary]) {
    if devices.is_empty() {
        println!("No GPUs with Vulkan support found");
        return;
    }

    println!("Available GPUs:");
    println!();
    for gpu in devices {
        println!(
            "  GPU {}: {}{}",
            gpu.index,
            gpu.device_name,
            if gpu.selected { " (selected)" } else { "" }
        );
        println!("    Type:     {:?}", gpu.device_type);
        println!("    VRAM:     {} MB", gpu.device_local_memory / (1024 * 1024));
        println!("    Vulkan:   {}", gpu.api_version);
        println!(
            "    IDs:      vendor {:#06x}, device {:#06x}",
            gpu.vendor_id, gpu.device_id
        );
        match gpu.compute_family {
            Some(family) => println!("    Queue:    family {}", family),
            None => println!("    Queue:    no compute+graphics family"),
        }
        println!();
    }
}
