use std::fmt;
use std::path::PathBuf;

use tracing::{error, info};

use vkcompute_core::VkComputeConfig;

use crate::api::ComputeApi;
use crate::error::SessionError;
use crate::session::DeviceSession;

/// One setup step of a [`DeviceSession`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateInstance,
    PickPhysicalDevice,
    FindQueueFamily,
    CreateDevice,
    GetComputeQueue,
    CreateShaderModule,
    CreateDescriptorPool,
    CreateDescriptorSetLayout,
    CreateBuffer,
    MapBufferMemory,
    AllocateDescriptorSets,
    UpdateDescriptorSets,
    CreatePipelineLayout,
    CreatePipeline,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::CreateInstance => "create instance",
            Step::PickPhysicalDevice => "pick physical device",
            Step::FindQueueFamily => "find queue family",
            Step::CreateDevice => "create device",
            Step::GetComputeQueue => "get compute queue",
            Step::CreateShaderModule => "create shader module",
            Step::CreateDescriptorPool => "create descriptor pool",
            Step::CreateDescriptorSetLayout => "create descriptor set layout",
            Step::CreateBuffer => "create buffer",
            Step::MapBufferMemory => "map buffer memory",
            Step::AllocateDescriptorSets => "allocate descriptor sets",
            Step::UpdateDescriptorSets => "update descriptor sets",
            Step::CreatePipelineLayout => "create pipeline layout",
            Step::CreatePipeline => "create pipeline",
        }
    }

    /// Whether the step belongs to the storage buffer stages.
    pub fn is_storage(self) -> bool {
        matches!(
            self,
            Step::CreateDescriptorPool
                | Step::CreateDescriptorSetLayout
                | Step::CreateBuffer
                | Step::MapBufferMemory
                | Step::AllocateDescriptorSets
                | Step::UpdateDescriptorSets
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const ALL_STEPS: [Step; 14] = [
    Step::CreateInstance,
    Step::PickPhysicalDevice,
    Step::FindQueueFamily,
    Step::CreateDevice,
    Step::GetComputeQueue,
    Step::CreateShaderModule,
    Step::CreateDescriptorPool,
    Step::CreateDescriptorSetLayout,
    Step::CreateBuffer,
    Step::MapBufferMemory,
    Step::AllocateDescriptorSets,
    Step::UpdateDescriptorSets,
    Step::CreatePipelineLayout,
    Step::CreatePipeline,
];

/// Host-visible storage buffer bound at set 0, binding 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBinding {
    pub buffer_size: u64,
}

/// What a session run builds: the bare pipeline, or the pipeline plus a
/// descriptor set and mapped storage buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub enable_validation: bool,
    pub shader_path: PathBuf,
    pub storage: Option<StorageBinding>,
}

impl SessionPlan {
    pub fn from_config(config: &VkComputeConfig) -> Self {
        Self {
            enable_validation: config.instance.enable_validation,
            shader_path: PathBuf::from(&config.pipeline.shader_path),
            storage: config.pipeline.storage_buffer.then_some(StorageBinding {
                buffer_size: config.pipeline.buffer_size,
            }),
        }
    }

    /// Ordered steps of this plan.
    pub fn steps(&self) -> Vec<Step> {
        ALL_STEPS
            .iter()
            .copied()
            .filter(|step| self.storage.is_some() || !step.is_storage())
            .collect()
    }
}

/// First failed step of a plan run.
#[derive(Debug, thiserror::Error)]
#[error("failed to {step}: {source}")]
pub struct PlanError {
    pub step: Step,
    #[source]
    pub source: SessionError,
}

impl<A: ComputeApi> DeviceSession<A> {
    /// Execute one step with the parameters the plan supplies.
    pub fn execute(&mut self, step: Step, plan: &SessionPlan) -> Result<(), SessionError> {
        let storage = plan.storage.map(|s| s.buffer_size);
        match step {
            Step::CreateInstance => self.create_instance(plan.enable_validation),
            Step::PickPhysicalDevice => self.pick_physical_device(),
            Step::FindQueueFamily => self.find_queue_family(),
            Step::CreateDevice => self.create_device(),
            Step::GetComputeQueue => self.get_compute_queue(),
            Step::CreateShaderModule => self.create_shader_module_from_file(&plan.shader_path),
            Step::CreateDescriptorPool => self.create_descriptor_pool(),
            Step::CreateDescriptorSetLayout => self.create_descriptor_set_layout(),
            Step::AllocateDescriptorSets => self.allocate_descriptor_sets(),
            Step::CreatePipelineLayout => self.create_pipeline_layout(),
            Step::CreatePipeline => self.create_pipeline(),
            Step::CreateBuffer | Step::MapBufferMemory | Step::UpdateDescriptorSets => {
                let Some(size) = storage else {
                    return self.run_step(step, |_| {
                        Err(SessionError::Sequence {
                            step,
                            missing: "a storage binding",
                        })
                    });
                };
                match step {
                    Step::CreateBuffer => self.create_buffer(size),
                    Step::MapBufferMemory => self.map_buffer_memory(size),
                    _ => self.update_descriptor_sets(size),
                }
            }
        }
    }
}

/// Run every step of `plan` in order, calling `on_step` after each one.
/// Stops at the first failure; resources acquired so far stay owned by the
/// session and are released when it is destroyed or dropped.
pub fn run_plan<A, F>(
    session: &mut DeviceSession<A>,
    plan: &SessionPlan,
    mut on_step: F,
) -> Result<(), PlanError>
where
    A: ComputeApi,
    F: FnMut(Step, &Result<(), SessionError>),
{
    let steps = plan.steps();
    info!(
        "running {} setup step(s), storage buffer: {}",
        steps.len(),
        plan.storage.is_some()
    );

    for step in steps {
        let result = session.execute(step, plan);
        on_step(step, &result);
        if let Err(source) = result {
            error!("failed to {}: {}", step, source);
            return Err(PlanError { step, source });
        }
    }

    info!("compute pipeline ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(storage: bool) -> SessionPlan {
        SessionPlan {
            enable_validation: true,
            shader_path: PathBuf::from("compute.spv"),
            storage: storage.then_some(StorageBinding { buffer_size: 1024 }),
        }
    }

    #[test]
    fn storage_plan_runs_every_step_in_dependency_order() {
        assert_eq!(plan(true).steps(), ALL_STEPS.to_vec());
    }

    #[test]
    fn bare_plan_skips_storage_but_still_builds_the_pipeline() {
        let steps = plan(false).steps();
        assert_eq!(
            steps,
            vec![
                Step::CreateInstance,
                Step::PickPhysicalDevice,
                Step::FindQueueFamily,
                Step::CreateDevice,
                Step::GetComputeQueue,
                Step::CreateShaderModule,
                Step::CreatePipelineLayout,
                Step::CreatePipeline,
            ]
        );
    }

    #[test]
    fn plan_follows_config() {
        let mut config = VkComputeConfig::default();
        config.pipeline.storage_buffer = false;
        config.instance.enable_validation = false;
        let plan = SessionPlan::from_config(&config);
        assert!(plan.storage.is_none());
        assert!(!plan.enable_validation);

        let plan = SessionPlan::from_config(&VkComputeConfig::default());
        assert_eq!(plan.storage, Some(StorageBinding { buffer_size: 1024 }));
    }

    #[test]
    fn plan_error_names_the_step() {
        let err = PlanError {
            step: Step::CreateDevice,
            source: SessionError::NoSuitableQueueFamily,
        };
        assert_eq!(
            err.to_string(),
            "failed to create device: no queue family exposes both compute and graphics"
        );
    }
}
