pub mod api;
pub mod discovery;
pub mod error;
pub mod plan;
pub mod selection;
pub mod session;
pub mod shader;

pub use api::{AshApi, ComputeApi};
pub use error::{DescriptorObject, SessionError};
pub use plan::{run_plan, PlanError, SessionPlan, Step, StorageBinding};
pub use session::{DeviceSession, SessionStatus};
