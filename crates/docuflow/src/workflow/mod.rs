pub mod model;
pub mod registry;
pub mod review;

pub use model::{
    CancelSignal, DecisionSignal, ReviewDecision, ReviewStatus, ReviewWorkflowConfig,
    ReviewWorkflowInput, ReviewWorkflowOutput, WorkflowFeatures,
};
pub use registry::WorkflowRegistry;
pub use review::{ReviewWorkflow, ReviewWorkflowDeps, ReviewWorkflowHandle};
