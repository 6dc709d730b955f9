//! Evaluation metrics and the training pipeline.

pub mod metrics;
pub mod pipeline;

pub use metrics::ClassificationMetrics;
pub use pipeline::{
    FailurePolicy, MODEL_ARTIFACT_PATH, ModelOutcome, ModelResult, PipelineConfig, PipelineReport,
    TrainingPipeline,
};
