//! EconBrief Runner — the daily briefing pipeline.
//!
//! Stages, each writing a YAML artifact under the data directory:
//! 1. fetch: upcoming events from the stored market calendars
//! 2. normalize: defaults, tag cleanup, content-hash ids, dedup
//! 3. LLM: six chained reasoning steps
//! 4. validate: schema check and forbidden-keyword scan
//!
//! The execution guard from `econbrief-core` is consulted after every stage.

pub mod artifact;
pub mod config;
pub mod fetch;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod steps;
pub mod validate;

pub use artifact::StageError;
pub use config::{ConfigError, LimitsConfig, PipelineConfig};
pub use llm::{LlmClient, LlmError, LlmResponse, PlaceholderClient};
pub use pipeline::{
    daily_status, run_full_pipeline, run_with_guard, setup_pipeline_guard, PipelineContext,
    RunReport, RunStatus,
};
pub use steps::{PipelineOutput, STEPS};
pub use validate::ValidationReport;

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<PipelineContext>();
        require_sync::<PipelineContext>();
        require_send::<RunReport>();
        require_send::<PipelineConfig>();
        require_sync::<llm::OpenAiClient>();
    }
}
