//! Protocol plumbing for the node-graph generation backend: HTTP client,
//! push-channel frame parsing, and artifact extraction from result records.

pub mod client;
pub mod events;
pub mod outputs;

pub use client::{ComfyClient, JobHistory, NodeOutput, OutputFile};
pub use events::PushEvent;
pub use outputs::{extract_artifact, has_any_output, ArtifactRef, ExtractionRule};
