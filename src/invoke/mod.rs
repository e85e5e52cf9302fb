pub mod backend;
pub mod orchestrator;
pub mod retrieval;

pub use backend::{
    FragmentSender, Generation, InferenceBackend, RetrievalRequest, RunRequest, StopRequest,
};
pub use orchestrator::{prepare_options, Orchestrator, OLLAMA_PROVIDER};
pub use retrieval::RetrievalAugmenter;
