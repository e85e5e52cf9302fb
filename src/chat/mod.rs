pub mod aggregator;
pub mod functions;
pub mod registry;

pub use aggregator::{drain, merge_fragment};
pub use functions::FunctionRegistry;
pub use registry::{SessionEvent, SessionRegistry, DEFAULT_TITLE};
