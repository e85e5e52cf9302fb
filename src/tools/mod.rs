pub mod builtins;
pub mod registry;

pub use registry::{FunctionCatalog, GET_UNIX_TIME, READ_WEB_PAGE};
