use serde::{Deserialize, Serialize};

/// Per-call inference parameters.
///
/// Serialized with the short names inference servers use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationOptions {
    #[serde(rename = "num_gpu")]
    pub gpu_layers: u32,
    #[serde(rename = "num_ctx")]
    pub context_window: u32,
    #[serde(rename = "functions")]
    pub enabled_functions: Vec<String>,
    #[serde(rename = "stream")]
    pub streaming_enabled: bool,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        InvocationOptions {
            gpu_layers: 100,
            context_window: 8096,
            enabled_functions: Vec::new(),
            streaming_enabled: true,
        }
    }
}

impl InvocationOptions {
    pub fn uses_functions(&self) -> bool {
        !self.enabled_functions.is_empty()
    }
}
