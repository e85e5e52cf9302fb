use crate::types::FunctionDefinition;

/// Local view of the backend's function catalog.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<FunctionDefinition>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly fetched catalog; every entry starts disabled.
    pub fn replace_all(&mut self, functions: Vec<FunctionDefinition>) {
        self.functions = functions
            .into_iter()
            .map(|f| FunctionDefinition { enabled: false, ..f })
            .collect();
    }

    pub fn list(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Toggle a function. Returns false when no function has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.functions.iter_mut().find(|f| f.name == name) {
            Some(function) => {
                function.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Names of enabled functions, in catalog order.
    pub fn enabled_names(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
