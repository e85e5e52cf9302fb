use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::types::FunctionDefinition;

use super::builtins::{time, web};

pub const GET_UNIX_TIME: &str = "get_unix_time";
pub const READ_WEB_PAGE: &str = "read_web_page";

/// Built-in function definitions, built once.
static DEFINITIONS: Lazy<Vec<FunctionDefinition>> = Lazy::new(|| {
    vec![
        FunctionDefinition::new(GET_UNIX_TIME, "Returns the current UNIX timestamp."),
        FunctionDefinition::new(
            READ_WEB_PAGE,
            "Fetches a web page and returns its readable text.",
        )
        .with_param("url", "string", "Address of the page to read"),
    ]
});

/// Functions the reference backend can execute on a model's behalf.
pub struct FunctionCatalog {
    client: Client,
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionCatalog {
    pub fn new() -> Self {
        FunctionCatalog {
            client: Client::new(),
        }
    }

    pub fn definitions(&self) -> &[FunctionDefinition] {
        &DEFINITIONS
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        DEFINITIONS.iter().find(|d| d.name == name)
    }

    pub async fn execute(&self, name: &str, args: &HashMap<String, Value>) -> Result<Value> {
        match name {
            GET_UNIX_TIME => Ok(time::unix_time()),
            READ_WEB_PAGE => {
                let url = args
                    .get("url")
                    .and_then(|v| v.as_str())
                    .context("missing url argument")?;
                let text = web::read_page(&self.client, url).await?;
                Ok(json!({ "text": text }))
            }
            _ => Err(anyhow::anyhow!("unknown function: {}", name)),
        }
    }
}
