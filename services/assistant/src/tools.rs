//! Built-in tools exposed to the model.

use anyhow::{Context, anyhow};
use aria_realtime::{ToolDefinition, ToolRegistry};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory key-value store shared by the `remember` and `recall` tools.
/// Lives for the process lifetime; nothing is persisted.
type MemoryStore = Arc<Mutex<HashMap<String, String>>>;

/// Builds the registry of built-in tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let store: MemoryStore = Arc::default();

    registry.register(
        ToolDefinition::function(
            "get_time",
            "Get the current local date and time",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        Arc::new(|_: Value| async move {
            Ok::<_, anyhow::Error>(
                chrono::Local::now()
                    .format("It is %A, %B %e, %Y at %l:%M %p")
                    .to_string(),
            )
        }),
    );

    let remember_store = store.clone();
    registry.register(
        ToolDefinition::function(
            "remember",
            "Store a fact under a short key for later recall",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Short label for the fact"},
                    "value": {"type": "string", "description": "The fact to store"}
                },
                "required": ["key", "value"]
            }),
        ),
        Arc::new(move |args: Value| {
            let store = remember_store.clone();
            async move {
                let key = args["key"]
                    .as_str()
                    .context("`key` is required")?
                    .to_string();
                let value = args["value"]
                    .as_str()
                    .context("`value` is required")?
                    .to_string();
                store
                    .lock()
                    .map_err(|_| anyhow!("memory store poisoned"))?
                    .insert(key.clone(), value);
                Ok(format!("Remembered '{key}'."))
            }
        }),
    );

    let recall_store = store;
    registry.register(
        ToolDefinition::function(
            "recall",
            "Look up a previously remembered fact by its key",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "The label the fact was stored under"}
                },
                "required": ["key"]
            }),
        ),
        Arc::new(move |args: Value| {
            let store = recall_store.clone();
            async move {
                let key = args["key"].as_str().context("`key` is required")?;
                let stored = store
                    .lock()
                    .map_err(|_| anyhow!("memory store poisoned"))?
                    .get(key)
                    .cloned();
                Ok(match stored {
                    Some(value) => value,
                    None => format!("Nothing is stored under '{key}'."),
                })
            }
        }),
    );

    registry
}
