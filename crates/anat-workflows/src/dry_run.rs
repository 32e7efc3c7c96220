//! Placeholder executors for exercising a plan without the imaging tools
//!
//! Every unit answers with one synthetic path per output port, named after
//! the node that produced it, so the data flow through expansions and joins
//! can be inspected end to end.

use std::sync::Arc;

use pipeline_engine::{PortValues, SyncCallbackUnitExecutor, UnitRegistry};

/// The built-in registry with a placeholder executor on every unit type
pub fn dry_run_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::with_builtins();
    let unit_types: Vec<String> = registry.unit_types().into_iter().map(String::from).collect();
    for unit_type in unit_types {
        let Some(metadata) = registry.get_metadata(&unit_type).cloned() else {
            continue;
        };
        let executor = SyncCallbackUnitExecutor::new(move |node, _inputs| {
            let outputs: PortValues = metadata
                .outputs
                .iter()
                .map(|port| {
                    let value = format!("{}/{}", node.name, port.id);
                    let value = if port.list {
                        serde_json::json!([value])
                    } else {
                        serde_json::json!(value)
                    };
                    (port.id.clone(), value)
                })
                .collect();
            log::trace!("dry run: {} -> {} output(s)", node.name, outputs.len());
            Ok(outputs)
        });
        registry.set_executor(&unit_type, Arc::new(executor));
    }
    registry
}
