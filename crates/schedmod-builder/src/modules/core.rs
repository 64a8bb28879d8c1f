use crate::config::ConfigDoc;
use crate::error::Result;
use crate::modules::Module;
use crate::planner::{Plan, Task};

pub struct CoreModule;

/// Top-level tables a config file may carry.
const KNOWN_TABLES: &[&str] = &[
    "run", "tool", "kernel", "tools", "package", "sandbox", "extract", "source",
];

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _doc: &ConfigDoc) -> bool {
        true
    }

    fn plan(&self, doc: &ConfigDoc, plan: &mut Plan) -> Result<()> {
        if let Some(root) = doc.value.as_table() {
            for key in root.keys() {
                if !KNOWN_TABLES.contains(&key.as_str()) {
                    return Err(crate::Error::config(format!(
                        "config key '{}' is not supported; known tables: {}",
                        key,
                        KNOWN_TABLES.join(", ")
                    )));
                }
            }
        }
        doc.run()?;

        plan.add(Task {
            id: "core.init".into(),
            label: "Init".into(),
            module: self.id().into(),
            phase: "init".into(),
            after: vec![],
            provides: vec!["core:initialized".into()],
        })?;
        Ok(())
    }
}
