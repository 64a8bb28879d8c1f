use crate::config::ConfigDoc;
use crate::error::Result;
use crate::planner::Plan;

/// Per-step config table (`[<module>.steps.<step>]`). Steps cannot be
/// disabled; only their label can change.
macro_rules! step_config {
    (#[$($attr:tt)*] $name:ident) => {
        #[$($attr)*]
        #[derive(Debug, Clone, serde::Deserialize)]
        #[serde(default)]
        pub struct $name {
            pub enabled: bool,
            pub label: Option<String>,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    enabled: true,
                    label: None,
                }
            }
        }
    };
}

pub mod core;
pub mod extract;
pub mod kernel;
pub mod package;
pub mod sandbox;
pub mod source;
pub mod util;

pub trait Module {
    fn id(&self) -> &'static str;
    fn detect(&self, doc: &ConfigDoc) -> bool;
    fn plan(&self, doc: &ConfigDoc, plan: &mut Plan) -> Result<()>;
}

pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(core::CoreModule),
        Box::new(kernel::KernelModule),
        Box::new(sandbox::SandboxModule),
        Box::new(extract::ExtractModule),
        Box::new(package::PackageModule),
        Box::new(source::SourceModule),
    ]
}

/// Plan every module that participates in the document's run mode.
pub fn build_plan(doc: &ConfigDoc) -> Result<Plan> {
    let mut plan = Plan::default();
    for m in builtin_modules() {
        if m.detect(doc) {
            m.plan(doc, &mut plan)?;
        }
    }
    Ok(plan)
}
