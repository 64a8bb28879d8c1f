use crate::error::{Error, Result};
use crate::kernel::{KernelIdentity, KernelInputs};
use crate::pipeline::PipelineDriver;
use crate::profile::{BoundaryConfig, ConfigProfile};
use crate::sandbox::SandboxLayout;

/// What earlier tasks of a run hand to later ones. Each slot is filled by
/// exactly one task; reading an empty slot means the plan ran out of order.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub inputs: Option<KernelInputs>,
    pub identity: Option<KernelIdentity>,
    pub profile: Option<ConfigProfile>,
    pub boundary: Option<BoundaryConfig>,
    pub layout: Option<SandboxLayout>,
    pub driver: Option<PipelineDriver>,
}

fn missing<T>(slot: Option<&T>, what: &str, producer: &str) -> Result<T>
where
    T: Clone,
{
    slot.cloned().ok_or_else(|| {
        Error::sequence(format!("{what} is not available yet; '{producer}' must run first"))
    })
}

impl RunState {
    pub fn require_inputs(&self) -> Result<KernelInputs> {
        missing(self.inputs.as_ref(), "kernel inputs", "kernel.inputs")
    }

    pub fn require_identity(&self) -> Result<KernelIdentity> {
        missing(self.identity.as_ref(), "kernel identity", "kernel.resolve")
    }

    pub fn require_profile(&self) -> Result<ConfigProfile> {
        missing(self.profile.as_ref(), "configuration profile", "kernel.profile")
    }

    pub fn require_boundary(&self) -> Result<BoundaryConfig> {
        missing(self.boundary.as_ref(), "boundary descriptor", "kernel.profile")
    }

    pub fn require_layout(&self) -> Result<SandboxLayout> {
        missing(self.layout.as_ref(), "sandbox layout", "sandbox.create")
    }

    pub fn require_driver(&self) -> Result<PipelineDriver> {
        missing(self.driver.as_ref(), "extraction pipeline", "sandbox.seed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_slots_are_sequence_errors() {
        let s = RunState::default();
        let err = s.require_identity().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequence);
        assert!(err.to_string().contains("kernel.resolve"), "unexpected err: {err}");
        assert!(s.require_driver().is_err());
    }
}
