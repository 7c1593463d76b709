//! Operator control of the commissioning flag.
//!
//! The bridge node has no fabric controller of its own, so an operator marks
//! it commissioned or decommissioned at startup with `--commission`. The
//! change goes through [`LocalNode::set_commissioned`], which persists it and
//! emits the matching lifecycle event.

use clap::ValueEnum;
use tracing::info;

use ruuvi_bridge_core::{CommissioningSource, LocalNode, PublishError};

/// Commissioning state requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommissionOverride {
    /// Mark the bridge as joined to a fabric
    Commissioned,
    /// Remove the bridge from its fabric and offer the pairing codes again
    Decommissioned,
}

impl CommissionOverride {
    fn commissioned(self) -> bool {
        matches!(self, Self::Commissioned)
    }
}

/// Apply an operator override to the node.
///
/// Returns whether the flag changed.
pub async fn apply_override(
    node: &LocalNode,
    requested: Option<CommissionOverride>,
) -> Result<bool, PublishError> {
    let Some(requested) = requested else {
        return Ok(false);
    };

    if node.is_commissioned() == requested.commissioned() {
        info!("Commissioning override {:?} already in effect", requested);
        return Ok(false);
    }

    node.set_commissioned(requested.commissioned()).await?;
    info!("Commissioning override applied: {:?}", requested);
    Ok(true)
}
