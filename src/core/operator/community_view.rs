// Read-only view for the statistics side.
//
// Nothing here writes to the ledger or acts on the platform.

use crate::core::enforcement::{EngineContext, EngineError};
use crate::core::ledger::Ledger;
use crate::core::platform::{EnforcementMode, PlatformClient};
use crate::core::policy::CommunityPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Consumed by the statistics reporter, which runs outside this binary.
#[allow(dead_code)]
pub struct CommunityView<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
}

#[allow(dead_code)]
impl<L: Ledger, P: PlatformClient> CommunityView<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self { ctx }
    }

    pub async fn is_enforced(&self, community: &str) -> Result<bool, EngineError> {
        Ok(self
            .ctx
            .ledger
            .get_community(&community.to_lowercase())
            .await?
            .map_or(false, |c| c.enforced))
    }

    /// Mode label derived from permissions held right now.
    pub async fn get_mode(&self, community: &str) -> Result<&'static str, EngineError> {
        let community = community.to_lowercase();
        if self.ctx.ledger.get_community(&community).await?.is_none() {
            return Ok(EnforcementMode::Unavailable.label());
        }
        let permissions = self.ctx.platform.get_permissions(&community).await?;
        Ok(permissions.mode().label())
    }

    pub async fn get_policy(&self, community: &str) -> Result<Option<CommunityPolicy>, EngineError> {
        Ok(self
            .ctx
            .ledger
            .get_community(&community.to_lowercase())
            .await?
            .map(|c| c.policy))
    }

    pub async fn get_action_counts(
        &self,
        community: &str,
    ) -> Result<BTreeMap<String, u64>, EngineError> {
        Ok(self
            .ctx
            .ledger
            .action_counts(&community.to_lowercase())
            .await?)
    }
}
