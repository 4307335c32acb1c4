use async_trait::async_trait;

/// Whether an organization may trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    pub has_access: bool,
}

/// Billing-side check consulted before triggering in non-development
/// environments. A `None` reply means the service has no opinion and access
/// is granted.
#[async_trait]
pub trait EntitlementClient: Send + Sync {
    async fn current_entitlement(&self, organization_id: &str)
        -> anyhow::Result<Option<Entitlement>>;
}

/// Entitlement client that grants every organization access. Useful for
/// self-hosted deployments without billing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAllEntitlements;

#[async_trait]
impl EntitlementClient for GrantAllEntitlements {
    async fn current_entitlement(
        &self,
        _organization_id: &str,
    ) -> anyhow::Result<Option<Entitlement>> {
        Ok(Some(Entitlement { has_access: true }))
    }
}
