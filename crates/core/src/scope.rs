use serde::{Deserialize, Serialize};

/// Tuple identifying the tenant/user/workspace that owns a persisted row.
///
/// All three components are required and non-empty; cross-scope reads are
/// forbidden everywhere a `Scope` is threaded through the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: String,
    pub user_id: String,
    pub workspace_id: String,
}

/// Error returned when a [`Scope`] component is empty.
#[derive(Debug, thiserror::Error)]
#[error("scope component `{0}` must not be empty")]
pub struct EmptyScopeComponent(pub &'static str);

impl Scope {
    /// Build a scope, rejecting any empty component.
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Result<Self, EmptyScopeComponent> {
        let tenant_id = tenant_id.into();
        let user_id = user_id.into();
        let workspace_id = workspace_id.into();
        if tenant_id.is_empty() {
            return Err(EmptyScopeComponent("tenantId"));
        }
        if user_id.is_empty() {
            return Err(EmptyScopeComponent("userId"));
        }
        if workspace_id.is_empty() {
            return Err(EmptyScopeComponent("workspaceId"));
        }
        Ok(Self { tenant_id, user_id, workspace_id })
    }

    /// A path-safe key for this scope, used to namespace on-disk storage.
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.user_id, self.workspace_id)
    }
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
