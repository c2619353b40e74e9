use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKind;

/// Identifier of a workspace (the root workspace is `"main"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub const ROOT: &'static str = "main";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable entity identifier of the form `{workspace_id}:{kind}_{nonce}`.
///
/// The workspace prefix namespaces branched copies: when a branch
/// materialises a private copy of a base entity, the copy keeps the
/// `{kind}_{nonce}` local key and swaps the prefix, so the two versions
/// remain correlatable across a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Mint a fresh id in `workspace` for an entity of `kind`.
    pub fn mint(workspace: &WorkspaceId, kind: EntityKind) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("{}:{}_{}", workspace.0, kind.as_str(), nonce))
    }

    /// The workspace prefix, if the id is well-formed.
    pub fn workspace(&self) -> Option<WorkspaceId> {
        self.0
            .split_once(':')
            .map(|(ws, _)| WorkspaceId(ws.to_string()))
    }

    /// The `{kind}_{nonce}` part shared by all versions of this entity
    /// across branches.
    pub fn local_key(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, k)| k)
    }

    /// The entity kind encoded in the id, if parseable.
    pub fn kind(&self) -> Option<EntityKind> {
        let local = self.local_key();
        let tag = local.rsplit_once('_').map(|(k, _)| k)?;
        EntityKind::from_str_tag(tag)
    }

    /// The same local key re-homed under `workspace`.
    pub fn rekey(&self, workspace: &WorkspaceId) -> Self {
        Self(format!("{}:{}", workspace.0, self.local_key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a constraint, `{workspace_id}:constraint_{nonce}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(pub String);

impl ConstraintId {
    pub fn mint(workspace: &WorkspaceId) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("{}:constraint_{}", workspace.0, nonce))
    }

    pub fn local_key(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, k)| k)
    }

    pub fn rekey(&self, workspace: &WorkspaceId) -> Self {
        Self(format!("{}:{}", workspace.0, self.local_key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label of the agent driving a session. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_round_trips_workspace_and_kind() {
        let ws = WorkspaceId::root();
        let id = EntityId::mint(&ws, EntityKind::Point3d);
        assert_eq!(id.workspace(), Some(ws.clone()));
        assert_eq!(id.kind(), Some(EntityKind::Point3d));
        assert!(id.local_key().starts_with("point3d_"));
    }

    #[test]
    fn rekey_preserves_local_key() {
        let id = EntityId::mint(&WorkspaceId::root(), EntityKind::Solid);
        let branch = WorkspaceId::new("b1");
        let copy = id.rekey(&branch);
        assert_eq!(copy.local_key(), id.local_key());
        assert_eq!(copy.workspace(), Some(branch));
        assert_ne!(copy, id);
    }
}
