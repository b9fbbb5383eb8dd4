use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

use super::{serde_hash, ContentHasher};

/// An ordered set of policy references shared by many tokens.
///
/// Policy links are by name only; a link to a deleted policy stays in place
/// and simply confers nothing at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    #[serde(rename = "ID", default)]
    pub id: SmolStr,
    pub name: SmolStr,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policies: Vec<PolicyLink>,
    #[serde(default, with = "serde_hash")]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyLink {
    pub name: SmolStr,
}

impl Role {
    pub fn new(name: impl Into<SmolStr>, policies: Vec<PolicyLink>) -> Self {
        let mut role = Role {
            id: SmolStr::new(Uuid::new_v4().to_string()),
            name: name.into(),
            description: String::new(),
            policies,
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        };
        role.set_hash();
        role
    }

    pub fn compute_hash(&self) -> Vec<u8> {
        let mut hasher = ContentHasher::new().field(&self.name).field(&self.description);
        for link in &self.policies {
            hasher = hasher.field(&link.name);
        }
        hasher.finish()
    }

    pub fn set_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn policy_names(&self) -> impl Iterator<Item = &SmolStr> {
        self.policies.iter().map(|link| &link.name)
    }
}

impl PolicyLink {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        PolicyLink { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_link_order() {
        let a = Role::new("ops", vec![PolicyLink::new("p1"), PolicyLink::new("p2")]);
        let b = Role::new("ops", vec![PolicyLink::new("p2"), PolicyLink::new("p1")]);
        assert_ne!(a.hash, b.hash);
    }
}
