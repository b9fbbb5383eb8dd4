use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindType {
    Policy,
    Role,
    Management,
}

/// Maps verified identity-provider claims to local grants.
///
/// All rules of an auth method are evaluated at login; every rule whose
/// selector matches contributes a binding, with `management` superseding all
/// policy and role bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BindingRule {
    #[serde(rename = "ID", default)]
    pub id: SmolStr,
    #[serde(default)]
    pub description: String,
    /// Name of the auth method this rule belongs to.
    pub auth_method: SmolStr,
    /// Selector over the mapped claim fields; empty matches every login.
    #[serde(default)]
    pub selector: String,
    /// Kept as the raw wire string so that a missing value is reported as
    /// `bind type is missing` rather than a decode failure.
    #[serde(default)]
    pub bind_type: String,
    /// Target policy or role name; ignored for `management` bindings.
    #[serde(default)]
    pub bind_name: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl BindingRule {
    pub fn new(auth_method: impl Into<SmolStr>, bind_type: BindType, bind_name: impl Into<String>) -> Self {
        BindingRule {
            id: SmolStr::new(Uuid::new_v4().to_string()),
            description: String::new(),
            auth_method: auth_method.into(),
            selector: String::new(),
            bind_type: match bind_type {
                BindType::Policy => "policy".to_owned(),
                BindType::Role => "role".to_owned(),
                BindType::Management => "management".to_owned(),
            },
            bind_name: bind_name.into(),
            create_index: 0,
            modify_index: 0,
        }
    }

    pub fn parsed_bind_type(&self) -> Option<BindType> {
        match self.bind_type.as_str() {
            "policy" => Some(BindType::Policy),
            "role" => Some(BindType::Role),
            "management" => Some(BindType::Management),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_type_round_trip() {
        for (raw, parsed) in [
            ("policy", BindType::Policy),
            ("role", BindType::Role),
            ("management", BindType::Management),
        ] {
            let rule = BindingRule::new("m", parsed, "x");
            assert_eq!(rule.bind_type, raw);
            assert_eq!(rule.parsed_bind_type(), Some(parsed));
        }

        let mut rule = BindingRule::new("m", BindType::Policy, "x");
        rule.bind_type = String::new();
        assert_eq!(rule.parsed_bind_type(), None);
    }
}
