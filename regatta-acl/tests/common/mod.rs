//! Shared in-process cluster harness for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use regatta_acl::compiler::CapabilityCache;
use regatta_acl::config::ConfHandle;
use regatta_acl::error::AclError;
use regatta_acl::fsm::InlineRaft;
use regatta_acl::oidc::OidcProvider;
use regatta_acl::resolver::TokenResolver;
use regatta_acl::rpc::{
    AclEndpoint, BootstrapRequest, ListPoliciesRequest, QueryOptions, TokenInput, UpsertPoliciesRequest,
    UpsertRolesRequest, UpsertTokensRequest, WriteOptions,
};
use regatta_acl::state::StateStore;
use regatta_acl::types::{AuthMethod, Policy, PolicyLink, Role, RoleLink, Token};
use smol_str::SmolStr;
use url::Url;

pub struct TestCluster {
    pub endpoint: AclEndpoint,
    pub store: Arc<StateStore>,
    pub raft: Arc<InlineRaft>,
    pub conf: ConfHandle,
    // Held for its Drop: the bootstrap reset file lives in here.
    pub data_dir: tempfile::TempDir,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_oidc(Arc::new(StubOidc::default()))
    }

    pub fn with_oidc(oidc: Arc<dyn OidcProvider>) -> Self {
        let data_dir = tempfile::tempdir().expect("tempdir");
        let conf = ConfHandle::from_json(&format!(
            r#"{{ "DataDir": {:?}, "ACL": {{ "Enabled": true }} }}"#,
            data_dir.path().to_str().expect("utf8 tempdir")
        ))
        .expect("valid test config");

        let store = Arc::new(StateStore::new());
        let raft = Arc::new(InlineRaft::new(Arc::clone(&store)));

        let resolver = TokenResolver::builder()
            .conf(conf.clone())
            .store(Arc::clone(&store))
            .cache(Arc::new(CapabilityCache::default()))
            .build();

        let endpoint = AclEndpoint::builder()
            .conf(conf.clone())
            .store(Arc::clone(&store))
            .raft(Arc::clone(&raft) as Arc<dyn regatta_acl::fsm::RaftHandle>)
            .resolver(resolver)
            .oidc(oidc)
            .build();

        TestCluster {
            endpoint,
            store,
            raft,
            conf,
            data_dir,
        }
    }

    pub fn reset_file_path(&self) -> std::path::PathBuf {
        self.data_dir.path().join(regatta_acl::bootstrap::RESET_FILE_NAME)
    }

    /// Bootstraps the cluster and returns the management token.
    pub async fn bootstrap(&self) -> Token {
        self.endpoint
            .bootstrap(&BootstrapRequest::default())
            .await
            .expect("bootstrap succeeds")
            .token
    }

    pub fn write_as(&self, token: &Token) -> WriteOptions {
        WriteOptions {
            auth_token: token.secret_id.clone(),
            ..WriteOptions::default()
        }
    }

    pub fn query_as(&self, secret: &str) -> QueryOptions {
        QueryOptions {
            auth_token: SmolStr::new(secret),
            ..QueryOptions::default()
        }
    }

    pub async fn upsert_policies(&self, mgmt: &Token, policies: Vec<Policy>) -> u64 {
        self.endpoint
            .upsert_policies(&UpsertPoliciesRequest {
                policies,
                write: self.write_as(mgmt),
            })
            .await
            .expect("policy upsert succeeds")
            .meta
            .index
    }

    pub async fn upsert_role(&self, mgmt: &Token, name: &str, policies: &[&str]) -> Role {
        let role = Role {
            id: SmolStr::default(),
            name: name.into(),
            description: String::new(),
            policies: policies.iter().map(|name| PolicyLink::new(*name)).collect(),
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        };
        let mut response = self
            .endpoint
            .upsert_roles(&UpsertRolesRequest {
                roles: vec![role],
                write: self.write_as(mgmt),
            })
            .await
            .expect("role upsert succeeds");
        response.roles.remove(0)
    }

    pub async fn create_client_token(&self, mgmt: &Token, policies: &[&str], roles: Vec<RoleLink>) -> Token {
        let input = TokenInput {
            token_type: SmolStr::new("client"),
            policies: policies.iter().map(|name| SmolStr::new(name)).collect(),
            roles,
            ..TokenInput::default()
        };
        let mut response = self
            .endpoint
            .upsert_tokens(&UpsertTokensRequest {
                tokens: vec![input],
                write: self.write_as(mgmt),
            })
            .await
            .expect("token upsert succeeds");
        response.tokens.remove(0)
    }

    pub async fn list_policy_names(&self, secret: &str) -> Vec<String> {
        let response = self
            .endpoint
            .list_policies(&ListPoliciesRequest {
                opts: self.query_as(secret),
            })
            .await
            .expect("list succeeds");
        response.policies.iter().map(|stub| stub.name.to_string()).collect()
    }
}

/// Policy body granting read on the default namespace; enough for most
/// scenarios.
pub fn read_rules() -> String {
    "[namespace.\"default\"]\npolicy = \"read\"\n".to_owned()
}

/// OIDC provider stub returning canned claims.
pub struct StubOidc {
    pub claims: parking_lot::Mutex<serde_json::Value>,
}

impl Default for StubOidc {
    fn default() -> Self {
        StubOidc {
            claims: parking_lot::Mutex::new(serde_json::json!({})),
        }
    }
}

impl StubOidc {
    pub fn with_claims(claims: serde_json::Value) -> Arc<Self> {
        Arc::new(StubOidc {
            claims: parking_lot::Mutex::new(claims),
        })
    }
}

#[async_trait]
impl OidcProvider for StubOidc {
    async fn authorization_endpoint(&self, _method: &AuthMethod) -> Result<Url, AclError> {
        Ok(Url::parse("https://idp.example.com/authorize").expect("static url"))
    }

    async fn exchange(
        &self,
        _method: &AuthMethod,
        _code: &str,
        _nonce: &str,
        _redirect_uri: &Url,
    ) -> Result<serde_json::Value, AclError> {
        Ok(self.claims.lock().clone())
    }
}
