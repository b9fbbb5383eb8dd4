//! Role CRUD and role-linked read visibility.

#![allow(clippy::unwrap_used)]

mod common;

use common::{read_rules, TestCluster};
use regatta_acl::rpc::{
    DeleteRolesByIdRequest, GetRoleByIdRequest, GetRoleByNameRequest, ListRolesRequest, UpsertRolesRequest,
};
use regatta_acl::types::{Policy, PolicyLink, Role, RoleLink};
use smol_str::SmolStr;

#[tokio::test]
async fn role_crud_round_trip() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    cluster.upsert_policies(&mgmt, vec![Policy::new("p1", read_rules())]).await;

    let role = cluster.upsert_role(&mgmt, "ops", &["p1"]).await;
    assert!(!role.id.is_empty());
    assert!(role.create_index > 0);

    let fetched = cluster
        .endpoint
        .get_role_by_name(&GetRoleByNameRequest {
            role_name: "ops".into(),
            opts: cluster.query_as(&mgmt.secret_id),
        })
        .await
        .expect("get succeeds")
        .role
        .expect("role exists");
    assert_eq!(fetched.id, role.id);

    cluster
        .endpoint
        .delete_roles_by_id(&DeleteRolesByIdRequest {
            role_ids: vec![role.id.clone()],
            write: cluster.write_as(&mgmt),
        })
        .await
        .expect("delete succeeds");

    let gone = cluster
        .endpoint
        .get_role_by_id(&GetRoleByIdRequest {
            role_id: role.id.clone(),
            opts: cluster.query_as(&mgmt.secret_id),
        })
        .await
        .expect("get succeeds");
    assert!(gone.role.is_none());
}

#[tokio::test]
async fn duplicate_role_names_conflict() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    cluster.upsert_policies(&mgmt, vec![Policy::new("p1", read_rules())]).await;
    cluster.upsert_role(&mgmt, "ops", &["p1"]).await;

    let duplicate = Role {
        id: SmolStr::default(),
        name: "ops".into(),
        description: String::new(),
        policies: vec![PolicyLink::new("p1")],
        hash: Vec::new(),
        create_index: 0,
        modify_index: 0,
    };
    let err = cluster
        .endpoint
        .upsert_roles(&UpsertRolesRequest {
            roles: vec![duplicate],
            write: cluster.write_as(&mgmt),
        })
        .await
        .expect_err("name collision");
    assert!(err.to_string().contains("role with name ops already exists"));
}

#[tokio::test]
async fn role_upsert_requires_existing_policies() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;

    let role = Role {
        id: SmolStr::default(),
        name: "ops".into(),
        description: String::new(),
        policies: vec![PolicyLink::new("ghost")],
        hash: Vec::new(),
        create_index: 0,
        modify_index: 0,
    };
    let err = cluster
        .endpoint
        .upsert_roles(&UpsertRolesRequest {
            roles: vec![role],
            write: cluster.write_as(&mgmt),
        })
        .await
        .expect_err("missing policy");
    assert!(err.to_string().contains("cannot find policy ghost"));
}

#[tokio::test]
async fn non_management_callers_see_only_linked_roles() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    cluster.upsert_policies(&mgmt, vec![Policy::new("p1", read_rules())]).await;

    let linked = cluster.upsert_role(&mgmt, "linked", &["p1"]).await;
    cluster.upsert_role(&mgmt, "unlinked", &["p1"]).await;

    let token = cluster
        .create_client_token(&mgmt, &[], vec![RoleLink::by_id(linked.id.clone())])
        .await;

    let listed = cluster
        .endpoint
        .list_roles(&ListRolesRequest {
            opts: cluster.query_as(&token.secret_id),
        })
        .await
        .expect("list succeeds");
    let names: Vec<&str> = listed.roles.iter().map(|role| role.name.as_str()).collect();
    assert_eq!(names, vec!["linked"]);

    // Reading the linked role works; the other is denied.
    cluster
        .endpoint
        .get_role_by_id(&GetRoleByIdRequest {
            role_id: linked.id.clone(),
            opts: cluster.query_as(&token.secret_id),
        })
        .await
        .expect("linked read succeeds");

    let unlinked = cluster
        .endpoint
        .get_role_by_name(&GetRoleByNameRequest {
            role_name: "unlinked".into(),
            opts: cluster.query_as(&token.secret_id),
        })
        .await
        .expect_err("unlinked read is denied");
    assert!(unlinked.is_permission_denied());
}
