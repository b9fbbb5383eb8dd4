//! Long-poll behavior of the list endpoints.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::{Duration, Instant};

use common::{read_rules, TestCluster};
use regatta_acl::rpc::{DeletePoliciesRequest, ListPoliciesRequest, ListTokensRequest, QueryOptions};
use regatta_acl::types::Policy;
use smol_str::SmolStr;

#[tokio::test]
async fn blocking_query_wakes_on_delete() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    let index = cluster.upsert_policies(&mgmt, vec![Policy::new("p", read_rules())]).await;

    // Delete the policy shortly after the long-poll parks.
    let endpoint = cluster.endpoint.clone();
    let write = cluster.write_as(&mgmt);
    let deleter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        endpoint
            .delete_policies(&DeletePoliciesRequest {
                names: vec![SmolStr::new("p")],
                write,
            })
            .await
            .expect("delete succeeds")
    });

    let started = Instant::now();
    let response = cluster
        .endpoint
        .list_policies(&ListPoliciesRequest {
            opts: QueryOptions {
                min_query_index: index,
                max_query_time_ms: 60_000,
                auth_token: mgmt.secret_id.clone(),
                ..QueryOptions::default()
            },
        })
        .await
        .expect("list succeeds");

    let delete = deleter.await.expect("deleter finishes");
    assert!(response.policies.is_empty());
    assert_eq!(response.meta.index, delete.meta.index);
    assert!(response.meta.index > index);
    // Woke on the mutation, not on the one-minute deadline.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn deadline_returns_current_result_and_index() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    let index = cluster.upsert_policies(&mgmt, vec![Policy::new("p", read_rules())]).await;

    let started = Instant::now();
    let response = cluster
        .endpoint
        .list_policies(&ListPoliciesRequest {
            opts: QueryOptions {
                min_query_index: index,
                max_query_time_ms: 100,
                auth_token: mgmt.secret_id.clone(),
                ..QueryOptions::default()
            },
        })
        .await
        .expect("list succeeds");

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(response.meta.index, index);
    assert_eq!(response.policies.len(), 1);
}

#[tokio::test]
async fn stale_floor_replies_immediately() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    let index = cluster.upsert_policies(&mgmt, vec![Policy::new("p", read_rules())]).await;

    let started = Instant::now();
    let response = cluster
        .endpoint
        .list_policies(&ListPoliciesRequest {
            opts: QueryOptions {
                min_query_index: index - 1,
                max_query_time_ms: 60_000,
                auth_token: mgmt.secret_id.clone(),
                ..QueryOptions::default()
            },
        })
        .await
        .expect("list succeeds");

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(response.meta.index, index);
}

#[tokio::test]
async fn token_listing_blocks_on_token_mutations() {
    let cluster = TestCluster::new();
    let mgmt = cluster.bootstrap().await;
    let tokens_index = cluster.store.snapshot().index(regatta_acl::state::TableId::Tokens);

    let endpoint = cluster.endpoint.clone();
    let mgmt_clone = mgmt.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // A token create is a Tokens-table mutation; the blocked list must
        // observe it.
        let cluster_token = regatta_acl::rpc::TokenInput {
            token_type: SmolStr::new("client"),
            ..regatta_acl::rpc::TokenInput::default()
        };
        endpoint
            .upsert_tokens(&regatta_acl::rpc::UpsertTokensRequest {
                tokens: vec![cluster_token],
                write: regatta_acl::rpc::WriteOptions {
                    auth_token: mgmt_clone.secret_id.clone(),
                    ..regatta_acl::rpc::WriteOptions::default()
                },
            })
            .await
            .expect("token create succeeds")
    });

    let response = cluster
        .endpoint
        .list_tokens(&ListTokensRequest {
            global_only: false,
            opts: QueryOptions {
                min_query_index: tokens_index,
                max_query_time_ms: 60_000,
                auth_token: mgmt.secret_id.clone(),
                ..QueryOptions::default()
            },
        })
        .await
        .expect("list succeeds");

    writer.await.expect("writer finishes");
    assert!(response.meta.index > tokens_index);
    assert_eq!(response.tokens.len(), 2);
}
