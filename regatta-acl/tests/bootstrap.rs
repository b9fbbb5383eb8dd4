//! Bootstrap single-shot semantics and the reset-file override.

#![allow(clippy::unwrap_used)]

mod common;

use common::TestCluster;
use regatta_acl::rpc::BootstrapRequest;
use regatta_acl::types::{TokenType, BOOTSTRAP_TOKEN_NAME};
use smol_str::SmolStr;

#[tokio::test]
async fn bootstrap_then_reset_then_bootstrap() {
    let cluster = TestCluster::new();

    // First bootstrap succeeds and mints the management token.
    let t1 = cluster.bootstrap().await;
    assert_eq!(t1.name, BOOTSTRAP_TOKEN_NAME);
    assert_eq!(t1.token_type, TokenType::Management);
    assert!(t1.global);
    assert!(!t1.accessor_id.is_empty());
    assert!(!t1.secret_id.is_empty());
    let i1 = t1.create_index;
    assert!(i1 > 0);

    // Second bootstrap without a reset file fails.
    let err = cluster
        .endpoint
        .bootstrap(&BootstrapRequest::default())
        .await
        .expect_err("bootstrap is single-shot");
    assert!(err.to_string().contains("ACL bootstrap already done"));

    // Writing the current watermark re-arms bootstrap exactly once.
    std::fs::write(cluster.reset_file_path(), i1.to_string()).unwrap();

    let t2 = cluster.bootstrap().await;
    assert_ne!(t2.accessor_id, t1.accessor_id);
    assert_ne!(t2.secret_id, t1.secret_id);
    assert!(t2.create_index > i1);

    // The stale reset file (still naming I1) does not authorize a third.
    let err = cluster
        .endpoint
        .bootstrap(&BootstrapRequest::default())
        .await
        .expect_err("stale reset file");
    assert!(err.to_string().contains("ACL bootstrap already done"));
}

#[tokio::test]
async fn malformed_reset_file_does_not_authorize() {
    let cluster = TestCluster::new();
    let t1 = cluster.bootstrap().await;

    std::fs::write(cluster.reset_file_path(), "definitely not a number").unwrap();
    assert!(cluster.endpoint.bootstrap(&BootstrapRequest::default()).await.is_err());

    std::fs::write(cluster.reset_file_path(), (t1.create_index + 7).to_string()).unwrap();
    assert!(cluster.endpoint.bootstrap(&BootstrapRequest::default()).await.is_err());
}

#[tokio::test]
async fn operator_supplied_secret_is_honored() {
    let cluster = TestCluster::new();
    let response = cluster
        .endpoint
        .bootstrap(&BootstrapRequest {
            bootstrap_secret: Some(SmolStr::new("2f4a3b52-c862-4e45-ba47-2bba3716ec76")),
            ..BootstrapRequest::default()
        })
        .await
        .expect("bootstrap succeeds");
    assert_eq!(response.token.secret_id, "2f4a3b52-c862-4e45-ba47-2bba3716ec76");

    // The pinned secret authenticates as management.
    let capability = cluster
        .endpoint
        .resolver()
        .resolve("2f4a3b52-c862-4e45-ba47-2bba3716ec76")
        .expect("resolves");
    assert!(capability.is_management());
}

#[tokio::test]
async fn bootstrap_token_resolves_to_management() {
    let cluster = TestCluster::new();
    let token = cluster.bootstrap().await;
    let capability = cluster.endpoint.resolver().resolve(&token.secret_id).expect("resolves");
    assert!(capability.is_management());
}
