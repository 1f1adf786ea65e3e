// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for scan job handling: fetch outcome to reconciliation to disposition.

mod common;

use std::sync::Arc;

use colonia_core::Manifest;
use colonia_scan::fetcher::FetchOutcome;
use colonia_scan::handler::{Disposition, FetchErrorPolicy, ScanJobHandler};
use colonia_scan::job::ScanJob;
use wiremock::MockServer;

use common::{ScriptedSource, VPC_MANIFEST, counts, fetcher_for, serve_manifest, sqlite_persistence};

fn body(project_id: i64, repository_url: Option<&str>) -> Vec<u8> {
    serde_json::to_vec(&ScanJob {
        project_id,
        project_name: "infra".to_string(),
        repository_url: repository_url.map(str::to_string),
    })
    .unwrap()
}

fn vpc_manifest() -> Manifest {
    Manifest::from_yaml(VPC_MANIFEST).unwrap().unwrap()
}

#[tokio::test]
async fn test_scan_creates_rows_from_github_manifest() {
    let persistence = sqlite_persistence().await;
    let project = persistence
        .create_project("infra", None, Some("https://github.com/acme/infra"))
        .await
        .unwrap();

    let server = MockServer::start().await;
    serve_manifest(&server, "acme/infra", "main", VPC_MANIFEST).await;

    let handler = ScanJobHandler::new(persistence.clone(), Arc::new(fetcher_for(&server)));
    let disposition = handler
        .handle(&body(project.id, project.repository_url.as_deref()))
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));

    let envs = persistence.list_environments(project.id).await.unwrap();
    assert_eq!(envs[0].name, "dev");
    assert_eq!(envs[0].directory, "envs/dev");
    let stacks = persistence.list_stacks(project.id).await.unwrap();
    assert_eq!(stacks[0].name, "VPC");
    assert_eq!(stacks[0].stack_path, "stacks/vpc");
}

#[tokio::test]
async fn test_deleted_manifest_tears_project_down() {
    let persistence = sqlite_persistence().await;
    let project = persistence.create_project("infra", None, None).await.unwrap();

    let source = ScriptedSource::new([FetchOutcome::Found(vpc_manifest()), FetchOutcome::NotFound]);
    let handler = ScanJobHandler::new(persistence.clone(), source);

    assert_eq!(handler.handle(&body(project.id, None)).await, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));

    assert_eq!(handler.handle(&body(project.id, None)).await, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (0, 0, 0));
}

#[tokio::test]
async fn test_fetch_error_tears_down_by_default() {
    let persistence = sqlite_persistence().await;
    let project = persistence.create_project("infra", None, None).await.unwrap();

    let source = ScriptedSource::new([
        FetchOutcome::Found(vpc_manifest()),
        FetchOutcome::FetchError("rate limited".to_string()),
    ]);
    let handler = ScanJobHandler::new(persistence.clone(), source);
    assert_eq!(handler.fetch_error_policy(), FetchErrorPolicy::Teardown);

    handler.handle(&body(project.id, None)).await;
    let disposition = handler.handle(&body(project.id, None)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (0, 0, 0));
}

#[tokio::test]
async fn test_fetch_error_skip_policy_keeps_rows() {
    let persistence = sqlite_persistence().await;
    let project = persistence.create_project("infra", None, None).await.unwrap();

    let source = ScriptedSource::new([
        FetchOutcome::Found(vpc_manifest()),
        FetchOutcome::FetchError("rate limited".to_string()),
    ]);
    let handler = ScanJobHandler::new(persistence.clone(), source)
        .with_fetch_error_policy(FetchErrorPolicy::Skip);

    handler.handle(&body(project.id, None)).await;
    let disposition = handler.handle(&body(project.id, None)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));
}

#[tokio::test]
async fn test_wrong_layout_manifest_is_rejected_and_keeps_rows() {
    let persistence = sqlite_persistence().await;
    let project = persistence
        .create_project("infra", None, Some("https://github.com/acme/infra"))
        .await
        .unwrap();

    let first = ScanJobHandler::new(
        persistence.clone(),
        ScriptedSource::new([FetchOutcome::Found(vpc_manifest())]),
    );
    assert_eq!(first.handle(&body(project.id, None)).await, Disposition::Ack);
    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));

    let server = MockServer::start().await;
    serve_manifest(&server, "acme/infra", "main", "environments:\n  - dev\nstacks: []\n").await;

    // Teardown is the default policy and must not apply to a layout error.
    let handler = ScanJobHandler::new(persistence.clone(), Arc::new(fetcher_for(&server)));
    let disposition = handler
        .handle(&body(project.id, project.repository_url.as_deref()))
        .await;

    assert!(
        matches!(disposition, Disposition::RejectNoRequeue { .. }),
        "unexpected disposition {:?}",
        disposition
    );
    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));
}

#[tokio::test]
async fn test_malformed_payload_is_rejected_without_fetching() {
    let persistence = sqlite_persistence().await;
    let source = ScriptedSource::empty();
    let handler = ScanJobHandler::new(persistence, source.clone());

    let payloads: [&[u8]; 2] = [b"{not json", br#"{"project_name": "infra"}"#];
    for payload in payloads {
        let disposition = handler.handle(payload).await;
        assert!(
            matches!(disposition, Disposition::RejectNoRequeue { .. }),
            "unexpected disposition {:?}",
            disposition
        );
    }

    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn test_repository_url_is_passed_to_source() {
    let persistence = sqlite_persistence().await;
    let project = persistence.create_project("infra", None, None).await.unwrap();
    let source = ScriptedSource::empty();
    let handler = ScanJobHandler::new(persistence, source.clone());

    handler
        .handle(&body(project.id, Some("https://github.com/acme/infra")))
        .await;

    assert_eq!(
        source.requests(),
        vec![Some("https://github.com/acme/infra".to_string())]
    );
}

#[tokio::test]
async fn test_reconcile_failure_is_rejected() {
    let persistence = sqlite_persistence().await;

    // No project row: inserting environments violates the foreign key.
    let source = ScriptedSource::new([FetchOutcome::Found(vpc_manifest())]);
    let handler = ScanJobHandler::new(persistence.clone(), source);

    let disposition = handler.handle(&body(4242, None)).await;

    let Disposition::RejectNoRequeue { reason } = disposition else {
        panic!("expected rejection, got {:?}", disposition);
    };
    assert!(!reason.is_empty());
    assert_eq!(counts(persistence.as_ref(), 4242).await, (0, 0, 0));
}

#[tokio::test]
async fn test_rescan_with_same_manifest_is_stable() {
    let persistence = sqlite_persistence().await;
    let project = persistence.create_project("infra", None, None).await.unwrap();

    let source = ScriptedSource::new([
        FetchOutcome::Found(vpc_manifest()),
        FetchOutcome::Found(vpc_manifest()),
    ]);
    let handler = ScanJobHandler::new(persistence.clone(), source);

    handler.handle(&body(project.id, None)).await;
    let first = persistence.list_stacks(project.id).await.unwrap();
    handler.handle(&body(project.id, None)).await;
    let second = persistence.list_stacks(project.id).await.unwrap();

    assert_eq!(counts(persistence.as_ref(), project.id).await, (1, 1, 1));
    assert_eq!(first[0].id, second[0].id);
}
