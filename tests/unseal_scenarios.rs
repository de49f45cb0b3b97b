//! End-to-end unseal runs against mock nodes

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use vault_unsealer::config::{Datacenter, HostRef, KeyRef};
use vault_unsealer::keys::{KeyDecryptor, KeyResolver};
use vault_unsealer::logging::MemoryReporter;
use vault_unsealer::unseal::{DatacenterOrchestrator, HostFailure, HostResult, Phase, Selector};
use vault_unsealer::vault::{ConnectOptions, MockCall, MockConnector, MockNode};
use vault_unsealer::UnsealerError;

fn datacenter(name: &str, keys: &[&str], hosts: &[&str]) -> Datacenter {
    Datacenter {
        name: name.to_string(),
        keys: keys.iter().map(|k| KeyRef::new(*k)).collect(),
        hosts: hosts.iter().map(|h| HostRef::new(*h, 8200)).collect(),
    }
}

fn orchestrator(
    connector: &MockConnector,
    resolver: KeyResolver,
) -> (DatacenterOrchestrator<MockConnector>, Arc<MemoryReporter>) {
    let reporter = Arc::new(MemoryReporter::new());
    let orchestrator = DatacenterOrchestrator::new(
        Arc::new(connector.clone()),
        ConnectOptions::default(),
        resolver,
        reporter.clone(),
    );
    (orchestrator, reporter)
}

async fn unseal(
    connector: &MockConnector,
    datacenters: &[Datacenter],
    selector: &str,
) -> (Vec<HostResult>, Arc<MemoryReporter>) {
    let (orchestrator, reporter) = orchestrator(connector, KeyResolver::plaintext());
    let results = orchestrator.run(datacenters, &Selector::new(selector)).await;
    (results, reporter)
}

fn unseal_calls(connector: &MockConnector, host: &str) -> usize {
    connector
        .calls_for(host)
        .iter()
        .filter(|c| matches!(c, MockCall::Unseal { .. }))
        .count()
}

/// Values prefixed with `enc:` are encrypted; `enc:broken` cannot be decrypted.
struct TestDecryptor;

#[async_trait]
impl KeyDecryptor for TestDecryptor {
    fn is_encrypted_reference(&self, raw: &str) -> bool {
        raw.starts_with("enc:")
    }

    async fn decrypt(&self, raw: &str) -> vault_unsealer::Result<String> {
        match raw.trim_start_matches("enc:") {
            "broken" => Err(UnsealerError::Decrypt("no secret key".to_string())),
            rest => Ok(format!("decrypted-{rest}")),
        }
    }
}

#[tokio::test]
async fn scenario_a_single_key_unseals() {
    let connector = MockConnector::new().with_node("vault-1", MockNode::new(1));
    let dcs = vec![datacenter("dc1", &["share-one"], &["vault-1"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    let outcome = results[0].as_ref().unwrap();
    assert!(!outcome.sealed);
    assert_eq!(connector.submitted_keys("vault-1"), vec!["share-one"]);
    assert_eq!(reporter.messages_for("vault-1"), vec!["Vault is unsealed!"]);
}

#[tokio::test]
async fn scenario_b_uninitialized_node_gets_no_keys() {
    let connector = MockConnector::new().with_node("vault-1", MockNode::new(1).uninitialized());
    let dcs = vec![datacenter("dc1", &["share-one", "share-two"], &["vault-1"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.failure, HostFailure::NotInitialized);
    assert_eq!(unseal_calls(&connector, "vault-1"), 0);
    assert_eq!(
        reporter.messages_for("vault-1"),
        vec!["Vault is not ready to be unsealed"]
    );
}

#[tokio::test]
async fn scenario_c_failed_second_share_keeps_first_progress() {
    let connector =
        MockConnector::new().with_node("vault-1", MockNode::new(2).failing_submission(1));
    let dcs = vec![datacenter("dc1", &["share-one", "share-two"], &["vault-1"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.phase(), Phase::Submit);
    match &err.failure {
        HostFailure::Submit {
            failures,
            last_status,
            ..
        } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].position, 2);
            assert!(last_status.sealed);
            assert_eq!(last_status.progress, 1);
            assert_eq!(last_status.threshold, 2);
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(
        reporter.messages_for("vault-1"),
        vec!["Error running unseal operation", "Unseal operation performed"]
    );
}

#[tokio::test]
async fn scenario_d_no_keys_configured() {
    let connector = MockConnector::new().with_node("vault-1", MockNode::new(1));
    let dcs = vec![datacenter("dc1", &[], &["vault-1"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    assert_eq!(results[0].as_ref().unwrap_err().failure, HostFailure::NoKey);
    assert_eq!(unseal_calls(&connector, "vault-1"), 0);
    assert_eq!(reporter.messages_for("vault-1"), vec!["No Key Provided"]);
}

#[tokio::test]
async fn scenario_e_selector_limits_contacted_hosts() {
    let connector = MockConnector::new()
        .with_node("vault-1.dc1", MockNode::new(1))
        .with_node("vault-1.dc2", MockNode::new(1))
        .with_node("vault-2.dc2", MockNode::new(1));
    let dcs = vec![
        datacenter("dc1", &["k1"], &["vault-1.dc1"]),
        datacenter("dc2", &["k2"], &["vault-1.dc2", "vault-2.dc2"]),
    ];

    let (results, _) = unseal(&connector, &dcs, "dc2").await;

    assert_eq!(results.len(), 2);
    assert!(connector.calls_for("vault-1.dc1").is_empty());
    assert_eq!(connector.submitted_keys("vault-1.dc2"), vec!["k2"]);
    assert_eq!(connector.submitted_keys("vault-2.dc2"), vec!["k2"]);
}

#[tokio::test]
async fn empty_selector_processes_every_datacenter() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(1))
        .with_node("b", MockNode::new(1))
        .with_node("c", MockNode::new(1));
    let dcs = vec![
        datacenter("dc1", &["k1"], &["a"]),
        datacenter("dc2", &["k2"], &["b", "c"]),
    ];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
    let summary = reporter.summary().unwrap();
    assert_eq!(summary.unsealed, 3);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn shares_are_submitted_in_configured_order() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(5))
        .with_node("b", MockNode::new(5));
    let dcs = vec![datacenter("dc1", &["k3", "k1", "k2"], &["a", "b"])];

    unseal(&connector, &dcs, "").await;

    assert_eq!(connector.submitted_keys("a"), vec!["k3", "k1", "k2"]);
    assert_eq!(connector.submitted_keys("b"), vec!["k3", "k1", "k2"]);
}

#[tokio::test]
async fn submission_continues_after_failure() {
    let connector = MockConnector::new().with_node("a", MockNode::new(2).failing_submission(0));
    let dcs = vec![datacenter("dc1", &["k1", "k2", "k3"], &["a"])];

    let (results, _) = unseal(&connector, &dcs, "").await;

    assert_eq!(connector.submitted_keys("a"), vec!["k1", "k2", "k3"]);
    // k2 and k3 reach the threshold of two even though k1 failed.
    match &results[0].as_ref().unwrap_err().failure {
        HostFailure::Submit { last_status, .. } => assert!(!last_status.sealed),
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn all_failed_submissions_are_an_error_not_a_crash() {
    let connector = MockConnector::new().with_node(
        "a",
        MockNode::new(2).failing_submission(0).failing_submission(1),
    );
    let dcs = vec![datacenter("dc1", &["k1", "k2"], &["a"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    match &results[0].as_ref().unwrap_err().failure {
        HostFailure::AllSubmissionsFailed {
            failures,
            attempted,
        } => {
            assert_eq!(*attempted, 2);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(
        reporter.messages_for("a").last().map(String::as_str),
        Some("No unseal submission succeeded")
    );
}

#[tokio::test]
async fn final_state_comes_from_last_submission() {
    // Threshold 2 with three shares: the second share unseals, the third
    // lands on an unsealed node and reports unsealed again.
    let connector = MockConnector::new().with_node("a", MockNode::new(2));
    let dcs = vec![datacenter("dc1", &["k1", "k2", "k3"], &["a"])];

    let (results, _) = unseal(&connector, &dcs, "").await;
    assert!(!results[0].as_ref().unwrap().sealed);

    // With threshold 4 the first response is sealed at 1/4, the last at 3/4.
    let connector = MockConnector::new().with_node("b", MockNode::new(4));
    let dcs = vec![datacenter("dc1", &["k1", "k2", "k3"], &["b"])];

    let (results, _) = unseal(&connector, &dcs, "").await;
    let outcome = results[0].as_ref().unwrap();
    assert!(outcome.sealed);
    assert_eq!(outcome.progress, 3);
}

#[tokio::test]
async fn one_failing_host_does_not_affect_siblings() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(1))
        .with_node("b", MockNode::new(1).with_connect_error("certificate unknown"))
        .with_node("c", MockNode::new(1));
    let dcs = vec![datacenter("dc1", &["k1"], &["a", "b", "c"])];

    let (results, reporter) = unseal(&connector, &dcs, "").await;

    assert!(results[0].is_ok());
    assert_eq!(results[1].as_ref().unwrap_err().phase(), Phase::Connect);
    assert!(results[2].is_ok());
    assert_eq!(reporter.messages_for("b"), vec!["Failed to connect to Vault"]);
}

#[tokio::test]
async fn hosts_run_concurrently_within_a_datacenter() {
    let latency = Duration::from_millis(50);
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(1).with_latency(latency))
        .with_node("b", MockNode::new(1).with_latency(latency))
        .with_node("c", MockNode::new(1).with_latency(latency));
    let dcs = vec![datacenter("dc1", &["k1"], &["a", "b", "c"])];

    unseal(&connector, &dcs, "").await;

    assert_eq!(connector.max_in_flight(), 3);
}

#[tokio::test]
async fn datacenters_run_one_after_another() {
    let latency = Duration::from_millis(20);
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(1).with_latency(latency))
        .with_node("b", MockNode::new(1).with_latency(latency))
        .with_node("c", MockNode::new(1));
    let dcs = vec![
        datacenter("dc1", &["k1"], &["a", "b"]),
        datacenter("dc2", &["k2"], &["c"]),
    ];

    unseal(&connector, &dcs, "").await;

    let calls = connector.calls();
    let first_dc2 = calls.iter().position(|c| c.host() == "c").unwrap();
    let last_dc1 = calls
        .iter()
        .rposition(|c| c.host() == "a" || c.host() == "b")
        .unwrap();
    assert!(last_dc1 < first_dc2);
}

#[tokio::test]
async fn encrypted_shares_are_decrypted_once_per_datacenter() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(2))
        .with_node("b", MockNode::new(2));
    let dcs = vec![datacenter("dc1", &["plain", "enc:secret"], &["a", "b"])];

    let (orchestrator, _) = orchestrator(&connector, KeyResolver::new(Arc::new(TestDecryptor)));
    let results = orchestrator.run(&dcs, &Selector::all()).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(connector.submitted_keys("a"), vec!["plain", "decrypted-secret"]);
    assert_eq!(connector.submitted_keys("b"), vec!["plain", "decrypted-secret"]);
}

#[tokio::test]
async fn resolution_failure_skips_only_that_datacenter() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(1))
        .with_node("b", MockNode::new(1))
        .with_node("c", MockNode::new(1));
    let dcs = vec![
        datacenter("dc1", &["plain", "enc:broken"], &["a", "b"]),
        datacenter("dc2", &["k2"], &["c"]),
    ];

    let (orchestrator, reporter) =
        orchestrator(&connector, KeyResolver::new(Arc::new(TestDecryptor)));
    let results = orchestrator.run(&dcs, &Selector::all()).await;

    assert_eq!(results.len(), 3);
    for result in &results[..2] {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.phase(), Phase::Resolve);
        match &err.failure {
            HostFailure::Resolution(e) => {
                assert_eq!(e.position, 2);
                assert!(e.cause.contains("no secret key"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }
    assert!(connector.calls_for("a").is_empty());
    assert!(connector.calls_for("b").is_empty());
    assert!(results[2].is_ok());
    assert_eq!(
        reporter.messages_for("a"),
        vec!["Failed to resolve unseal keys"]
    );
    assert_eq!(reporter.summary().unwrap().failed, 2);
}

#[tokio::test]
async fn status_command_never_submits() {
    let connector = MockConnector::new()
        .with_node("a", MockNode::new(3))
        .with_node("b", MockNode::new(3).uninitialized());
    let dcs = vec![datacenter("dc1", &["k1"], &["a", "b"])];

    let (orchestrator, reporter) = orchestrator(&connector, KeyResolver::plaintext());
    let results = orchestrator.status(&dcs, &Selector::all()).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].as_ref().unwrap().status.sealed);
    assert!(!results[1].as_ref().unwrap().status.initialized);
    assert_eq!(unseal_calls(&connector, "a"), 0);
    assert_eq!(unseal_calls(&connector, "b"), 0);
    assert_eq!(reporter.messages_for("a"), vec!["Vault is sealed"]);
    assert_eq!(reporter.messages_for("b"), vec!["Vault is not initialized"]);
}
