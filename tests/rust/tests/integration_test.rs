use anyhow::Result;
use communicator::{Communicator, DriverConfig, HttpCommunicator, HttpTransport, JobOutcome, WorkerDriver};
use coordinator::{CoordinatorServer, CoordinatorService, StatusResponse};
use relay_core::{Error, FinalResult, Message};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type ServerHandle = JoinHandle<relay_core::Result<Option<FinalResult>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// Helper to start a coordinator on a free port and return its url, service and task
async fn start_coordinator() -> Result<(String, CoordinatorService, ServerHandle)> {
    init_tracing();
    let port = portpicker::pick_unused_port().ok_or_else(|| anyhow::anyhow!("No ports free"))?;
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;

    let service = CoordinatorService::new();
    let server = CoordinatorServer::new(service.clone());
    let handle = tokio::spawn(server.serve(listener));

    Ok((format!("http://127.0.0.1:{}/", port), service, handle))
}

fn client(url: &str) -> Result<HttpCommunicator> {
    let transport = HttpTransport::new(url, Some(Duration::from_secs(10)))?;
    Ok(Communicator::new(transport))
}

#[tokio::test]
async fn test_two_worker_scenario() -> Result<()> {
    let (url, _service, handle) = start_coordinator().await?;

    let mut w1 = client(&url)?;
    let mut w2 = client(&url)?;
    assert_eq!(w1.register().await?, 1);
    assert_eq!(w2.register().await?, 2);

    w1.broadcast(json!({"x": 1})).await?;
    assert_eq!(w2.check_messages().await?, vec![json!({"x": 1})]);
    assert!(w1.check_messages().await?.is_empty());

    w2.report_finished(json!({"status": "ok"})).await?;
    assert!(!w1.ping().await?);
    assert!(!w2.ping().await?);

    w1.unregister().await?;
    w2.unregister().await?;

    let result = tokio::time::timeout(Duration::from_secs(10), handle).await???;
    let result = result.ok_or_else(|| anyhow::anyhow!("no final result"))?;
    assert_eq!(result.to_string(), "status: ok");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_registration_over_http() -> Result<()> {
    let (url, service, _handle) = start_coordinator().await?;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let mut comm = client(&url)?;
            let id = comm.register().await?;
            anyhow::Ok(id)
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await??);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=16).collect::<Vec<_>>());
    assert_eq!(service.roster().worker_count(), 16);
    Ok(())
}

#[tokio::test]
async fn test_unicast_and_address_errors() -> Result<()> {
    let (url, _service, _handle) = start_coordinator().await?;

    let mut a = client(&url)?;
    let mut b = client(&url)?;
    let mut c = client(&url)?;
    a.register().await?;
    let b_id = b.register().await?;
    c.register().await?;

    a.unicast(b_id, json!("lemma-7")).await?;
    let mail = b.check_mail().await?;
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].sender_id, 1);
    assert_eq!(mail[0].body, json!("lemma-7"));
    assert!(c.check_messages().await?.is_empty());

    match a.unicast(42, json!(1)).await {
        Err(Error::Rejected { status, kind, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(kind, "address_error");
        }
        other => panic!("expected address error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_protocol_violations_over_http() -> Result<()> {
    let (url, service, _handle) = start_coordinator().await?;
    let http = reqwest::Client::new();

    // Unregistered sender
    let response = http.post(&url).json(&Message::ping(7)).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "protocol_violation");

    // Malformed JSON
    let response = http.post(&url).body("[1, 2").send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // Unknown request type
    let response = http
        .post(&url)
        .json(&json!({
            "messageType": "REQUEST",
            "requestType": "gossip",
            "senderId": 1,
        }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let status: StatusResponse = http
        .get(format!("{}status", url))
        .send()
        .await?
        .json()
        .await?;
    assert!(status.workers.is_empty());
    assert!(!status.done);
    assert_eq!(service.metrics().get_error_count("ping"), 1);
    Ok(())
}

#[tokio::test]
async fn test_crash_and_unregister_end_run_without_result() -> Result<()> {
    let (url, service, handle) = start_coordinator().await?;

    let mut a = client(&url)?;
    let mut b = client(&url)?;
    let a_id = a.register().await?;
    b.register().await?;

    a.report_crash(json!("System.Exception: out of memory")).await?;
    a.unregister().await?;
    assert!(!service.is_done());
    assert_eq!(
        service.roster().crash_report(a_id),
        Some(json!("System.Exception: out of memory"))
    );

    b.unregister().await?;
    let result = tokio::time::timeout(Duration::from_secs(10), handle).await???;
    assert!(result.is_none());
    assert_eq!(service.final_report(), coordinator::NO_RESULT_DIAGNOSTIC);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_drivers_end_to_end() -> Result<()> {
    let (url, service, handle) = start_coordinator().await?;
    let log_dir = tempfile::tempdir()?;

    let mut drivers = Vec::new();
    for _ in 0..3 {
        let mut config = DriverConfig::new(
            "sh",
            vec![
                "-c".to_string(),
                "sleep 0.3; echo working on $1".to_string(),
                "job".to_string(),
                "{id}".to_string(),
            ],
        );
        config.log_dir = log_dir.path().to_path_buf();
        config.heartbeat_interval = Duration::from_millis(50);
        config.report_success = true;
        let mut driver = WorkerDriver::new(client(&url)?, config);
        drivers.push(tokio::spawn(async move { driver.run().await }));
    }

    let mut succeeded = 0;
    for driver in drivers {
        match driver.await?? {
            JobOutcome::Succeeded { log } => {
                let contents = std::fs::read_to_string(&log)?;
                assert!(contents.starts_with("client "));
                assert!(contents.contains(": working on "));
                succeeded += 1;
            }
            JobOutcome::Cancelled => {}
        }
    }
    assert!(succeeded >= 1);

    let result = tokio::time::timeout(Duration::from_secs(10), handle).await???;
    let result = result.ok_or_else(|| anyhow::anyhow!("no final result"))?;
    assert_eq!(result.get("status"), Some(&json!("ok")));
    assert!(service.is_done());
    tracing::info!(result = %result, "Driver run complete");
    Ok(())
}
