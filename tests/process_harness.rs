#![cfg(unix)]

use std::time::Duration;

use sampleapp::config::GREETING_SERVICE_URL_KEY;
use sampleapp::testkit::process::{ProcessHarness, ProcessState, Readiness, RunningProcess};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local address")
        .port()
}

/// Runs the `sampleapp` binary as its own greeting upstream: its
/// `/helloext` route plays the live external service.
fn service_harness(port: u16) -> ProcessHarness {
    wrapped_service_harness(port, "")
}

/// Same service, optionally followed by more shell so that `sh` stays its
/// parent instead of being replaced by it.
fn wrapped_service_harness(port: u16, after: &str) -> ProcessHarness {
    let binary = env!("CARGO_BIN_EXE_sampleapp");
    ProcessHarness::new(format!("'{binary}'{after}"))
        .env("APP_HOST", "127.0.0.1")
        .env("APP_PORT", port.to_string())
        .env(GREETING_SERVICE_URL_KEY, format!("http://127.0.0.1:{port}/"))
        .env("RUST_LOG", "sampleapp=debug")
}

async fn greet(port: u16, name: &str) -> (u16, String) {
    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/greeting/{name}"))
        .send()
        .await
        .expect("greeting request");
    let status = response.status().as_u16();
    (status, response.text().await.expect("greeting body"))
}

async fn shut_down(mut running: RunningProcess) {
    running.stop().await.expect("stop");
    assert_eq!(running.state(), ProcessState::Terminated);
    assert!(!running.is_alive().expect("status"));
}

#[tokio::test]
async fn live_service_greets_through_its_own_helloext() {
    let port = free_port();
    let running = service_harness(port)
        .readiness(Readiness::HttpProbe {
            url: format!("http://127.0.0.1:{port}/hello"),
            timeout: Duration::from_secs(20),
            interval: Duration::from_millis(100),
        })
        .start()
        .await
        .expect("service should start");
    assert_eq!(running.state(), ProcessState::Running);

    for name in ["test", "Taro"] {
        let (status, body) = greet(port, name).await;
        assert_eq!(status, 200);
        assert!(body.ends_with(&format!(" {name}")), "{body}");
        assert_eq!(body, format!("Hello {name}"));
    }

    shut_down(running).await;
}

#[tokio::test]
async fn fixed_grace_period_is_enough_for_the_service() {
    let port = free_port();
    let running = service_harness(port)
        .start()
        .await
        .expect("service should start");

    let (status, body) = greet(port, "test").await;
    assert_eq!(status, 200);
    assert!(body.ends_with(" test"));

    shut_down(running).await;
}

#[tokio::test]
async fn stop_kills_a_long_running_process() {
    let mut running = ProcessHarness::new("echo starting; echo oops >&2; sleep 60")
        .readiness(Readiness::FixedDelay(Duration::from_millis(100)))
        .start()
        .await
        .expect("start");

    assert!(running.id().is_some());
    assert!(running.is_alive().expect("status"));

    running.stop().await.expect("stop");

    assert!(!running.is_alive().expect("status"));
    assert_eq!(running.id(), None);
    assert_eq!(running.state(), ProcessState::Terminated);
}

#[tokio::test]
async fn service_port_is_released_after_stop() {
    let port = free_port();
    let running = service_harness(port)
        .readiness(Readiness::HttpProbe {
            url: format!("http://127.0.0.1:{port}/hello"),
            timeout: Duration::from_secs(20),
            interval: Duration::from_millis(100),
        })
        .start()
        .await
        .expect("service should start");

    shut_down(running).await;

    let result = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/hello"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err(), "service should no longer answer");
}

#[tokio::test]
async fn service_started_behind_a_wrapper_shell_is_stopped() {
    let port = free_port();
    let running = wrapped_service_harness(port, "; echo service exited")
        .readiness(Readiness::HttpProbe {
            url: format!("http://127.0.0.1:{port}/hello"),
            timeout: Duration::from_secs(20),
            interval: Duration::from_millis(100),
        })
        .start()
        .await
        .expect("service should start");

    let (status, _) = greet(port, "test").await;
    assert_eq!(status, 200);

    shut_down(running).await;

    let result = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/hello"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err(), "wrapped service should be gone");
}
