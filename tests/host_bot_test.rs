//! Host/Bot Integration Tests
//!
//! Drives real loopback TCP hosts and bots through the controller:
//! - Lua execution round trip over a symmetric connection
//! - Shell timeout leaves the connection usable
//! - Cascading close of hosts and single bots
//! - A dropped bot does not block later bots in the same dispatch
//! - Asymmetric handshake success and rejection

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cmdnet::host::{Host, SessionOutcome};
use cmdnet::security::keygen;
use cmdnet::session::{CloseOutcome, DispatchReport};
use cmdnet::{
    Address, Bot, BotOptions, Controller, Credentials, NetError, NetResult, Request, Security,
};
use tokio::task::JoinHandle;

// === Helpers ===

async fn listen(controller: &Controller, credentials: &Credentials) -> Arc<Host> {
    controller
        .listen(&Address::new("127.0.0.1", 0), credentials)
        .await
        .expect("host should start")
}

/// Connect a bot and serve requests on a task; waits until the host has
/// registered it.
async fn spawn_bot(
    host: &Host,
    credentials: &Credentials,
    options: BotOptions,
) -> JoinHandle<NetResult<()>> {
    let before = host.bots().len();
    let handle = spawn_unregistered_bot(host, credentials, options).await;
    wait_for_bots(host, before + 1).await;
    handle
}

async fn spawn_unregistered_bot(
    host: &Host,
    credentials: &Credentials,
    options: BotOptions,
) -> JoinHandle<NetResult<()>> {
    let security = Security::from_credentials(credentials).expect("bot credentials");
    let address = host.address().clone();
    let mut bot = Bot::connect(&address, &security, options)
        .await
        .expect("bot should connect");
    tokio::spawn(async move { bot.run().await })
}

async fn wait_for_bots(host: &Host, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while host.bots().len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} bots, host has {}",
            host.bots().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn join_all(controller: &Controller, host: &Host) {
    let ids: Vec<String> = host
        .bots()
        .snapshot()
        .iter()
        .map(|b| b.id().to_string())
        .collect();
    for report in controller.session(&ids, false) {
        assert_eq!(report.outcome, Some(SessionOutcome::Joined));
    }
}

async fn dispatch(controller: &Controller, request: Request) -> Vec<DispatchReport> {
    let mut reports = Vec::new();
    controller
        .dispatch(&request, |report| reports.push(report.clone()))
        .await;
    reports
}

fn response(report: &DispatchReport) -> &str {
    match &report.outcome {
        Ok(exchange) => &exchange.response,
        Err(e) => panic!("bot {} failed: {e}", report.bot_id),
    }
}

fn symmetric(password: &str, salt: &str) -> Credentials {
    Credentials::Password {
        password: password.to_string(),
        salt: salt.to_string(),
    }
}

struct KeyFiles {
    _dir: tempfile::TempDir,
    cert: PathBuf,
    key: PathBuf,
}

fn key_files() -> KeyFiles {
    let dir = tempfile::TempDir::new().unwrap();
    let cert = dir.path().join("host.pem");
    let key = dir.path().join("host.key");
    keygen::write_keypair(&cert, &key).unwrap();
    KeyFiles {
        _dir: dir,
        cert,
        key,
    }
}

// === Scenarios ===

#[tokio::test]
async fn test_symmetric_lua_print_reaches_operator() {
    let controller = Controller::default();
    let creds = symmetric("p", "s");
    let host = listen(&controller, &creds).await;
    let _bot = spawn_bot(&host, &creds, BotOptions::default()).await;
    join_all(&controller, &host);

    let reports = dispatch(&controller, Request::new("print('hello')", true)).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(response(&reports[0]), "hello\n");
    assert_eq!(reports[0].host_id, host.id());
    controller.close_all();
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_timeout_keeps_connection_open() {
    let controller = Controller::default();
    let host = listen(&controller, &Credentials::None).await;
    let options = BotOptions {
        shell_timeout: Duration::from_secs(1),
    };
    let _bot = spawn_bot(&host, &Credentials::None, options).await;
    join_all(&controller, &host);

    let reports = dispatch(&controller, Request::new("sleep 5", false)).await;
    let text = response(&reports[0]);
    assert!(text.starts_with("[BOT] ERROR ::"), "{text}");
    assert!(text.contains("timed out"), "{text}");

    let reports = dispatch(&controller, Request::new("echo next", false)).await;
    assert_eq!(response(&reports[0]), "next");
    assert_eq!(host.bots().len(), 1);
    controller.close_all();
}

#[tokio::test]
async fn test_close_host_and_bot_of_another_host() {
    let controller = Controller::default();
    let host_x = listen(&controller, &Credentials::None).await;
    let host_z = listen(&controller, &Credentials::None).await;

    let bot_under_x = spawn_bot(&host_x, &Credentials::None, BotOptions::default()).await;
    let bot_y = spawn_bot(&host_z, &Credentials::None, BotOptions::default()).await;
    let _bot_kept = spawn_bot(&host_z, &Credentials::None, BotOptions::default()).await;

    let y_id = host_z.bots().snapshot()[0].id().to_string();
    let ids = vec![host_x.id().to_string(), y_id.clone(), "unknown-id".to_string()];

    let outcomes = controller.close(&ids);

    assert_eq!(
        outcomes,
        vec![
            CloseOutcome::HostClosed(host_x.id().to_string()),
            CloseOutcome::BotClosed(y_id.clone()),
            CloseOutcome::NotFound("unknown-id".to_string()),
        ]
    );
    assert!(!controller.hosts().contains(host_x.id()));
    assert!(host_x.bots().is_empty());
    assert!(controller.hosts().contains(host_z.id()));
    assert_eq!(host_z.bots().len(), 1);
    assert!(!host_z.bots().contains(&y_id));

    // Both closed bots see their connection end.
    for handle in [bot_under_x, bot_y] {
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("bot should stop")
            .unwrap();
        assert!(result.unwrap_err().is_fatal());
    }
    controller.close_all();
}

#[tokio::test]
async fn test_dropped_bot_is_removed_and_does_not_block_others() {
    let controller = Controller::default();
    let host = listen(&controller, &Credentials::None).await;
    let _first = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    let dropped = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    let _third = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    join_all(&controller, &host);

    let dropped_id = host.bots().snapshot()[1].id().to_string();
    dropped.abort();
    let _ = dropped.await;

    let reports = dispatch(&controller, Request::new("print('hi')", true)).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(response(&reports[0]), "hi\n");
    assert_eq!(reports[1].bot_id, dropped_id);
    assert!(reports[1].removed);
    assert!(matches!(&reports[1].outcome, Err(e) if e.is_fatal()));
    assert_eq!(response(&reports[2]), "hi\n");

    assert_eq!(host.bots().len(), 2);
    assert!(!host.bots().contains(&dropped_id));
    controller.close_all();
}

#[tokio::test]
async fn test_session_toggle_reports() {
    let controller = Controller::default();
    let host = listen(&controller, &Credentials::None).await;
    let _bot = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    let ids = vec![host.bots().snapshot()[0].id().to_string()];

    let outcome = |remove| controller.session(&ids, remove)[0].outcome;
    assert_eq!(outcome(false), Some(SessionOutcome::Joined));
    assert_eq!(outcome(false), Some(SessionOutcome::AlreadyInSession));
    assert_eq!(controller.session_bots().len(), 1);
    assert_eq!(outcome(true), Some(SessionOutcome::Removed));
    assert_eq!(outcome(true), Some(SessionOutcome::NotInSession));
    assert!(controller.session_bots().is_empty());
    controller.close_all();
}

#[tokio::test]
async fn test_only_session_bots_receive_requests() {
    let controller = Controller::default();
    let host = listen(&controller, &Credentials::None).await;
    let _a = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    let _b = spawn_bot(&host, &Credentials::None, BotOptions::default()).await;
    let chosen = host.bots().snapshot()[1].id().to_string();
    controller.session(&[chosen.clone()], false);

    let reports = dispatch(&controller, Request::new("print('x')", true)).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].bot_id, chosen);
    controller.close_all();
}

// === Security ===

#[tokio::test]
async fn test_asymmetric_handshake_then_requests() {
    let keys = key_files();
    let controller = Controller::default();
    let host_creds = Credentials::KeyPair {
        public_key: keys.cert.clone(),
        private_key: Some(keys.key.clone()),
    };
    let bot_creds = Credentials::KeyPair {
        public_key: keys.cert.clone(),
        private_key: None,
    };
    let host = listen(&controller, &host_creds).await;
    let _bot = spawn_bot(&host, &bot_creds, BotOptions::default()).await;
    join_all(&controller, &host);

    for i in 0..5 {
        let reports = dispatch(&controller, Request::new(format!("print({i})"), true)).await;
        assert_eq!(response(&reports[0]), format!("{i}\n"));
    }
    assert_eq!(host.bots().snapshot()[0].mode().to_string(), "asymmetric");
    controller.close_all();
}

#[tokio::test]
async fn test_foreign_public_key_is_rejected() {
    let host_keys = key_files();
    let other_keys = key_files();
    let controller = Controller::default();
    let host = listen(
        &controller,
        &Credentials::KeyPair {
            public_key: host_keys.cert.clone(),
            private_key: Some(host_keys.key.clone()),
        },
    )
    .await;

    let bot = spawn_unregistered_bot(
        &host,
        &Credentials::KeyPair {
            public_key: other_keys.cert.clone(),
            private_key: None,
        },
        BotOptions::default(),
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(5), bot)
        .await
        .expect("rejected bot should stop")
        .unwrap();
    assert!(result.unwrap_err().is_fatal());
    assert!(host.bots().is_empty());
    controller.close_all();
}

#[tokio::test]
async fn test_password_mismatch_drops_bot_on_first_request() {
    let controller = Controller::default();
    let host = listen(&controller, &symmetric("p", "s")).await;
    let bot = spawn_bot(&host, &symmetric("p", "other"), BotOptions::default()).await;
    join_all(&controller, &host);

    let reports = dispatch(&controller, Request::new("print('x')", true)).await;
    assert!(reports[0].removed);
    assert!(host.bots().is_empty());

    let result = tokio::time::timeout(Duration::from_secs(5), bot)
        .await
        .expect("bot should stop")
        .unwrap();
    assert!(matches!(result, Err(NetError::Crypto(_))));
    controller.close_all();
}
