//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use cnc::api::{self, AppState};
use cnc::hub::{Hub, HubOptions, TopicRegistry};
use cnc::rules::RuleStore;
use cnc_protocol::{Action, Matcher, Rule};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// The two rules a fresh demo deployment starts with.
pub fn demo_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            vec![
                Matcher::equal("namespace", "dev"),
                Matcher::equal("name", "test"),
            ],
            Action::Drop,
        )
        .with_id(1234),
        Rule::new(vec![Matcher::equal("namespace", "prod")], Action::Keep).with_id(5678),
    ]
}

pub struct TestApp {
    pub router: Router,
    pub rules: Arc<RuleStore>,
    pub shutdown: CancellationToken,
}

/// Router backed by a running hub, for `oneshot` requests.
pub fn test_app(seed: Vec<Rule>, static_dir: Option<&Path>) -> TestApp {
    let rules = Arc::new(RuleStore::with_rules(seed));
    let shutdown = CancellationToken::new();
    let hub = Hub::new(
        rules.clone(),
        TopicRegistry::standard(),
        HubOptions::default(),
        tracing::Span::none(),
    );
    let (handle, _task) = hub.start(64, shutdown.clone());
    let state = AppState::new(rules.clone(), handle, 256, shutdown.clone());

    TestApp {
        router: api::create_router(state, static_dir),
        rules,
        shutdown,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub rules: Arc<RuleStore>,
    pub shutdown: CancellationToken,
}

impl TestServer {
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Serve a fresh app on an ephemeral local port.
pub async fn spawn_server(seed: Vec<Rule>) -> TestServer {
    let app = test_app(seed, None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = app.router;
    let shutdown = app.shutdown.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .unwrap();
    });

    TestServer {
        addr,
        rules: app.rules,
        shutdown: app.shutdown,
    }
}
