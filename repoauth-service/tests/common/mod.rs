//! Common test utilities for repoauth-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use repoauth_service::config::{DatabaseConfig, RepoAuthConfig, ServerConfig, StoreBackend};
use repoauth_service::models::{
    Account, AccountKind, Application as RepoApplication, FacebookLink, NewAccount,
    NewApplication,
};
use repoauth_service::services::{IdentityReader, IdentityWriter, MemoryStore, StoreError};
use repoauth_service::startup::{Application, ServerState};
use repoauth_service::utils::{hash_password, Password};
use service_core::config::Config as CommonConfig;
use service_core::grpc::AuthClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,repoauth_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ALICE_PASSWORD: &str = "s3cret";

/// A running server on ephemeral ports backed by a seeded `MemoryStore`.
pub struct TestApp {
    pub client: AuthClient,
    pub http_client: reqwest::Client,
    pub http_address: String,
    pub store: Arc<MemoryStore>,
    pub grpc_port: u16,
    pub http_port: u16,
    pub server_state: watch::Receiver<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestApp {
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http_client
            .get(format!("{}{}", self.http_address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Fire the shutdown signal without waiting for the server.
    pub fn request_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for `run_until_stopped` to return.
    pub async fn stopped(self) -> std::io::Result<()> {
        let TestApp { client, handle, .. } = self;
        drop(client);
        handle.await.expect("server task panicked")
    }

    pub fn grpc_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.grpc_port)
    }

    /// Another client on its own connection.
    pub async fn new_client(&self) -> AuthClient {
        connect_with_retry(&self.grpc_endpoint()).await
    }

    /// Request shutdown and wait for the server to stop.
    pub async fn shutdown(mut self) -> std::io::Result<()> {
        self.request_shutdown();
        self.stopped().await
    }
}

pub fn test_config(max_in_flight: usize) -> RepoAuthConfig {
    RepoAuthConfig {
        common: CommonConfig {
            port: 0,
            grpc_port: 0,
        },
        service_name: "repoauth-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout_seconds: 1,
        },
        server: ServerConfig {
            worker_threads: 2,
            max_in_flight,
            shutdown_drain_seconds: 5,
            reflection: true,
        },
    }
}

/// Seed the end-to-end fixture.
///
/// - `alice`: developer, password `s3cret`, owns an application for `repoX`
/// - `bob`: developer with a password and no applications
/// - `carol`: Facebook-linked account without a password
pub async fn seed_fixtures(store: &MemoryStore) {
    let mut rng = StdRng::seed_from_u64(2024);

    let alice_hash = hash_password(&Password::new(ALICE_PASSWORD.to_string()))
        .expect("Failed to hash password");
    let alice = store
        .insert_account(
            NewAccount::build("alice", AccountKind::Developer, &mut rng)
                .with_password_hash(alice_hash)
                .with_email("alice@example.com"),
        )
        .await
        .expect("Failed to insert alice");

    store
        .insert_application(
            NewApplication::new(alice.id, "Repo X", "repoX").with_description("alice's repository"),
        )
        .await
        .expect("Failed to insert application");

    let bob_hash =
        hash_password(&Password::new("hunter2".to_string())).expect("Failed to hash password");
    store
        .insert_account(
            NewAccount::build("bob", AccountKind::Developer, &mut rng).with_password_hash(bob_hash),
        )
        .await
        .expect("Failed to insert bob");

    let link = FacebookLink {
        facebook_id: 100_200_300,
        access_token: "fb-access-token".to_string(),
    };
    store
        .insert_account(NewAccount::build("carol", AccountKind::Facebook(link), &mut rng))
        .await
        .expect("Failed to insert carol");
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config(16)).await
}

pub async fn spawn_app_with(config: RepoAuthConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    seed_fixtures(&store).await;
    spawn_app_over(config, store.clone(), store).await
}

/// Serve `config` with application lookups delayed by `delay`.
pub async fn spawn_slow_app(config: RepoAuthConfig, delay: Duration) -> (TestApp, Arc<SlowReader>) {
    let store = Arc::new(MemoryStore::new());
    seed_fixtures(&store).await;
    let reader = Arc::new(SlowReader::new(store.clone(), delay));
    let app = spawn_app_over(config, store, reader.clone()).await;
    (app, reader)
}

async fn spawn_app_over(
    config: RepoAuthConfig,
    store: Arc<MemoryStore>,
    reader: Arc<dyn IdentityReader>,
) -> TestApp {
    init_tracing();

    let app = Application::build_with_store(config, reader)
        .await
        .expect("Failed to build application");

    let grpc_port = app.grpc_port();
    let http_port = app.http_port();
    let server_state = app.server_state();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        app.run_until_stopped(async move {
            let _ = shutdown_rx.await;
        })
        .await
    });

    let client = connect_with_retry(&format!("http://127.0.0.1:{}", grpc_port)).await;

    TestApp {
        client,
        http_client: reqwest::Client::new(),
        http_address: format!("http://127.0.0.1:{}", http_port),
        store,
        grpc_port,
        http_port,
        server_state,
        shutdown: Some(shutdown_tx),
        handle,
    }
}

/// Wait for the server to be ready with retry.
pub async fn connect_with_retry(endpoint: &str) -> AuthClient {
    let mut attempts = 0;
    loop {
        match AuthClient::connect(endpoint).await {
            Ok(client) => break client,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
        }
    }
}

/// Reader that holds every application lookup for a fixed delay and
/// records how many lookups were running at once.
pub struct SlowReader {
    inner: Arc<MemoryStore>,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowReader {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` lookups are running.
    pub async fn wait_for_in_flight(&self, count: usize) {
        for _ in 0..200 {
            if self.in_flight() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lookups never reached {} in flight", count);
    }
}

/// Decrements on drop, so a cancelled lookup is still counted out.
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityReader for SlowReader {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }

    async fn find_account_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.inner.find_account_by_nickname(nickname).await
    }

    async fn find_account_by_nickname_and_password_hash(
        &self,
        nickname: &str,
        password_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.inner
            .find_account_by_nickname_and_password_hash(nickname, password_hash)
            .await
    }

    async fn find_application_by_author_and_domain(
        &self,
        author_nickname: &str,
        domain: &str,
    ) -> Result<Option<RepoApplication>, StoreError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = Running(&self.current);
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.inner
            .find_application_by_author_and_domain(author_nickname, domain)
            .await
    }
}
