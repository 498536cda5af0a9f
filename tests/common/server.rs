use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use reddit_dump_ingest::{handlers, state::AppState};
use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::common::{TEST_TOKEN, certificates::TestCertificates, test_config};

static CRYPTO_INIT: Once = Once::new();

fn init_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// The real router behind TLS on an ephemeral port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub bearer_token: String,
    pub state: AppState,
    certs: TestCertificates,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start_with_tls(db_pool: PgPool) -> Result<Self, Box<dyn std::error::Error>> {
        init_crypto_provider();

        let certs = TestCertificates::generate()?;

        let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = std_listener.local_addr()?;
        std_listener.set_nonblocking(true)?;

        let config = test_config(
            addr.port(),
            certs.cert_path.clone(),
            certs.key_path.clone(),
        );
        let state = AppState::new(db_pool, &config);
        let app = handlers::routes(state.clone());

        let tls_config = RustlsConfig::from_pem_file(&certs.cert_path, &certs.key_path).await?;

        let handle = tokio::spawn(async move {
            axum_server::from_tcp_rustls(std_listener, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .expect("Server failed to start");
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        Ok(TestServer {
            addr,
            base_url: format!("https://localhost:{}", addr.port()),
            bearer_token: TEST_TOKEN.to_string(),
            state,
            certs,
            handle,
        })
    }

    pub fn create_http_client(&self) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
        self.certs.trusting_client()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
