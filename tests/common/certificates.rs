use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use tempfile::TempDir;

/// A throwaway self-signed identity for `localhost`, written as PEM files the server can load.
pub struct TestCertificates {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    cert_pem: String,
    _dir: TempDir,
}

impl TestCertificates {
    pub fn generate() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "dump ingest test server");

        let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        params.distinguished_name = name;

        let key = KeyPair::generate()?;
        let cert_pem = params.self_signed(&key)?.pem();

        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, &cert_pem)?;
        std::fs::write(&key_path, key.serialize_pem())?;

        Ok(TestCertificates {
            cert_path,
            key_path,
            cert_pem,
            _dir: dir,
        })
    }

    /// A client that trusts only this certificate. Imports can take a while, so the timeout is
    /// generous.
    pub fn trusting_client(&self) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
        let root = reqwest::Certificate::from_pem(self.cert_pem.as_bytes())?;

        Ok(reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(root)
            .timeout(Duration::from_secs(60))
            .build()?)
    }
}
