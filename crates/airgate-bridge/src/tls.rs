use std::path::Path;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

/// The name AirDrop senders expect on the certificate.
const CERT_HOSTNAME: &str = "airdrop.local";

/// Load the PEM pair, generating and persisting a self-signed one when
/// either file is missing. Senders do not validate the chain, they only
/// require TLS, so a locally generated certificate is sufficient.
pub async fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig> {
    if !cert_path.exists() || !key_path.exists() {
        info!(
            "generating self-signed certificate for {CERT_HOSTNAME} at {}",
            cert_path.display()
        );
        let mut params = rcgen::CertificateParams::new(vec![CERT_HOSTNAME.to_string()])
            .context("bad certificate params")?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, CERT_HOSTNAME);
        let key_pair = rcgen::KeyPair::generate().context("key generation failed")?;
        let cert = params
            .self_signed(&key_pair)
            .context("certificate generation failed")?;

        if let Some(parent) = cert_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = key_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(cert_path, cert.pem()).await?;
        tokio::fs::write(key_path, key_pair.serialize_pem()).await?;
    }

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .with_context(|| {
            format!(
                "loading TLS material from {} / {}",
                cert_path.display(),
                key_path.display()
            )
        })
}
