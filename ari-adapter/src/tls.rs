//! TLS connector for the proxy connection.

use crate::config::TlsConfig;
use crate::error::AdapterError;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Creates a TLS connector and the SNI name to present to the proxy.
pub fn create_tls_connector(
    config: &TlsConfig,
    proxy_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), AdapterError> {
    let mut root_store = RootCertStore::empty();
    match config.ca_cert_path {
        Some(ref ca_path) => {
            for cert in load_certs(ca_path)? {
                root_store
                    .add(cert)
                    .map_err(|e| AdapterError::TlsConfig(format!("invalid CA cert: {}", e)))?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let name = config.server_name.as_deref().unwrap_or(proxy_host);
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|_| AdapterError::TlsConfig(format!("invalid server name: {}", name)))?;

    Ok((connector, server_name))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, AdapterError> {
    let file = File::open(path)
        .map_err(|e| AdapterError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AdapterError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(AdapterError::TlsConfig(format!(
            "no certificate found in {:?}",
            path
        )));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_invalid_cert_path() {
        let result = load_certs(Path::new("/nonexistent/ca.pem"));
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }

    #[test]
    fn test_load_cert_file_without_certs() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not a pem file").unwrap();
        let result = load_certs(file.path());
        assert!(result.unwrap_err().to_string().contains("no certificate"));
    }

    #[test]
    fn test_connector_with_missing_ca() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            server_name: None,
        };
        assert!(matches!(
            create_tls_connector(&config, "proxy.local"),
            Err(AdapterError::TlsConfig(_))
        ));
    }

    #[test]
    fn test_connector_uses_server_name_override() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: None,
            server_name: Some("push.example.com".to_string()),
        };
        match create_tls_connector(&config, "10.0.0.7") {
            Ok((_, ServerName::DnsName(name))) => assert_eq!(name.as_ref(), "push.example.com"),
            Ok(_) => panic!("expected a DNS server name"),
            Err(e) => panic!("connector failed: {}", e),
        }
    }
}
