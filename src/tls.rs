// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TLS material loading.

use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::RelayError;

/// Build a rustls server config from the configured PEM files. Entries from
/// `TLS_CA_FILES` are appended to the served chain. Any unreadable or
/// unparsable file is a startup failure.
pub fn load_server_config(
    cert_file: &Path,
    key_file: &Path,
    ca_files: &[PathBuf],
) -> Result<rustls::ServerConfig, RelayError> {
    let mut chain = read_certs(cert_file)?;
    for ca in ca_files {
        chain.extend(read_certs(ca)?);
    }
    let key = read_key(key_file)?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| RelayError::ConfigInvalid(format!("tls: {e}")))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RelayError> {
    let pem = std::fs::read(path)
        .map_err(|e| RelayError::ConfigInvalid(format!("read {}: {e}", path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| RelayError::ConfigInvalid(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(RelayError::ConfigInvalid(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, RelayError> {
    let pem = std::fs::read(path)
        .map_err(|e| RelayError::ConfigInvalid(format!("read {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| RelayError::ConfigInvalid(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| RelayError::ConfigInvalid(format!("no private key in {}", path.display())))
}
