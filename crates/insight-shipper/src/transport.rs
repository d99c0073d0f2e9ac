// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token TCP transport.
//!
//! One long-lived TLS connection to the ingestion endpoint. Every line goes out as
//! `token || line || '\n'`, UTF-8 encoded, followed by a flush. There is no
//! acknowledgement and no reconnect: once the connection breaks, every further
//! `write_line` fails with [`ShipError::Transmission`].

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::{debug, warn};

use crate::error::ShipError;
use crate::sink::{Interrupter, LineSink};

pub struct TransportWriter {
    token: String,
    endpoint: String,
    port: u16,
    channel: Option<StreamOwned<ClientConnection, TcpStream>>,
    // Second handle on the same socket, used for teardown
    socket: Option<TcpStream>,
}

impl TransportWriter {
    /// Connects to `endpoint:port` and completes the TLS handshake, trusting the
    /// platform root store.
    ///
    /// `connect_timeout` bounds each TCP connect attempt and the handshake. Name
    /// resolution uses the system resolver and its own timeouts.
    pub fn open(
        token: &str,
        endpoint: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ShipError> {
        let tls_config =
            native_client_config().map_err(|e| ShipError::connection(endpoint, port, e))?;
        Self::open_with_config(token, endpoint, port, connect_timeout, Arc::new(tls_config))
    }

    pub(crate) fn open_with_config(
        token: &str,
        endpoint: &str,
        port: u16,
        connect_timeout: Duration,
        tls_config: Arc<ClientConfig>,
    ) -> Result<Self, ShipError> {
        let fail = |source: io::Error| ShipError::connection(endpoint, port, source);

        let server_name = ServerName::try_from(endpoint.to_string())
            .map_err(|e| fail(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let mut conn =
            ClientConnection::new(tls_config, server_name).map_err(|e| fail(io::Error::other(e)))?;

        let mut socket = connect_tcp(endpoint, port, connect_timeout).map_err(fail)?;
        handshake(&mut conn, &mut socket, connect_timeout).map_err(fail)?;
        let teardown = socket.try_clone().map_err(fail)?;

        debug!("Connected to {endpoint}:{port}");

        Ok(Self {
            token: token.to_string(),
            endpoint: endpoint.to_string(),
            port,
            channel: Some(StreamOwned::new(conn, socket)),
            socket: Some(teardown),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    fn close_channel(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        channel.conn.send_close_notify();
        if let Err(source) = channel.flush() {
            let err = ShipError::Close {
                target: "TLS channel",
                source,
            };
            warn!("{err}");
        }
    }

    fn close_socket(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        match socket.shutdown(Shutdown::Both) {
            Ok(()) => {}
            // Already torn down by the peer or an interrupter
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                debug!("Socket to {} already disconnected", self.endpoint);
            }
            Err(source) => {
                let err = ShipError::Close {
                    target: "socket",
                    source,
                };
                warn!("{err}");
            }
        }
    }
}

impl LineSink for TransportWriter {
    fn write_line(&mut self, line: &str) -> Result<(), ShipError> {
        let channel = self.channel.as_mut().ok_or_else(|| {
            ShipError::Transmission(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            ))
        })?;

        let mut payload = String::with_capacity(self.token.len() + line.len() + 1);
        payload.push_str(&self.token);
        payload.push_str(line);
        payload.push('\n');

        channel
            .write_all(payload.as_bytes())
            .and_then(|()| channel.flush())
            .map_err(ShipError::Transmission)
    }

    /// Closes the TLS channel, then the socket. A failure on one does not stop
    /// the other; both are logged and never returned.
    fn close(&mut self) -> Result<(), ShipError> {
        self.close_channel();
        self.close_socket();
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let socket = self.socket.as_ref()?.try_clone().ok()?;
        Some(Box::new(move || {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Failed to interrupt transport socket: {e}");
            }
        }))
    }
}

impl Drop for TransportWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for TransportWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportWriter")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builds a rustls client configuration trusting the platform root store.
fn native_client_config() -> io::Result<ClientConfig> {
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("Failed to load native certificate: {err}");
    }

    let mut root_cert_store = RootCertStore::empty();
    let (valid_count, invalid_count) =
        root_cert_store.add_parsable_certificates(native_certs.certs);
    if invalid_count > 0 {
        debug!("Ignored {invalid_count} unparsable native certificates");
    }
    if valid_count == 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "No valid certificates found in native root store",
        ));
    }

    client_config(root_cert_store)
}

fn client_config(roots: RootCertStore) -> io::Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// Tries every resolved address in turn, returning the first connected stream.
fn connect_tcp(endpoint: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (endpoint, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connection attempt to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{endpoint} did not resolve to any address"),
        )
    }))
}

fn handshake(
    conn: &mut ClientConnection,
    socket: &mut TcpStream,
    timeout: Duration,
) -> io::Result<()> {
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut *socket)?;
    }
    // Writes after the handshake are only bounded by the OS
    socket.set_read_timeout(None)?;
    socket.set_write_timeout(None)?;
    Ok(())
}
