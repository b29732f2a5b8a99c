//! Proxy connector and the inbound read loop.

use crate::config::{Config, ConfigError, ProviderKind};
use crate::data::{DataProvider, DataProviderBuilder};
use crate::error::AdapterError;
use crate::metadata::{MetadataProvider, MetadataProviderBuilder};
use crate::outbound::{outbound, spawn_writer, StreamMode};
use crate::stream::ProxyStream;
use crate::tls::create_tls_connector;
use ari_protocol::{Family, LineFramer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// A session that consumes decoded inbound messages.
pub trait InboundSession: Clone + Send + Sync + 'static {
    type Family: Family;

    fn handle(&self, message: <Self::Family as Family>::Message) -> Result<(), AdapterError>;

    fn shutdown(&self);

    fn log_id(&self) -> &str;
}

/// Feeds `reader` into `session` until EOF or a fatal error.
///
/// The session is shut down when the loop ends. Messages decoded before a
/// malformed line are still handled.
pub async fn serve<R, S>(mut reader: R, session: S) -> Result<(), AdapterError>
where
    R: AsyncRead + Unpin,
    S: InboundSession,
{
    let mut framer = LineFramer::<S::Family>::new();
    let mut buf = [0u8; 8192];

    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("[{}] stream closed by proxy", session.log_id());
                break Ok(());
            }
            Ok(n) => n,
            Err(e) => break Err(AdapterError::Io(e)),
        };

        let fed = framer.feed(&buf[..n]);
        if let Err(e) = handle_queued(&mut framer, &session) {
            break Err(e);
        }
        if let Err(e) = fed {
            break Err(e.into());
        }
    };

    if let Err(ref e) = result {
        match e {
            AdapterError::PeerClosed(_) => {}
            e => tracing::error!("[{}] session terminated: {}", session.log_id(), e),
        }
    }
    session.shutdown();
    result
}

fn handle_queued<S: InboundSession>(
    framer: &mut LineFramer<S::Family>,
    session: &S,
) -> Result<(), AdapterError> {
    while let Some(message) = framer.pop() {
        if let Err(e) = session.handle(message) {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!("[{}] {}", session.log_id(), e);
        }
    }
    Ok(())
}

/// Opens a connection to `port` on the configured proxy host.
pub async fn connect(config: &Config, port: u16) -> Result<ProxyStream, AdapterError> {
    let host = config.proxy.host.as_str();
    tracing::debug!("Connecting to {}:{}...", host, port);

    let tcp_stream = tokio::time::timeout(
        config.proxy.connect_timeout(),
        TcpStream::connect((host, port)),
    )
    .await
    .map_err(|_| {
        tracing::debug!("Connection timeout");
        AdapterError::Timeout
    })?
    .map_err(|e| {
        tracing::debug!("Connection failed: {}", e);
        AdapterError::Io(e)
    })?;

    tcp_stream.set_nodelay(true).ok();

    if !config.tls.enabled {
        return Ok(ProxyStream::Plain { stream: tcp_stream });
    }

    let (connector, server_name) = create_tls_connector(&config.tls, host)?;
    tracing::debug!("Performing TLS handshake...");
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| AdapterError::TlsHandshake(e.to_string()))?;
    tracing::debug!("TLS handshake complete");

    Ok(ProxyStream::Tls { stream: tls_stream })
}

/// A provider attached to the proxy, with the task serving its inbound side.
pub struct Attached<P> {
    provider: P,
    task: JoinHandle<Result<(), AdapterError>>,
}

impl<P: InboundSession> Attached<P> {
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the inbound side to end and returns why it ended.
    ///
    /// Must not be awaited again once it has returned.
    pub async fn join(&mut self) -> Result<(), AdapterError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(AdapterError::Io(std::io::Error::other(e.to_string()))),
        }
    }

    /// Closes the session and stops reading.
    pub fn shutdown(&self) {
        self.provider.shutdown();
        self.task.abort();
    }
}

fn describe(stream: &ProxyStream) -> String {
    match stream.peer_addr() {
        Ok(addr) => format!("{} over {}", addr, stream.transport()),
        Err(_) => format!("proxy over {}", stream.transport()),
    }
}

fn port(config: &Config, kind: ProviderKind) -> Result<u16, AdapterError> {
    config.validate(kind)?;
    config
        .proxy
        .port_for(kind)
        .ok_or_else(|| ConfigError::ValidationError("proxy port not set".to_string()).into())
}

/// Connects a metadata provider to the proxy.
///
/// The session config of `builder` is replaced by the one derived from
/// `config`.
pub async fn attach_metadata_provider(
    config: &Config,
    builder: MetadataProviderBuilder,
) -> Result<Attached<MetadataProvider>, AdapterError> {
    let port = port(config, ProviderKind::Metadata)?;
    let stream = connect(config, port).await?;
    let peer = describe(&stream);
    let (reader, writer) = tokio::io::split(stream);

    let (out, rx) = outbound();
    let provider = builder.config(config.session_config()).build(out.clone())?;
    tracing::info!("[{}] attached to {}", provider.log_id(), peer);
    spawn_writer(writer, &out, rx, provider.log_id().to_string());

    let task = tokio::spawn(serve(reader, provider.clone()));
    Ok(Attached { provider, task })
}

/// Connects a data provider to the proxy.
///
/// With a notify port configured the session writes to two connections.
/// Nothing is expected on the notify connection; its closure ends the session.
pub async fn attach_data_provider(
    config: &Config,
    builder: DataProviderBuilder,
) -> Result<Attached<DataProvider>, AdapterError> {
    let port = port(config, ProviderKind::Data)?;
    let stream = connect(config, port).await?;
    let notify_stream = match config.proxy.notify_port {
        Some(notify_port) => Some(connect(config, notify_port).await?),
        None => None,
    };

    let peer = describe(&stream);
    let (reader, writer) = tokio::io::split(stream);
    let (primary, rx) = outbound();
    let (streams, notify) = match notify_stream {
        Some(notify_stream) => {
            let (notify_reader, notify_writer) = tokio::io::split(notify_stream);
            let (notify, notify_rx) = outbound();
            (
                StreamMode::Dual {
                    primary: primary.clone(),
                    notify: notify.clone(),
                },
                Some((notify_reader, notify_writer, notify, notify_rx)),
            )
        }
        None => (StreamMode::Single(primary.clone()), None),
    };

    let provider = builder.config(config.session_config()).build(streams)?;
    let log_id = provider.log_id().to_string();
    tracing::info!(
        "[{}] attached to {}{}",
        log_id,
        peer,
        if notify.is_some() { ", notify stream open" } else { "" }
    );
    spawn_writer(writer, &primary, rx, log_id.clone());

    let session = provider.clone();
    let task = match notify {
        Some((notify_reader, notify_writer, notify_out, notify_rx)) => {
            spawn_writer(
                notify_writer,
                &notify_out,
                notify_rx,
                format!("{}/notify", log_id),
            );
            tokio::spawn(async move {
                let primary = session.clone();
                tokio::select! {
                    result = serve(reader, primary) => result,
                    result = drain_notify(notify_reader, &log_id) => {
                        session.shutdown();
                        result
                    }
                }
            })
        }
        None => tokio::spawn(serve(reader, session)),
    };

    Ok(Attached { provider, task })
}

/// Reads and discards the inbound side of the notify connection.
async fn drain_notify<R>(mut reader: R, log_id: &str) -> Result<(), AdapterError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await? {
            0 => {
                tracing::info!("[{}] notify stream closed by proxy", log_id);
                return Ok(());
            }
            n => tracing::debug!("[{}] ignoring {} bytes on notify stream", log_id, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::Phase;
    use ari_protocol::ProtocolError;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn metadata_session() -> (MetadataProvider, UnboundedReceiver<String>) {
        let (out, mut rx) = outbound();
        let provider = MetadataProvider::builder()
            .config(SessionConfig {
                keepalive_ms: 0,
                ..Default::default()
            })
            .build(out)
            .unwrap();
        rx.try_recv().unwrap();
        (provider, rx)
    }

    #[tokio::test]
    async fn test_serve_until_eof() {
        let (provider, mut rx) = metadata_session();
        let (mut proxy, adapter) = tokio::io::duplex(64);

        let task = tokio::spawn(serve(adapter, provider.clone()));
        // split mid-token
        proxy.write_all(b"1|MPI|S|ARI.vers").await.unwrap();
        proxy.write_all(b"ion|S|1.8.2\r\n2|GIS|S|#|S|a+b|S|S1\n").await.unwrap();
        drop(proxy);

        task.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap(), "1|MPI|S|ARI.version|S|1.8.2\n");
        assert_eq!(rx.recv().await.unwrap(), "2|GIS|S|a|S|b\n");
        assert!(provider.is_closed());
    }

    #[tokio::test]
    async fn test_serve_handles_messages_before_fault() {
        let (provider, mut rx) = metadata_session();
        let (mut proxy, adapter) = tokio::io::duplex(1024);

        let task = tokio::spawn(serve(adapter, provider.clone()));
        proxy
            .write_all(b"1|MPI|S|ARI.version|S|1.8.2\n2|ZZZ|S|x\n3|NSC|S|S1\n")
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(AdapterError::Protocol(ProtocolError::UnknownVerb(ref v))) if v == "ZZZ"
        ));
        assert_eq!(rx.recv().await.unwrap(), "1|MPI|S|ARI.version|S|1.8.2\n");
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_serve_stops_on_sequencing_fault() {
        let (provider, _rx) = metadata_session();
        let (mut proxy, adapter) = tokio::io::duplex(1024);

        let task = tokio::spawn(serve(adapter, provider.clone()));
        proxy.write_all(b"2|GIS|S|#|S|a|S|S1\n").await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(AdapterError::UnexpectedBeforeInit("GIS"))
        ));
        assert!(provider.is_closed());
    }

    #[tokio::test]
    async fn test_serve_stops_on_close() {
        let (provider, _rx) = metadata_session();
        let (mut proxy, adapter) = tokio::io::duplex(1024);

        let task = tokio::spawn(serve(adapter, provider.clone()));
        proxy
            .write_all(b"0|CLOSE|S|reason|S|keepalive+timeout\n")
            .await
            .unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(AdapterError::PeerClosed(ref r)) if r == "keepalive timeout"
        ));
    }

    fn config_for(metadata_port: Option<u16>, data_port: Option<u16>) -> Config {
        let mut config = Config::default();
        config.proxy.metadata_port = metadata_port;
        config.proxy.data_port = data_port;
        config.proxy.connect_timeout_secs = 2;
        config.keepalive.interval_ms = 0;
        config.credentials.user = Some("adapter".to_string());
        config
    }

    async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_attach_metadata_provider() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = config_for(Some(port), None);

        let attach = tokio::spawn(async move {
            attach_metadata_provider(&config, MetadataProvider::builder()).await
        });
        let (socket, _) = listener.accept().await.unwrap();
        let mut attached = attach.await.unwrap().unwrap();

        let (read_half, mut write_half) = socket.into_split();
        let mut proxy = BufReader::new(read_half);
        assert_eq!(
            read_line(&mut proxy).await,
            "1|RAC|S|user|S|adapter|S|enableClosePacket|S|true|S|SDK|S|Rust+Adapter+SDK\n"
        );

        write_half
            .write_all(b"1|MPI|S|ARI.version|S|1.8.2\n2|GSC|S|#|S|g|S|bid+ask|S|S1\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut proxy).await, "1|MPI|S|ARI.version|S|1.8.2\n");
        assert_eq!(read_line(&mut proxy).await, "2|GSC|S|bid|S|ask\n");

        drop(write_half);
        attached.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_proxy_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = config_for(Some(port), None);

        let attach = tokio::spawn(async move {
            attach_metadata_provider(&config, MetadataProvider::builder()).await
        });
        let (socket, _) = listener.accept().await.unwrap();
        let mut attached = attach.await.unwrap().unwrap();

        let (read_half, mut write_half) = socket.into_split();
        let mut proxy = BufReader::new(read_half);
        assert!(read_line(&mut proxy).await.starts_with("1|RAC|"));

        write_half
            .write_all(b"1|MPI|S|ARI.version|S|1.8.2\n0|CLOSE|S|reason|S|bye\n")
            .await
            .unwrap();
        assert!(matches!(
            attached.join().await,
            Err(AdapterError::PeerClosed(ref r)) if r == "bye"
        ));

        // the provider is still held, yet the adapter side has hung up
        let mut rest = String::new();
        tokio::time::timeout(Duration::from_secs(2), proxy.read_to_string(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rest, "1|MPI|S|ARI.version|S|1.8.2\n");
        assert!(attached.provider().is_closed());
    }

    #[tokio::test]
    async fn test_attach_data_provider_dual_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let notify_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for(None, Some(listener.local_addr().unwrap().port()));
        config.proxy.notify_port = Some(notify_listener.local_addr().unwrap().port());

        let builder = DataProvider::builder()
            .on_subscribe(|_, response| {
                response.success(()).unwrap();
            })
            .on_unsubscribe(|_, response| {
                response.success(()).unwrap();
            });
        let attach = tokio::spawn(async move { attach_data_provider(&config, builder).await });
        let (socket, _) = listener.accept().await.unwrap();
        let (notify_socket, _) = notify_listener.accept().await.unwrap();
        let mut attached = attach.await.unwrap().unwrap();

        let (read_half, mut write_half) = socket.into_split();
        let mut proxy = BufReader::new(read_half);
        let mut notify = BufReader::new(notify_socket);
        assert!(read_line(&mut proxy).await.starts_with("1|RAC|"));
        assert!(read_line(&mut notify).await.starts_with("1|RAC|"));

        write_half
            .write_all(b"1|DPI|S|ARI.version|S|1.8.2\nS1|SUB|S|item\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut proxy).await, "1|DPI|S|ARI.version|S|1.8.2\n");
        assert_eq!(read_line(&mut proxy).await, "S1|SUB|V\n");

        attached.provider().end_of_snapshot("item").unwrap();
        assert!(read_line(&mut proxy).await.ends_with("|EOS|S|item|S|S1\n"));
        assert!(read_line(&mut notify).await.ends_with("|EOS|S|item|S|S1\n"));

        // closing the notify connection ends the session
        drop(notify);
        tokio::time::timeout(Duration::from_secs(2), attached.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_attach_requires_port() {
        let config = config_for(None, None);
        let result = attach_metadata_provider(&config, MetadataProvider::builder()).await;
        assert!(matches!(result, Err(AdapterError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = config_for(Some(port), None);
        let result = connect(&config, port).await;
        assert!(matches!(result, Err(AdapterError::Io(_))));
    }
}
