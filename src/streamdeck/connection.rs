use super::events::{open_url_message, register_message, set_image_message, InboundEvent};
use super::Host;
use crate::compositor::{KeyImage, PLACEHOLDER_RESOURCE};
use crate::utils::tasks::spawn_logged;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the Stream Deck application hands the plugin on launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo {
    pub port: u16,
    pub plugin_uuid: String,
    pub register_event: String,
}

/// Outbound half of the connection. Messages are queued and written by a
/// background task, so sending never blocks a refresh.
pub struct StreamDeckHost {
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Resource path to data URI; `None` when the file was missing at connect.
    resources: HashMap<String, Option<String>>,
}

impl StreamDeckHost {
    fn new(
        outgoing: mpsc::UnboundedSender<String>,
        resources: HashMap<String, Option<String>>,
    ) -> Self {
        Self {
            outgoing: Mutex::new(Some(outgoing)),
            resources,
        }
    }

    fn send(&self, message: String) -> Result<()> {
        let outgoing = self
            .outgoing
            .lock()
            .map_err(|_| anyhow!("Outgoing queue lock poisoned"))?;
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| anyhow!("Stream Deck connection closed"))?;
        sender
            .send(message)
            .map_err(|_| anyhow!("Stream Deck connection closed"))
    }

    /// Stops accepting messages; the writer flushes what is queued and closes the socket.
    pub fn close(&self) {
        if let Ok(mut outgoing) = self.outgoing.lock() {
            if outgoing.take().is_some() {
                debug!("Outgoing queue closed");
            }
        }
    }
}

impl Host for StreamDeckHost {
    fn set_image(&self, context: &str, image: &KeyImage) -> Result<()> {
        let message = match image {
            KeyImage::Encoded(uri) => set_image_message(context, Some(uri)),
            KeyImage::Resource(path) => {
                let uri = self.resources.get(path).and_then(|uri| uri.as_deref());
                if uri.is_none() {
                    debug!("No image loaded for {}, host will use the manifest image", path);
                }
                set_image_message(context, uri)
            }
        };
        self.send(message)
    }

    fn open_url(&self, url: &str) -> Result<()> {
        self.send(open_url_message(url))
    }
}

/// Inbound half of the connection.
pub struct EventReader {
    stream: SplitStream<Socket>,
}

impl EventReader {
    /// Next event the plugin cares about, or `None` once the socket is gone.
    /// Malformed frames are logged and skipped.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    warn!("Stream Deck socket error: {}", e);
                    return None;
                }
            };

            match message {
                Message::Text(text) => match InboundEvent::parse(&text) {
                    Ok(InboundEvent::Unknown) => continue,
                    Ok(event) => return Some(event),
                    Err(e) => warn!("{:#}", e),
                },
                Message::Close(frame) => {
                    info!("Stream Deck closed the connection: {:?}", frame);
                    return None;
                }
                _ => {}
            }
        }
    }
}

/// Reads `<plugin dir>/<path>.png` as a data URI.
async fn load_resource(plugin_dir: &Path, path: &str) -> Option<String> {
    let file = plugin_dir.join(format!("{}.png", path));
    match tokio::fs::read(&file).await {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", STANDARD.encode(bytes))),
        Err(e) => {
            warn!("Cannot load {}: {}", file.display(), e);
            None
        }
    }
}

/// Connects to the local Stream Deck application and registers the plugin.
///
/// Key images shipped with the plugin are read here, so dispatching one later
/// never touches the disk. The returned handle finishes once the host is
/// closed and the queued messages are written.
pub async fn connect(
    launch: &LaunchInfo,
    plugin_dir: PathBuf,
) -> Result<(Arc<StreamDeckHost>, EventReader, JoinHandle<()>)> {
    let mut resources = HashMap::new();
    resources.insert(
        PLACEHOLDER_RESOURCE.to_string(),
        load_resource(&plugin_dir, PLACEHOLDER_RESOURCE).await,
    );

    let url = format!("ws://127.0.0.1:{}", launch.port);
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to Stream Deck at {}", url))?;

    socket
        .send(Message::Text(register_message(
            &launch.register_event,
            &launch.plugin_uuid,
        )))
        .await
        .context("Failed to register with Stream Deck")?;
    info!("Registered with Stream Deck on port {}", launch.port);

    let (mut sink, stream) = socket.split();
    let (outgoing, mut queued) = mpsc::unbounded_channel::<String>();

    let writer = spawn_logged("stream deck writer", async move {
        while let Some(message) = queued.recv().await {
            sink.send(Message::Text(message))
                .await
                .context("Failed to write to Stream Deck")?;
        }
        sink.close().await.ok();
        Ok(())
    });

    Ok((
        Arc::new(StreamDeckHost::new(outgoing, resources)),
        EventReader { stream },
        writer,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn fake_stream_deck() -> (LaunchInfo, tokio::task::JoinHandle<ServerSocket>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            accept_async(tcp).await.expect("handshake")
        });
        let launch = LaunchInfo {
            port,
            plugin_uuid: "plugin-uuid".to_string(),
            register_event: "registerPlugin".to_string(),
        };
        (launch, server)
    }

    async fn next_json(socket: &mut ServerSocket) -> Value {
        loop {
            match socket.next().await.expect("frame").expect("ok frame") {
                Message::Text(text) => return serde_json::from_str(&text).expect("json"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn registers_then_forwards_images_and_urls() {
        let (launch, server) = fake_stream_deck().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let (host, _reader, _writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");

        let register = next_json(&mut server).await;
        assert_eq!(register["event"], "registerPlugin");
        assert_eq!(register["uuid"], "plugin-uuid");

        host.set_image("ctx", &KeyImage::Encoded("data:image/png;base64,AA==".into()))
            .expect("set image");
        let image = next_json(&mut server).await;
        assert_eq!(image["event"], "setImage");
        assert_eq!(image["context"], "ctx");
        assert_eq!(image["payload"]["image"], "data:image/png;base64,AA==");

        host.open_url("https://www.roblox.com/games/42/").expect("open url");
        let url = next_json(&mut server).await;
        assert_eq!(url["event"], "openUrl");
        assert_eq!(url["payload"]["url"], "https://www.roblox.com/games/42/");
    }

    #[tokio::test]
    async fn placeholder_resource_is_loaded_from_plugin_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join(format!("{}.png", PLACEHOLDER_RESOURCE));
        std::fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        std::fs::write(&file, b"png bytes").expect("write");

        let (launch, server) = fake_stream_deck().await;
        let (host, _reader, _writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");
        next_json(&mut server).await;

        host.set_image("ctx", &KeyImage::placeholder()).expect("set image");
        let image = next_json(&mut server).await;
        assert_eq!(
            image["payload"]["image"],
            format!("data:image/png;base64,{}", STANDARD.encode(b"png bytes"))
        );
    }

    #[tokio::test]
    async fn missing_resource_omits_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (launch, server) = fake_stream_deck().await;
        let (host, _reader, _writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");
        next_json(&mut server).await;

        host.set_image("ctx", &KeyImage::placeholder()).expect("set image");
        let image = next_json(&mut server).await;
        assert_eq!(image["event"], "setImage");
        assert!(image["payload"].get("image").is_none());
    }

    #[tokio::test]
    async fn placeholder_is_read_at_connect_not_at_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (launch, server) = fake_stream_deck().await;
        let (host, _reader, _writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");
        next_json(&mut server).await;

        let file = dir.path().join(format!("{}.png", PLACEHOLDER_RESOURCE));
        std::fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        std::fs::write(&file, b"late png").expect("write");

        host.set_image("ctx", &KeyImage::placeholder()).expect("set image");
        let image = next_json(&mut server).await;
        assert!(image["payload"].get("image").is_none());
    }

    #[tokio::test]
    async fn reader_skips_noise_and_ends_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (launch, server) = fake_stream_deck().await;
        let (_host, mut reader, _writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");
        next_json(&mut server).await;

        for frame in [
            r#"{"event":"deviceDidConnect","device":"d"}"#,
            "{ not json",
            r#"{"event":"willDisappear","context":"gone","payload":{}}"#,
        ] {
            server
                .send(Message::Text(frame.to_string()))
                .await
                .expect("send");
        }
        server.close(None).await.expect("close");

        assert_eq!(
            reader.next_event().await,
            Some(InboundEvent::WillDisappear {
                context: "gone".to_string()
            })
        );
        assert_eq!(reader.next_event().await, None);
    }

    #[tokio::test]
    async fn closed_host_rejects_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (launch, server) = fake_stream_deck().await;
        let (host, _reader, writer) = connect(&launch, dir.path().to_path_buf())
            .await
            .expect("connect");
        let mut server = server.await.expect("server");
        next_json(&mut server).await;

        host.close();
        writer.await.expect("writer finishes");
        let closing = server.next().await;
        assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
        assert!(host
            .set_image("ctx", &KeyImage::Encoded("x".into()))
            .is_err());
        assert!(host.open_url("https://example.com").is_err());
    }
}
