//! The hub over TCP: one JSON [`Frame`] per line in each direction.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::{Face, Forwarder};
use crate::error::TransportError;
use crate::packet::Frame;

/// Default hub address, the conventional NDN forwarder port.
pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:6363";

/// Accept faces forever, bridging each connection onto `forwarder`.
pub async fn serve(listener: TcpListener, forwarder: Forwarder) -> Result<(), TransportError> {
    info!(addr = %listener.local_addr()?, "hub listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let forwarder = forwarder.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, forwarder).await {
                warn!(%peer, error = %e, "face connection ended with error");
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, forwarder: Forwarder) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let id = forwarder.add_face(tx);
    info!(%peer, face = id, "face connected");

    let writer = tokio::spawn(write_frames(rx, write));
    let result = read_frames(read, |frame| forwarder.handle(id, frame)).await;

    forwarder.remove_face(id);
    writer.abort();
    info!(%peer, face = id, "face disconnected");
    result
}

/// Connect to a hub and return a face attached to it.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<Face, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = write_frames(out_rx, write).await {
            warn!(error = %e, "hub writer stopped");
        }
    });
    tokio::spawn(async move {
        let result = read_frames(read, |frame| {
            let _ = in_tx.send(frame);
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "hub reader stopped");
        }
    });

    Ok(Face::new(out_tx, in_rx))
}

async fn write_frames<W>(mut rx: mpsc::UnboundedReceiver<Frame>, mut write: W) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        write.write_all(line.as_bytes()).await?;
    }
    write.shutdown().await?;
    Ok(())
}

async fn read_frames<R, F>(read: R, mut on_frame: F) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    F: FnMut(Frame),
{
    let mut lines = LinesStream::new(BufReader::new(read).lines());
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Frame>(&line) {
            Ok(frame) => on_frame(frame),
            Err(e) => debug!(error = %e, %line, "skipping undecodable frame"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Data, Interest, Name};
    use crate::transport::RequestChannel;

    #[tokio::test]
    async fn faces_talk_through_a_tcp_hub() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Forwarder::new()));

        let producer = connect(addr).await.unwrap();
        let consumer = connect(addr).await.unwrap();

        let prefix: Name = "/serverA".parse().unwrap();
        let mut registration = producer.advertise(&prefix).await.unwrap();
        tokio::spawn(async move {
            while let Some(interest) = registration.next().await {
                let data = Data::new(interest.name.append("testApp").append_version(9))
                    .with_content("HELLO KITTY");
                producer.respond(data).unwrap();
            }
        });

        let data = consumer
            .express(Interest::new("/serverA/1".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(data.content, b"HELLO KITTY");
        assert_eq!(data.name.version(), Some(9));
    }
}
