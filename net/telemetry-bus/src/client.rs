use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::{Frame, FrameCodec};
use crate::BusInner;

pub(crate) enum ClientCmd {
    Send(Frame),
    Subscribe(String),
    Flush,
}

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
// Matches the fabric's default coalescing period; explicit Flush
// commands bypass it.
const AUTO_FLUSH: Duration = Duration::from_millis(100);

/// Connection loop: connect, replay subscriptions, shuttle frames.
/// Runs until the command channel closes (the bus was dropped).
pub(crate) async fn run(addr: String, mut rx: UnboundedReceiver<ClientCmd>, inner: Arc<BusInner>) {
    let mut topics: Vec<String> = Vec::new();
    loop {
        let stream = match TcpStream::connect(&addr).await {
            Ok(s) => s,
            Err(e) => {
                debug!("telemetry server {addr} not reachable: {e}");
                if wait_or_shutdown(&mut rx, &mut topics).await {
                    return;
                }
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }
        info!("connected to telemetry server {addr}");
        let mut framed = Framed::new(stream, FrameCodec::default());

        // Re-bind every known subscription on (re)connect.
        let mut ok = true;
        for t in &topics {
            if framed
                .send(Frame::Subscribe { topic: t.clone() })
                .await
                .is_err()
            {
                ok = false;
                break;
            }
        }

        let mut flush_timer = tokio::time::interval(AUTO_FLUSH);
        while ok {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None => return,
                    Some(ClientCmd::Subscribe(topic)) => {
                        topics.push(topic.clone());
                        ok = framed.send(Frame::Subscribe { topic }).await.is_ok();
                    }
                    Some(ClientCmd::Send(frame)) => {
                        ok = framed.feed(frame).await.is_ok();
                    }
                    Some(ClientCmd::Flush) => {
                        ok = framed.flush().await.is_ok();
                    }
                },
                _ = flush_timer.tick() => {
                    ok = framed.flush().await.is_ok();
                }
                item = framed.next() => match item {
                    Some(Ok(Frame::Sample(s))) => {
                        inner.deliver(&s.topic, s.timestamp_us, s.payload);
                    }
                    Some(Ok(Frame::Subscribe { .. })) => {}
                    Some(Err(e)) => {
                        warn!("telemetry read error: {e}");
                        ok = false;
                    }
                    None => {
                        warn!("telemetry server closed the connection");
                        ok = false;
                    }
                },
            }
        }
        warn!("telemetry bus disconnected from {addr}, reconnecting");
        if wait_or_shutdown(&mut rx, &mut topics).await {
            return;
        }
    }
}

/// Sleep out the reconnect delay while still recording subscription
/// requests (they must survive to the next connection). Returns true
/// if the bus was dropped.
async fn wait_or_shutdown(rx: &mut UnboundedReceiver<ClientCmd>, topics: &mut Vec<String>) -> bool {
    let deadline = tokio::time::Instant::now() + RECONNECT_DELAY;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            cmd = rx.recv() => match cmd {
                None => return true,
                Some(ClientCmd::Subscribe(topic)) => topics.push(topic),
                // Nothing to write to while disconnected.
                Some(ClientCmd::Send(_)) | Some(ClientCmd::Flush) => {}
            },
        }
    }
}
