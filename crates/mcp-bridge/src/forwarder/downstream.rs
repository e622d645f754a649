//! Write side of one downstream event stream.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frame::Notice;

/// Frames buffered between the forwarder and the HTTP response body.
const DOWNSTREAM_BUFFER: usize = 64;

/// Handle for writing frames to a downstream client.
///
/// `closed` fires when the client goes away, when the process shuts down
/// (it is a child of the server token), or when a write fails. Once closed,
/// every further write is a no-op.
#[derive(Debug, Clone)]
pub struct Downstream {
    tx: mpsc::Sender<Bytes>,
    closed: CancellationToken,
}

impl Downstream {
    pub fn channel(closed: CancellationToken) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(DOWNSTREAM_BUFFER);
        (Self { tx, closed }, rx)
    }

    /// Write raw bytes. Returns false if the stream is closed.
    pub async fn send(&self, bytes: Bytes) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.tx.send(bytes) => {
                if sent.is_err() {
                    self.closed.cancel();
                }
                sent.is_ok()
            }
        }
    }

    pub async fn notify(&self, notice: Notice) -> bool {
        self.send(notice.to_frame()).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Cancel `closed` as soon as the receiving side is dropped.
    pub fn watch_close(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => closed.cancel(),
                _ = closed.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_after_close_are_dropped() {
        let (downstream, mut rx) = Downstream::channel(CancellationToken::new());
        assert!(downstream.send(Bytes::from_static(b"a")).await);
        downstream.close();
        assert!(!downstream.send(Bytes::from_static(b"b")).await);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn dropping_receiver_closes() {
        let (downstream, rx) = Downstream::channel(CancellationToken::new());
        let watcher = downstream.watch_close();
        drop(rx);
        watcher.await.unwrap();
        assert!(downstream.is_closed());
    }

    #[tokio::test]
    async fn parent_cancellation_closes() {
        let parent = CancellationToken::new();
        let (downstream, _rx) = Downstream::channel(parent.child_token());
        parent.cancel();
        assert!(downstream.is_closed());
        assert!(!downstream.notify(Notice::CredentialsHint).await);
    }
}
