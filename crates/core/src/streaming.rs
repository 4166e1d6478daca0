//! Channel-based output streaming with zero-copy bytes
//!
//! Terminal output flows through a bounded channel of `Bytes` chunks. The
//! bound creates natural backpressure when the relay link is slower than the
//! shell produces output; emission order is the delivery order.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Bounded channel for terminal output streaming
pub struct OutputStream {
    tx: mpsc::Sender<Bytes>,
}

impl OutputStream {
    /// Create a new stream with the given buffer capacity (in chunks)
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Send an output chunk, waiting when the buffer is full
    pub async fn send(&self, data: Bytes) -> Result<(), mpsc::error::SendError<Bytes>> {
        self.tx.send(data).await
    }

    /// Get a sender clone (cheap, Arc-based) for use in `spawn_blocking`
    pub fn sender(&self) -> mpsc::Sender<Bytes> {
        self.tx.clone()
    }

    /// Check if the receiving side has gone away
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_send_receive_preserves_order() {
        let (stream, mut rx) = OutputStream::new(10);

        stream.send(Bytes::from("first")).await.unwrap();
        stream.send(Bytes::from("second")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("first"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("second"));
    }

    #[tokio::test]
    async fn test_backpressure_blocks_when_full() {
        let (stream, mut rx) = OutputStream::new(2);

        stream.send(Bytes::from("msg1")).await.unwrap();
        stream.send(Bytes::from("msg2")).await.unwrap();

        let send_task = tokio::spawn(async move {
            stream.send(Bytes::from("msg3")).await.unwrap();
        });

        let result = timeout(Duration::from_millis(100), send_task).await;
        assert!(result.is_err(), "send should block when buffer full");

        rx.recv().await.unwrap();
        let _ = timeout(Duration::from_millis(100), rx.recv()).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_detection() {
        let (stream, rx) = OutputStream::new(4);
        assert!(!stream.is_closed());

        drop(rx);
        tokio::task::yield_now().await;

        assert!(stream.is_closed());
        assert!(stream.send(Bytes::from("msg")).await.is_err());
    }
}
