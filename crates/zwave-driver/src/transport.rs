//! The byte-stream transport contract and its in-memory test double.
//!
//! The driver consumes any ordered, non-lossy duplex byte stream. The
//! contract is identical in production and in tests; integration tests
//! substitute [`MockTransport`] and script the controller side by hand.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("transport closed")]
    Closed,

    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Events delivered from the transport to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of received bytes, in arrival order.
    Data(Vec<u8>),
    /// The peer or the OS closed the stream.
    Closed,
    /// A non-fatal transport error.
    Error(String),
}

/// An ordered, non-lossy duplex byte stream.
///
/// `open` hands over the receiving half once; writes must preserve order
/// and report failures. The driver calls `close` exactly once during
/// shutdown.
pub trait SerialTransport: Send + 'static {
    /// Open the stream and return the incoming event channel.
    fn open(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Write bytes to the stream, preserving order.
    fn write(
        &mut self,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Close the stream.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// In-memory transport for tests: everything the driver writes is exposed
/// on a channel, and the test injects controller bytes through the handle.
#[derive(Debug)]
pub struct MockTransport {
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    written_tx: mpsc::UnboundedSender<Vec<u8>>,
    open: bool,
}

/// The controller side of a [`MockTransport`].
#[derive(Debug)]
pub struct MockHandle {
    event_tx: mpsc::Sender<TransportEvent>,
    written_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        (
            Self {
                event_rx: Some(event_rx),
                written_tx,
                open: false,
            },
            MockHandle {
                event_tx,
                written_rx,
            },
        )
    }
}

impl SerialTransport for MockTransport {
    fn open(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let rx = self.event_rx.take().ok_or(TransportError::NotOpen)?;
        self.open = true;
        Ok(rx)
    }

    async fn write(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.written_tx
            .send(bytes)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

impl MockHandle {
    /// Inject controller bytes into the driver.
    pub async fn inject(&self, bytes: &[u8]) {
        self.event_tx
            .send(TransportEvent::Data(bytes.to_vec()))
            .await
            .expect("driver side should be alive");
    }

    /// Simulate the transport going away.
    pub async fn close_stream(&self) {
        let _ = self.event_tx.send(TransportEvent::Closed).await;
    }

    /// The next chunk the driver wrote.
    pub async fn next_write(&mut self) -> Vec<u8> {
        self.written_rx
            .recv()
            .await
            .expect("driver side should be alive")
    }

    /// Like [`MockHandle::next_write`], skipping pure ACK/NAK frames. Test
    /// scripts usually care about the next data frame only.
    pub async fn next_data_frame(&mut self) -> Vec<u8> {
        loop {
            let chunk = self.next_write().await;
            if chunk.len() == 1 && (chunk[0] == 0x06 || chunk[0] == 0x15 || chunk[0] == 0x18) {
                continue;
            }
            return chunk;
        }
    }
}
