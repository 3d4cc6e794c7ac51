//! In-process channel pair.

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    Result,
    channel::{Channel, Inbound},
    error::Error,
};

/// Session-side end of an in-memory connection.
pub struct MemoryChannel {
    name: String,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closed: bool,
}

/// Peer-side end: feeds frames in and reads what the session sent.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryChannel {
    /// Create a connected pair.
    #[must_use]
    pub fn pair(name: impl Into<String>) -> (Self, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let channel = Self {
            name: name.into(),
            inbound: in_rx,
            outbound: out_tx,
            closed: false,
        };
        let peer = MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        };
        (channel, peer)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn peer(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self) -> Result<Inbound> {
        if self.closed {
            return Ok(Inbound::Closed);
        }
        Ok(match self.inbound.recv().await {
            Some(text) => Inbound::Message(text),
            None => Inbound::Closed,
        })
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.outbound.send(text).map_err(|_| Error::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }
}

impl MemoryPeer {
    /// Queue a frame for the session. Returns `false` once the session side
    /// has closed.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame.into()).is_ok())
    }

    /// Close the peer's sending half. The session sees [`Inbound::Closed`]
    /// after draining already-queued frames.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next frame the session sent, waiting if none is queued yet. `None`
    /// once the session side is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// All frames the session has sent so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            sent.push(frame);
        }
        sent
    }
}
