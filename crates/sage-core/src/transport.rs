//! Transport adapter (C9): a boundary-only shim between the core's
//! `Envelope` shape and whatever framing the host actually speaks. The core
//! never depends on a concrete transport — it only ever calls `send` and is
//! called back through `on_receive`.

use sage_proto::Envelope;

use crate::error::SageError;

/// Implemented by the host. `send` pushes one envelope out; `on_receive`
/// is how the host hands an inbound envelope back into the core (the
/// handshake machine or session manager, depending on phase).
pub trait TransportAdapter: Send + Sync {
    fn send(&self, envelope: Envelope) -> Result<(), SageError>;
    fn on_receive(&self, envelope: Envelope) -> Result<(), SageError>;
}

/// In-memory reference adapter backed by an `mpsc` channel, used to drive
/// handshake/session integration tests without a real network.
pub struct ChannelTransport {
    outbound: std::sync::mpsc::Sender<Envelope>,
    inbound: std::sync::Mutex<std::sync::mpsc::Receiver<Envelope>>,
}

impl ChannelTransport {
    /// Build a connected pair: `a`'s outbound is `b`'s inbound and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_ab, rx_ab) = std::sync::mpsc::channel();
        let (tx_ba, rx_ba) = std::sync::mpsc::channel();
        (
            ChannelTransport {
                outbound: tx_ab,
                inbound: std::sync::Mutex::new(rx_ba),
            },
            ChannelTransport {
                outbound: tx_ba,
                inbound: std::sync::Mutex::new(rx_ab),
            },
        )
    }

    pub fn try_recv(&self) -> Option<Envelope> {
        self.inbound.lock().unwrap().try_recv().ok()
    }
}

impl TransportAdapter for ChannelTransport {
    fn send(&self, envelope: Envelope) -> Result<(), SageError> {
        self.outbound
            .send(envelope)
            .map_err(|e| SageError::TransportError(e.to_string()))
    }

    /// The reference adapter has no independent receive loop of its own —
    /// callers pull with `try_recv` and feed the handshake machine directly.
    fn on_receive(&self, _envelope: Envelope) -> Result<(), SageError> {
        Ok(())
    }
}
