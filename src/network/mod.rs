//! Network subsystem for UDP voice transport

pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::{ReceiveLoop, ReceiverStats};
pub use sender::{CapturePump, SenderStats};
pub use udp::{create_socket, DatagramTransport, FrameSink, RecvOutcome, TransportStats};
