// P2P networking

mod error;
mod mempool;
mod message;
mod node;
mod peer;

pub use error::{NetworkError, Result};
pub use mempool::Mempool;
pub use message::{GetDataMessage, InvMessage, InvType, Message, MessageType, VersionMessage};
pub use node::{Node, submit_transaction};
pub use peer::{PeerRegistry, read_request, send_data};
