use crate::server::{
    buffer::{ReadBuffer, WriteQueue},
    web_socket::WebSocket,
};
use std::{net::SocketAddr, rc::Rc};
use tokio::{net::tcp::OwnedWriteHalf, task::JoinHandle};

/// Identifier of one accepted connection. Monotonic, starts at 1, never
/// reused for the lifetime of the owning server.
pub type ConnectionId = u64;

/// Per-connection state owned by the server.
///
/// The transport is split: the write half lives here (shared with in-flight
/// flush tasks), the read half is owned by the connection's read loop.
/// Dropping the connection aborts that loop, which closes the socket.
pub(crate) struct Connection {
    id: ConnectionId,
    peer: SocketAddr,

    pub(crate) read_buf: ReadBuffer,
    pub(crate) write_buf: WriteQueue,
    pub(crate) write_half: Rc<OwnedWriteHalf>,
    pub(crate) web_socket: Option<WebSocket>,

    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, peer: SocketAddr, write_half: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            read_buf: ReadBuffer::default(),
            write_buf: WriteQueue::default(),
            write_half: Rc::new(write_half),
            web_socket: None,
            reader: None,
        }
    }

    #[inline]
    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// One-shot: installing a second WebSocket state is a programming error.
    pub(crate) fn set_web_socket(&mut self, web_socket: WebSocket) {
        debug_assert!(self.web_socket.is_none());
        self.web_socket = Some(web_socket);
    }

    pub(crate) fn set_reader(&mut self, reader: JoinHandle<()>) {
        self.reader = Some(reader);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::debug!(connection_id = self.id, "destroying connection");
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}
