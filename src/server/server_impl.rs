use crate::{
    errors::ErrorKind,
    http::{
        parser::{self, ParseStatus},
        request::RequestInfo,
        response::ResponseInfo,
        types::{slice_to_usize, StatusCode},
    },
    limits::MAX_BODY_SIZE,
    server::{
        connection::{Connection, ConnectionId},
        web_socket::{self, ParseResult, WebSocket},
    },
};
use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    net::SocketAddr,
    rc::{Rc, Weak},
};
use tokio::{
    io::AsyncReadExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    task::{spawn_local, JoinHandle},
};
use tracing::{debug, error};

/// Opaque description of what kind of traffic a send produces. Threaded
/// from each send site down to the write path, where it is logged; the
/// server itself never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficAnnotation(pub &'static str);

const ERROR_RESPONSE_ANNOTATION: TrafficAnnotation =
    TrafficAnnotation("http_server_error_response");
const WEBSOCKET_CONTROL_ANNOTATION: TrafficAnnotation =
    TrafficAnnotation("websocket_control_frame");

/// Server callbacks.
///
/// Every callback runs on the single scheduler thread and never interleaves
/// with another; a delegate may re-enter the server (`send_*`, `close`)
/// from inside any of them. The server handle is passed into each call so
/// delegates need not hold one.
pub trait Delegate {
    fn on_connect(&self, server: &HttpServer, connection_id: ConnectionId);

    fn on_http_request(&self, server: &HttpServer, connection_id: ConnectionId, request: RequestInfo);

    fn on_websocket_request(
        &self,
        server: &HttpServer,
        connection_id: ConnectionId,
        request: RequestInfo,
    );

    fn on_websocket_message(&self, server: &HttpServer, connection_id: ConnectionId, message: String);

    /// Invoked exactly once per connection, after which no further
    /// callbacks for `connection_id` occur.
    fn on_close(&self, server: &HttpServer, connection_id: ConnectionId);
}

struct ServerInner {
    delegate: Rc<dyn Delegate>,
    connections: HashMap<ConnectionId, Connection>,
    // Connections removed from the live set but kept alive until the next
    // scheduler tick, so callers up the stack can finish with them.
    closed_connections: Vec<Connection>,
    last_id: ConnectionId,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(accept_task) = &self.accept_task {
            accept_task.abort();
        }
    }
}

/// Single-threaded, event-driven HTTP/1.1 and WebSocket server.
///
/// The handle is cheap to clone; all clones drive the same server. Every
/// method is safe to call re-entrantly from delegate callbacks. Callbacks
/// for a connection stop permanently once [`close`](Self::close) ran for it.
///
/// # Examples
///
/// ```no_run
/// use beacon_web::{Delegate, HttpServer, RequestInfo, TrafficAnnotation};
/// use std::rc::Rc;
/// use tokio::net::TcpListener;
///
/// struct Echo;
///
/// impl Delegate for Echo {
///     fn on_connect(&self, _: &HttpServer, _: u64) {}
///     fn on_http_request(&self, server: &HttpServer, id: u64, request: RequestInfo) {
///         let body = String::from_utf8_lossy(&request.data).into_owned();
///         server.send_200(id, &body, "text/plain", TrafficAnnotation("echo"));
///     }
///     fn on_websocket_request(&self, server: &HttpServer, id: u64, request: RequestInfo) {
///         server.accept_websocket(id, &request, TrafficAnnotation("echo"));
///     }
///     fn on_websocket_message(&self, server: &HttpServer, id: u64, message: String) {
///         server.send_over_websocket(id, &message, TrafficAnnotation("echo"));
///     }
///     fn on_close(&self, _: &HttpServer, _: u64) {}
/// }
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let local = tokio::task::LocalSet::new();
///     local
///         .run_until(async {
///             let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
///             let _server = HttpServer::new(listener, Rc::new(Echo));
///             std::future::pending::<()>().await;
///         })
///         .await;
/// }
/// ```
#[derive(Clone)]
pub struct HttpServer {
    inner: Rc<RefCell<ServerInner>>,
}

impl HttpServer {
    /// Takes ownership of a bound listener and starts accepting on the
    /// next scheduler tick, so the caller finishes wiring up before the
    /// first callback fires.
    ///
    /// Must be called within a [`tokio::task::LocalSet`] on a
    /// current-thread runtime.
    pub fn new(listener: TcpListener, delegate: Rc<dyn Delegate>) -> Self {
        let inner = Rc::new(RefCell::new(ServerInner {
            delegate,
            connections: HashMap::new(),
            closed_connections: Vec::new(),
            last_id: 0,
            local_addr: listener.local_addr().ok(),
            accept_task: None,
        }));

        let accept_task = spawn_local(accept_loop(listener, Rc::downgrade(&inner)));
        inner.borrow_mut().accept_task = Some(accept_task);

        Self { inner }
    }

    /// Address the server socket is bound to.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.borrow().local_addr
    }

    /// Raises or lowers the ceiling of the connection's read buffer.
    pub fn set_receive_buffer_size(&self, connection_id: ConnectionId, size: usize) {
        if let Some(connection) = self.inner.borrow_mut().connections.get_mut(&connection_id) {
            connection.read_buf.set_max_size(size);
        }
    }

    /// Raises or lowers the ceiling of the connection's write queue.
    pub fn set_send_buffer_size(&self, connection_id: ConnectionId, size: usize) {
        if let Some(connection) = self.inner.borrow_mut().connections.get_mut(&connection_id) {
            connection.write_buf.set_max_size(size);
        }
    }
}

// Send API.
impl HttpServer {
    /// Completes the WebSocket handshake on an upgraded connection. No-op
    /// if the connection is gone; a handshake without a key answers 500
    /// and closes.
    pub fn accept_websocket(
        &self,
        connection_id: ConnectionId,
        request: &RequestInfo,
        annotation: TrafficAnnotation,
    ) {
        let response = {
            let state = self.inner.borrow();
            let Some(connection) = state.connections.get(&connection_id) else {
                return;
            };
            debug_assert!(connection.web_socket.is_some());
            let Some(web_socket) = connection.web_socket.as_ref() else {
                return;
            };
            web_socket.accept(request)
        };

        match response {
            Some(bytes) => self.send_raw(connection_id, bytes, annotation),
            None => {
                self.send_500(connection_id, "invalid websocket handshake", annotation);
                self.close(connection_id);
            }
        }
    }

    /// Sends a text message over an upgraded connection. No-op if the
    /// connection is gone or was never upgraded.
    pub fn send_over_websocket(
        &self,
        connection_id: ConnectionId,
        message: &str,
        annotation: TrafficAnnotation,
    ) {
        let upgraded = {
            let state = self.inner.borrow();
            state
                .connections
                .get(&connection_id)
                .is_some_and(|connection| connection.web_socket.is_some())
        };

        if upgraded {
            self.send_raw(connection_id, web_socket::encode_text_frame(message), annotation);
        }
    }

    /// Queues raw bytes and starts the write loop unless one is already
    /// in flight for this connection.
    pub fn send_raw(&self, connection_id: ConnectionId, data: Vec<u8>, annotation: TrafficAnnotation) {
        let start_write = {
            let mut state = self.inner.borrow_mut();
            let Some(connection) = state.connections.get_mut(&connection_id) else {
                return;
            };

            debug!(connection_id, annotation = annotation.0, bytes = data.len(), "queueing write");
            let writing_in_progress = !connection.write_buf.is_empty();
            if !connection.write_buf.append(data) {
                drop(state);
                self.close_with_error(connection_id, ErrorKind::WriteQueueFull);
                return;
            }
            !writing_in_progress
        };

        if start_write {
            self.do_write_loop(connection_id);
        }
    }

    /// Serializes and queues a response.
    pub fn send_response(
        &self,
        connection_id: ConnectionId,
        response: ResponseInfo,
        annotation: TrafficAnnotation,
    ) {
        self.send_raw(connection_id, response.serialize().into_bytes(), annotation);
    }

    /// Sends `status` with content headers, then the body.
    pub fn send(
        &self,
        connection_id: ConnectionId,
        status: StatusCode,
        data: &str,
        content_type: &str,
        annotation: TrafficAnnotation,
    ) {
        let mut response = ResponseInfo::new(status);
        response.set_content_headers(data.len(), content_type);
        self.send_response(connection_id, response, annotation);
        self.send_raw(connection_id, data.as_bytes().to_vec(), annotation);
    }

    pub fn send_200(
        &self,
        connection_id: ConnectionId,
        data: &str,
        content_type: &str,
        annotation: TrafficAnnotation,
    ) {
        self.send(connection_id, StatusCode::Ok, data, content_type, annotation);
    }

    pub fn send_404(&self, connection_id: ConnectionId, annotation: TrafficAnnotation) {
        self.send_response(connection_id, ResponseInfo::for_404(), annotation);
    }

    pub fn send_500(&self, connection_id: ConnectionId, message: &str, annotation: TrafficAnnotation) {
        self.send_response(connection_id, ResponseInfo::for_500(message), annotation);
    }

    /// Removes the connection, fires the terminal `on_close`, and destroys
    /// the connection on the next scheduler tick. Any in-flight read or
    /// write completion finds the connection gone and exits.
    pub fn close(&self, connection_id: ConnectionId) {
        let delegate = {
            let mut state = self.inner.borrow_mut();
            let Some(connection) = state.connections.remove(&connection_id) else {
                return;
            };
            state.closed_connections.push(connection);
            Rc::clone(&state.delegate)
        };

        delegate.on_close(self, connection_id);

        // Callers up the stack may still hold on to this connection, so the
        // graveyard is drained by a task instead of right here. The task is
        // idempotent; scheduling it once per close is fine.
        let weak = Rc::downgrade(&self.inner);
        spawn_local(async move {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().closed_connections.clear();
            }
        });
    }
}

// Accept path.
impl HttpServer {
    fn handle_accept(&self, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();

        let (connection_id, delegate) = {
            let mut state = self.inner.borrow_mut();
            state.last_id += 1;
            let connection_id = state.last_id;
            state
                .connections
                .insert(connection_id, Connection::new(connection_id, peer, write_half));
            (connection_id, Rc::clone(&state.delegate))
        };

        debug!(connection_id, %peer, "connection accepted");
        delegate.on_connect(self, connection_id);
        if !self.has_connection(connection_id) {
            // Closed synchronously by the delegate; dropping the read half
            // here finishes tearing down the socket.
            return;
        }

        let reader = spawn_local(read_loop(
            Rc::downgrade(&self.inner),
            connection_id,
            read_half,
        ));
        if let Some(connection) = self.inner.borrow_mut().connections.get_mut(&connection_id) {
            connection.set_reader(reader);
        } else {
            reader.abort();
        }
    }
}

// Read path.
impl HttpServer {
    /// Drains complete requests/frames out of the read buffer. Returns
    /// `false` once the connection is closed.
    fn process_read_buffer(&self, connection_id: ConnectionId) -> bool {
        enum Action {
            Wait,
            Continue,
            Fail(ErrorKind),
            Control(Vec<u8>),
            WsMessage(String),
            WsUpgrade(RequestInfo),
            HttpRequest(RequestInfo),
            BadBody(ErrorKind),
        }

        loop {
            let (action, delegate) = {
                let mut state = self.inner.borrow_mut();
                let delegate = Rc::clone(&state.delegate);
                let Some(connection) = state.connections.get_mut(&connection_id) else {
                    return false;
                };
                if connection.read_buf.readable().is_empty() {
                    return true;
                }

                let action = if let Some(web_socket) = connection.web_socket.as_mut() {
                    let mut message = String::new();
                    let result = web_socket.read(&mut connection.read_buf, &mut message);
                    let control = web_socket.take_control_reply();
                    match result {
                        ParseResult::Incomplete => Action::Wait,
                        ParseResult::Close | ParseResult::Error => {
                            Action::Fail(ErrorKind::ConnectionClosed)
                        }
                        ParseResult::OkFinal => Action::WsMessage(message),
                        ParseResult::OkMiddle | ParseResult::Ping | ParseResult::Pong => {
                            // Pings are answered here; the delegate never
                            // sees control traffic.
                            match control {
                                Some(reply) => Action::Control(reply),
                                None => Action::Continue,
                            }
                        }
                    }
                } else {
                    // The prelude is reparsed from the buffer start on every
                    // arrival; only large uploads would notice.
                    let mut request = RequestInfo::new();
                    match parser::parse(connection.read_buf.readable(), &mut request) {
                        ParseStatus::Incomplete => Action::Wait,
                        ParseStatus::Invalid => Action::Fail(ErrorKind::HeaderParse),
                        ParseStatus::Complete(body_start) => {
                            request.peer = Some(connection.peer());

                            if request.is_websocket_upgrade() {
                                connection.set_web_socket(WebSocket::new());
                                connection.read_buf.did_consume(body_start);
                                Action::WsUpgrade(request)
                            } else if let Some(raw) = request.header_value("content-length") {
                                match slice_to_usize(raw.as_bytes()) {
                                    None => Action::BadBody(ErrorKind::BadContentLength),
                                    Some(length) if length > MAX_BODY_SIZE => {
                                        Action::BadBody(ErrorKind::BodyTooLarge)
                                    }
                                    Some(length) => {
                                        let readable = connection.read_buf.readable();
                                        if readable.len() - body_start < length {
                                            // Body still in flight.
                                            Action::Wait
                                        } else {
                                            request.data = readable
                                                [body_start..body_start + length]
                                                .to_vec();
                                            connection.read_buf.did_consume(body_start + length);
                                            Action::HttpRequest(request)
                                        }
                                    }
                                }
                            } else {
                                connection.read_buf.did_consume(body_start);
                                Action::HttpRequest(request)
                            }
                        }
                    }
                };

                (action, delegate)
            };

            match action {
                Action::Wait => return true,
                Action::Continue => {}
                Action::Fail(error) => {
                    self.close_with_error(connection_id, error);
                    return false;
                }
                Action::Control(reply) => {
                    self.send_raw(connection_id, reply, WEBSOCKET_CONTROL_ANNOTATION);
                }
                Action::WsMessage(message) => {
                    delegate.on_websocket_message(self, connection_id, message);
                    if !self.has_connection(connection_id) {
                        return false;
                    }
                }
                Action::WsUpgrade(request) => {
                    delegate.on_websocket_request(self, connection_id, request);
                    if !self.has_connection(connection_id) {
                        return false;
                    }
                }
                Action::HttpRequest(request) => {
                    delegate.on_http_request(self, connection_id, request);
                    if !self.has_connection(connection_id) {
                        return false;
                    }
                }
                Action::BadBody(error) => {
                    self.send_response(
                        connection_id,
                        ResponseInfo::for_500("request content-length too big or unknown."),
                        ERROR_RESPONSE_ANNOTATION,
                    );
                    self.close_with_error(connection_id, error);
                    return false;
                }
            }
        }
    }
}

// Write path.
impl HttpServer {
    /// Pushes queued bytes at the socket until the queue drains or the
    /// socket pushes back; a push-back re-arms via a writability wait.
    fn do_write_loop(&self, connection_id: ConnectionId) {
        enum Step {
            Done,
            Wrote,
            Pending(Rc<OwnedWriteHalf>),
            Failed(io::Error),
        }

        loop {
            let step = {
                let mut state = self.inner.borrow_mut();
                let Some(connection) = state.connections.get_mut(&connection_id) else {
                    return;
                };

                if connection.write_buf.size_to_write() == 0 {
                    Step::Done
                } else {
                    match connection.write_half.try_write(connection.write_buf.writable_head()) {
                        Ok(0) => Step::Failed(io::ErrorKind::WriteZero.into()),
                        Ok(written) => {
                            connection.write_buf.did_consume(written);
                            Step::Wrote
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            Step::Pending(Rc::clone(&connection.write_half))
                        }
                        Err(err) => Step::Failed(err),
                    }
                }
            };

            match step {
                Step::Done => return,
                Step::Wrote => {}
                Step::Failed(err) => {
                    self.close_with_error(connection_id, err.into());
                    return;
                }
                Step::Pending(write_half) => {
                    let weak = Rc::downgrade(&self.inner);
                    spawn_local(async move {
                        // On a writability error the resumed loop surfaces
                        // it through the next try_write.
                        let _ = write_half.writable().await;
                        if let Some(inner) = weak.upgrade() {
                            HttpServer { inner }.do_write_loop(connection_id);
                        }
                    });
                    return;
                }
            }
        }
    }
}

impl HttpServer {
    fn has_connection(&self, connection_id: ConnectionId) -> bool {
        self.inner.borrow().connections.contains_key(&connection_id)
    }

    fn close_with_error(&self, connection_id: ConnectionId, error: ErrorKind) {
        debug!(connection_id, %error, "closing connection");
        self.close(connection_id);
    }
}

async fn accept_loop(listener: TcpListener, weak: Weak<RefCell<ServerInner>>) {
    loop {
        let accepted = listener.accept().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let server = HttpServer { inner };

        match accepted {
            Ok((stream, peer)) => server.handle_accept(stream, peer),
            Err(err) => {
                error!(%err, "accept error");
                return;
            }
        }
    }
}

async fn read_loop(
    weak: Weak<RefCell<ServerInner>>,
    connection_id: ConnectionId,
    mut read_half: OwnedReadHalf,
) {
    let mut chunk = Vec::new();

    loop {
        let wanted = {
            let Some(inner) = weak.upgrade() else { return };
            let server = HttpServer { inner };

            let room = {
                let mut state = server.inner.borrow_mut();
                let Some(connection) = state.connections.get_mut(&connection_id) else {
                    return;
                };
                if connection.read_buf.remaining_capacity() == 0
                    && !connection.read_buf.increase_capacity()
                {
                    None
                } else {
                    Some(connection.read_buf.remaining_capacity())
                }
            };

            match room {
                Some(wanted) => wanted,
                None => {
                    server.close_with_error(connection_id, ErrorKind::BufferExhausted);
                    return;
                }
            }
        };

        chunk.resize(wanted, 0);
        let read = read_half.read(&mut chunk).await;

        let Some(inner) = weak.upgrade() else { return };
        let server = HttpServer { inner };
        match read {
            Err(err) => {
                server.close_with_error(connection_id, err.into());
                return;
            }
            Ok(0) => {
                server.close_with_error(connection_id, ErrorKind::ConnectionClosed);
                return;
            }
            Ok(bytes) => {
                {
                    let mut state = server.inner.borrow_mut();
                    let Some(connection) = state.connections.get_mut(&connection_id) else {
                        return;
                    };
                    connection.read_buf.writable_tail()[..bytes].copy_from_slice(&chunk[..bytes]);
                    connection.read_buf.did_read(bytes);
                }
                if !server.process_read_buffer(connection_id) {
                    return;
                }
            }
        }
    }
}
