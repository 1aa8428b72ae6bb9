use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::encoding::Negotiator;
use crate::error::{Result, ServerError};
use crate::executor::Executor;
use crate::http::{Request, Response, Status};
use crate::parser::{parse_request, BodyPolicy};
use crate::router::{RouteMiss, Router};

/// Runs the request pipeline for one connection at a time.
///
/// Cheap to clone; clones share the same router.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    negotiator: Negotiator,
    body_policy: BodyPolicy,
}

impl Dispatcher {
    pub fn new(router: Router) -> Self {
        Dispatcher {
            router: Arc::new(router),
            negotiator: Negotiator::default(),
            body_policy: BodyPolicy::default(),
        }
    }

    pub fn body_policy(mut self, policy: BodyPolicy) -> Self {
        self.body_policy = policy;
        self
    }

    pub fn gzip_level(mut self, level: u32) -> Self {
        self.negotiator = Negotiator::new(level);
        self
    }

    /// Read one request from `stream`, answer it, and flush.
    ///
    /// The stream is consumed so it is closed on every return path.
    pub fn dispatch<S: Read + Write>(&self, mut stream: S) -> io::Result<()> {
        let parsed = {
            let mut reader = BufReader::new(&mut stream);
            parse_request(&mut reader, self.body_policy)
        };

        let mut response = match parsed {
            Ok(request) => self.respond(request),
            Err(err) => {
                log::debug!("rejecting unparseable request: {}", err);
                Response::new(Status::InternalServerError)
            }
        };

        response.set_content_length();
        response.write_to(&mut stream)
    }

    /// Route `request`, run its handler and negotiate the encoding.
    ///
    /// `Content-Length` is left for the caller to set once the body is final.
    pub fn respond(&self, mut request: Request) -> Response {
        let found = match self.router.find(&request.method, &request.path) {
            Ok(found) => found,
            Err(RouteMiss::NotFound) => {
                log::debug!("no route for {} {}", request.method, request.path);
                return Response::new(Status::NotFound);
            }
            Err(RouteMiss::MethodNotAllowed) => {
                log::debug!("method {} not allowed at {}", request.method, request.path);
                return Response::new(Status::MethodNotAllowed);
            }
        };

        request.path_params = found.params;
        let handler = found.handler;
        let mut response = match panic::catch_unwind(AssertUnwindSafe(|| handler.call(&request))) {
            Ok(response) => response,
            Err(_) => {
                log::error!("handler for {} {} panicked", request.method, request.path);
                return Response::new(Status::InternalServerError);
            }
        };

        if let Err(err) = self.negotiator.negotiate(&request.headers, &mut response) {
            log::error!("failed to encode response body: {}", err);
            return Response::new(Status::InternalServerError);
        }
        response
    }
}

/// A blocking HTTP/1.1 server: one accept loop, one worker per connection.
///
/// ```no_run
/// use trellis::{Response, Router, Server, Status};
///
/// fn main() -> trellis::Result<()> {
///     let mut router = Router::new();
///     router.get("/", |_req: &trellis::Request| Response::new(Status::Ok))?;
///
///     Server::bind("127.0.0.1:4221")?.serve(router)
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    keep_alive: Duration,
    body_policy: BodyPolicy,
    gzip_level: u32,
}

impl Server {
    /// Bind a listener on `addr` with default settings.
    pub fn bind<A: ToSocketAddrs + ToString>(addr: A) -> Result<Self> {
        Self::with_config(addr, &ServerConfig::default())
    }

    /// Bind on `config.address()` using the rest of `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::with_config(config.address(), config)
    }

    fn with_config<A: ToSocketAddrs + ToString>(addr: A, config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Server {
            listener,
            keep_alive: config.worker_keep_alive(),
            body_policy: config.body_policy(),
            gzip_level: config.gzip_level,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections forever.
    ///
    /// `router` must be fully built; it is frozen here and shared with every
    /// worker. Accept errors and worker spawn failures are logged and the
    /// affected connection is dropped.
    pub fn serve(self, router: Router) -> Result<()> {
        log::info!("listening on {}", self.local_addr()?);
        log::debug!("route tree:\n{}", router);

        let dispatcher = Dispatcher::new(router)
            .body_policy(self.body_policy)
            .gzip_level(self.gzip_level);
        let executor = Executor::new(self.keep_alive);

        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("error accepting connection: {}", err);
                    continue;
                }
            };

            let dispatcher = dispatcher.clone();
            if let Err(err) = executor.execute(move || handle_connection(&dispatcher, stream)) {
                log::error!("dropping connection: {}", err);
            }
        }
        Ok(())
    }
}

fn handle_connection(dispatcher: &Dispatcher, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    if let Err(err) = dispatcher.dispatch(stream) {
        log::warn!("error writing response to {:?}: {}", peer, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use flate2::read::GzDecoder;
    use std::io::Cursor;
    use std::net::Shutdown;

    /// In-memory connection: reads come from `input`, writes land in `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn app() -> Router {
        let mut router = Router::new();
        router.get("/", |_req: &Request| Response::new(Status::Ok)).unwrap();
        router
            .get("/echo/{str}", |req: &Request| {
                Response::new(Status::Ok)
                    .with_header("Content-Type", "text/plain")
                    .with_body(req.param("str").unwrap_or_default())
            })
            .unwrap();
        router
            .post("/files/{filepath}", |req: &Request| {
                Response::new(Status::Created).with_body(req.body.clone())
            })
            .unwrap();
        router
            .get("/panic", |_req: &Request| -> Response { panic!("handler bug") })
            .unwrap();
        router
    }

    fn exchange(dispatcher: &Dispatcher, raw: &[u8]) -> (String, Vec<u8>) {
        let mut conn = Duplex {
            input: Cursor::new(raw.to_vec()),
            output: Vec::new(),
        };
        dispatcher.dispatch(&mut conn).unwrap();
        split_response(&conn.output)
    }

    fn split_response(bytes: &[u8]) -> (String, Vec<u8>) {
        let end = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("incomplete response");
        let head = String::from_utf8(bytes[..end].to_vec()).unwrap();
        (head, bytes[end + 4..].to_vec())
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.split("\r\n")
            .skip(1)
            .filter_map(|line| line.split_once(": "))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    #[test]
    fn test_echo_end_to_end() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(&dispatcher, b"GET /echo/hello HTTP/1.1\r\nHost: x\r\n\r\n");

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header(&head, "Content-Length"), Some("5"));
        assert_eq!(header(&head, "Content-Type"), Some("text/plain"));
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_unknown_path_is_404() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(&dispatcher, b"GET /nope HTTP/1.1\r\n\r\n");

        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(header(&head, "Content-Length"), Some("0"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_wrong_method_is_405() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(&dispatcher, b"GET /files/foo HTTP/1.1\r\n\r\n");

        assert!(head.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_malformed_request_is_500() {
        let dispatcher = Dispatcher::new(app());
        for raw in [&b"garbage\r\n\r\n"[..], &b"GET / HTTP/1.1\n\n"[..], &b""[..]] {
            let (head, body) = exchange(&dispatcher, raw);
            assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
            assert_eq!(header(&head, "Content-Length"), Some("0"));
            assert!(body.is_empty());
        }
    }

    #[test]
    fn test_handler_panic_is_500() {
        let dispatcher = Dispatcher::new(app());
        let (head, _) = exchange(&dispatcher, b"GET /panic HTTP/1.1\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

        // The dispatcher stays usable afterwards.
        let (head, _) = exchange(&dispatcher, b"GET / HTTP/1.1\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_request_body_reaches_handler() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(
            &dispatcher,
            b"POST /files/a.txt HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata",
        );
        assert!(head.starts_with("HTTP/1.1 201 Created\r\n"));
        assert_eq!(body, b"data");
    }

    #[test]
    fn test_strict_policy_rejects_short_body() {
        let raw = b"POST /files/a.txt HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";

        let (head, body) = exchange(&Dispatcher::new(app()), raw);
        assert!(head.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(body.is_empty());

        let strict = Dispatcher::new(app()).body_policy(BodyPolicy::Strict);
        let (head, _) = exchange(&strict, raw);
        assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn test_gzip_content_length_is_compressed_length() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(
            &dispatcher,
            b"GET /echo/abc HTTP/1.1\r\nAccept-Encoding: identity, gzip\r\n\r\n",
        );

        assert_eq!(header(&head, "Content-Encoding"), Some("gzip"));
        let length = body.len().to_string();
        assert_eq!(header(&head, "Content-Length"), Some(length.as_str()));
        assert_ne!(body.len(), 3);

        let mut decoded = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "abc");
    }

    #[test]
    fn test_unsupported_encoding_leaves_body() {
        let dispatcher = Dispatcher::new(app());
        let (head, body) = exchange(
            &dispatcher,
            b"GET /echo/abc HTTP/1.1\r\nAccept-Encoding: br\r\n\r\n",
        );

        assert_eq!(header(&head, "Content-Encoding"), None);
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_respond_fills_path_params() {
        let mut router = Router::new();
        router
            .get("/a/{x}/b", |req: &Request| {
                Response::new(Status::Ok).with_body(format!("{:?}", req.param("x")))
            })
            .unwrap();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.respond(Request::new(Method::Get, "/a/tok/b"));
        assert_eq!(response.body, b"Some(\"tok\")");
    }

    fn roundtrip(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_server_over_tcp() {
        let server = Server::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || server.serve(app()));

        let (head, body) = split_response(&roundtrip(
            addr,
            b"GET /echo/hello HTTP/1.1\r\nHost: x\r\n\r\n",
        ));
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, b"hello");

        let (head, _) = split_response(&roundtrip(addr, b"GET /nope HTTP/1.1\r\n\r\n"));
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    /// A client that never finishes its request must not block others.
    #[test]
    fn test_stalled_connection_does_not_block_others() {
        let server = Server::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || server.serve(app()));

        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled.write_all(b"GET /echo/slow HTTP/1.1\r\n").unwrap();

        let (head, body) = split_response(&roundtrip(addr, b"GET /echo/fast HTTP/1.1\r\n\r\n"));
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body, b"fast");

        stalled.write_all(b"\r\n").unwrap();
        stalled.shutdown(Shutdown::Write).unwrap();
        let mut out = Vec::new();
        stalled.read_to_end(&mut out).unwrap();
        let (_, body) = split_response(&out);
        assert_eq!(body, b"slow");
    }

    #[test]
    fn test_bind_error_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = Server::bind(addr.as_str()).err().unwrap();
        assert!(matches!(err, ServerError::Bind { addr: ref a, .. } if *a == addr));
    }
}
