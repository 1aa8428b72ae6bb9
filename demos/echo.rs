//! A small echo server built on the trellis router.
//! Demonstrates literal and wildcard routes and the blocking accept loop.
//!
//! Try it with `curl -H 'Accept-Encoding: gzip' --compressed localhost:4221/echo/hello`.

use trellis::{Request, Response, Router, Server, Status};

/// Replies with the `{str}` segment as plain text.
fn echo(req: &Request) -> Response {
    Response::new(Status::Ok)
        .with_header("Content-Type", "text/plain")
        .with_body(req.param("str").unwrap_or_default())
}

fn main() -> trellis::Result<()> {
    let mut router = Router::new();
    router.get("/", |_: &Request| Response::new(Status::Ok))?;
    router.get("/echo/{str}", echo)?;

    println!("{}", router);
    println!("Listening on http://127.0.0.1:4221");
    Server::bind("127.0.0.1:4221")?.serve(router)
}
