//! Handlers for the routes served by the `trellis` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trellis::{Request, Response, RouteError, Router, Status};

/// Register every application route on `router`.
pub fn register(router: &mut Router, directory: PathBuf) -> Result<(), RouteError> {
    let directory = Arc::new(directory);

    router.get("/", root)?;
    router.get("/echo/{str}", echo)?;
    router.get("/user-agent", user_agent)?;

    let dir = directory.clone();
    router.get("/files/{filepath}", move |req: &Request| read_file(&dir, req))?;
    let dir = directory;
    router.post("/files/{filepath}", move |req: &Request| write_file(&dir, req))?;
    Ok(())
}

fn root(_req: &Request) -> Response {
    Response::new(Status::Ok)
}

fn echo(req: &Request) -> Response {
    text(req.param("str").unwrap_or_default())
}

fn user_agent(req: &Request) -> Response {
    text(req.header("User-Agent").unwrap_or_default())
}

fn text(body: &str) -> Response {
    Response::new(Status::Ok)
        .with_header("Content-Type", "text/plain")
        .with_body(body)
}

/// `None` for names that would leave `directory`.
fn resolve(directory: &Path, req: &Request) -> Option<PathBuf> {
    match req.param("filepath") {
        Some(name) if name != "." && name != ".." && !name.contains('\\') => {
            Some(directory.join(name))
        }
        _ => None,
    }
}

fn read_file(directory: &Path, req: &Request) -> Response {
    let path = match resolve(directory, req) {
        Some(path) => path,
        None => return Response::new(Status::NotFound),
    };

    match fs::read(&path) {
        Ok(contents) => Response::new(Status::Ok)
            .with_header("Content-Type", "application/octet-stream")
            .with_body(contents),
        Err(err) => {
            log::debug!("cannot read {}: {}", path.display(), err);
            Response::new(Status::NotFound)
        }
    }
}

fn write_file(directory: &Path, req: &Request) -> Response {
    let path = match resolve(directory, req) {
        Some(path) => path,
        None => return Response::new(Status::InternalServerError),
    };

    match fs::write(&path, &req.body) {
        Ok(()) => Response::new(Status::Created),
        Err(err) => {
            log::warn!("cannot write {}: {}", path.display(), err);
            Response::new(Status::InternalServerError)
        }
    }
}
