//! Line-oriented HTTP/1.1 request parsing over a blocking reader.

use std::io::{BufRead, Read};

use crate::error::{ParseError, ParseResult};
use crate::http::{Headers, Method, PathParams, Request};

/// How the parser treats a body it cannot frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyPolicy {
    /// A malformed `Content-Length` or a short body yields an empty body,
    /// and header reading stops quietly at the first malformed line.
    #[default]
    Lenient,
    /// All of the above are parse failures.
    Strict,
}

/// Read one request from `reader`.
///
/// Either a complete request is returned or an error; bytes consumed before
/// the error are lost.
pub fn parse_request<R: BufRead>(reader: &mut R, policy: BodyPolicy) -> ParseResult<Request> {
    let line = read_line(reader)?;
    let line = String::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;

    let (method, path, version) = match line.split_whitespace().collect::<Vec<_>>()[..] {
        [method, path, version] => (Method::from(method), path.to_string(), version.to_string()),
        _ => return Err(ParseError::MalformedRequestLine(line.clone())),
    };

    let headers = read_headers(reader, policy)?;
    let body = read_body(reader, &headers, policy)?;

    Ok(Request {
        method,
        path,
        version,
        headers,
        body,
        path_params: PathParams::new(),
    })
}

/// Read a `\r\n`-terminated line and return it without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> ParseResult<Vec<u8>> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;

    if !line.ends_with(b"\n") {
        return Err(ParseError::UnexpectedEof);
    }
    if line.len() < 2 {
        return Err(ParseError::LineTooShort);
    }
    if !line.ends_with(b"\r\n") {
        return Err(ParseError::MissingCrlf);
    }

    line.truncate(line.len() - 2);
    Ok(line)
}

fn read_headers<R: BufRead>(reader: &mut R, policy: BodyPolicy) -> ParseResult<Headers> {
    let mut headers = Headers::new();

    loop {
        let line = match read_line(reader) {
            Ok(line) => line,
            Err(ParseError::Io(err)) => return Err(ParseError::Io(err)),
            Err(err) => {
                if policy == BodyPolicy::Strict {
                    return Err(err);
                }
                break;
            }
        };
        if line.is_empty() {
            break;
        }

        let parsed = std::str::from_utf8(&line)
            .ok()
            .and_then(|line| line.split_once(':'));
        match parsed {
            Some((name, value)) => {
                headers.insert(name.to_string(), value.trim().to_string());
            }
            None if policy == BodyPolicy::Strict => {
                return Err(ParseError::MalformedHeader(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            }
            None => break,
        }
    }

    Ok(headers)
}

fn read_body<R: Read>(reader: &mut R, headers: &Headers, policy: BodyPolicy) -> ParseResult<Vec<u8>> {
    let declared = match headers.get("Content-Length") {
        Some(value) => value,
        None => return Ok(Vec::new()),
    };

    let length = match declared.parse::<usize>() {
        Ok(length) => length,
        Err(_) if policy == BodyPolicy::Strict => {
            return Err(ParseError::InvalidContentLength(declared.clone()));
        }
        Err(_) => return Ok(Vec::new()),
    };

    let mut body = Vec::with_capacity(length.min(64 * 1024));
    reader.take(length as u64).read_to_end(&mut body)?;

    if body.len() != length {
        if policy == BodyPolicy::Strict {
            return Err(ParseError::TruncatedBody {
                expected: length,
                received: body.len(),
            });
        }
        log::debug!(
            "body shorter than content-length ({} of {} bytes), treating as empty",
            body.len(),
            length
        );
        return Ok(Vec::new());
    }

    Ok(body)
}
