//! Response content-encoding negotiation.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::http::{Headers, Response};

/// A content coding the server can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
        }
    }

    /// First supported coding listed in an `Accept-Encoding` value.
    ///
    /// Tokens are trimmed and compared exactly; quality values are not
    /// interpreted, so `gzip;q=0` is not recognized.
    pub fn from_accept_encoding(header: &str) -> Option<Self> {
        header.split(',').map(str::trim).find_map(|token| match token {
            "gzip" => Some(ContentEncoding::Gzip),
            _ => None,
        })
    }

    fn encode(&self, data: &[u8], level: u32) -> io::Result<Vec<u8>> {
        match self {
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

/// Compresses response bodies for clients that ask for it.
#[derive(Debug, Clone, Copy)]
pub struct Negotiator {
    level: u32,
}

impl Negotiator {
    /// `level` is the gzip compression level, capped at 9.
    pub fn new(level: u32) -> Self {
        Negotiator {
            level: level.min(9),
        }
    }

    /// Re-encode `response` according to the request's `Accept-Encoding`.
    ///
    /// A missing, empty or unsupported header leaves the response as it is.
    /// On success the body is replaced by its encoded form and
    /// `Content-Encoding` is set. `Content-Length` is not touched.
    pub fn negotiate(&self, request_headers: &Headers, response: &mut Response) -> io::Result<()> {
        let accepted = match request_headers.get("Accept-Encoding") {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(()),
        };
        let encoding = match ContentEncoding::from_accept_encoding(accepted) {
            Some(encoding) => encoding,
            None => return Ok(()),
        };

        let encoded = encoding.encode(&response.body, self.level)?;
        response.replace_body(encoded);
        response
            .headers
            .insert("Content-Encoding".to_string(), encoding.as_str().to_string());
        Ok(())
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Negotiator::new(Compression::default().level())
    }
}
