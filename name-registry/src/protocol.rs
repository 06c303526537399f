use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::record::Record;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const LIST_START: &str = "150 Begin record list";
pub const LIST_END: &str = "226 End record list";

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Lookup {
        record_type: String,
        domain: String,
    },
    List,
    Register {
        domain: String,
        record_type: String,
        value: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("{verb} expects {expected} arguments, got {got}")]
    Arity {
        verb: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown command '{0}'")]
    Unknown(String),
}

impl Command {
    /// Parses one request line. Tokens are separated by runs of whitespace;
    /// verbs are matched exactly.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = parts.split_first() else {
            return Err(ParseError::Empty);
        };

        match (verb, args) {
            ("EXIT", []) => Ok(Command::Exit),
            ("LIST", []) => Ok(Command::List),
            ("LOOKUP", [record_type, domain]) => Ok(Command::Lookup {
                record_type: record_type.to_string(),
                domain: domain.to_string(),
            }),
            ("REGISTER", [domain, record_type, value]) => Ok(Command::Register {
                domain: domain.to_string(),
                record_type: record_type.to_string(),
                value: value.to_string(),
            }),
            ("EXIT", _) => Err(arity("EXIT", 0, args)),
            ("LIST", _) => Err(arity("LIST", 0, args)),
            ("LOOKUP", _) => Err(arity("LOOKUP", 2, args)),
            ("REGISTER", _) => Err(arity("REGISTER", 3, args)),
            (other, _) => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn arity(verb: &'static str, expected: usize, args: &[&str]) -> ParseError {
    ParseError::Arity {
        verb,
        expected,
        got: args.len(),
    }
}

/// Outcome of one command, ready to be written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Found(Vec<Record>),
    NotFound,
    Listing(Vec<Record>),
    Added,
    BadRequest,
    ServerError,
}

impl Response {
    pub fn lines(&self) -> Vec<String> {
        match self {
            Response::Found(records) => records
                .iter()
                .map(|record| format!("200 {}", record.value()))
                .collect(),
            Response::NotFound => vec!["404 Not Found".to_string()],
            Response::Listing(records) => {
                let mut lines = Vec::with_capacity(records.len() + 2);
                lines.push(LIST_START.to_string());
                lines.extend(records.iter().map(Record::to_string));
                lines.push(LIST_END.to_string());
                lines
            }
            Response::Added => vec!["200 Record added".to_string()],
            Response::BadRequest => vec!["400 Bad request".to_string()],
            Response::ServerError => vec!["500 Server error".to_string()],
        }
    }
}

/// Reads one line with its terminator stripped. `None` means the peer closed
/// the stream. Invalid UTF-8 is replaced rather than rejected.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Reads the next non-blank request line and decodes it.
///
/// Blank lines are consumed silently. The outer `Option` is `None` once the
/// stream is closed; the inner `Result` carries malformed requests so the
/// caller can answer them.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Option<Result<Command, ParseError>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = read_line(reader).await? else {
            return Ok(None);
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(Command::parse(trimmed)));
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Writes every line of a response in one buffer and flushes.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::new();
    for line in response.lines() {
        encoded.extend_from_slice(line.as_bytes());
        encoded.push(b'\n');
    }
    writer.write_all(&encoded).await?;
    writer.flush().await
}
