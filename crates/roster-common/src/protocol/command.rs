//! Command and response model for the line protocol.
//!
//! Requests are single text lines: a verb, uppercased on receive, optionally
//! followed by one free-form parameter. Responses echo the verb behind an
//! `OK`/`ERROR` marker. Verbs outside the known set parse fine and are
//! ignored by the engine without a reply.

/// Supported request verbs.
pub const CONNECT: &str = "CONNECT";
pub const DISCONNECT: &str = "DISCONNECT";
pub const STATUS: &str = "STATUS";
pub const INFO: &str = "INFO";
pub const PING: &str = "PING";
pub const TO: &str = "TO";

/// Delivery marker written to a relay target. Not a request verb.
pub const FROM: &str = "FROM";

const OK: &str = "OK";
const ERROR: &str = "ERROR";

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The verb, uppercased for dispatch.
    pub verb: String,
    /// Everything after the first space, trimmed. Empty when absent.
    pub param: String,
}

impl Request {
    /// Parse a trimmed command line into verb and parameter.
    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((verb, rest)) => Self {
                verb: verb.to_uppercase(),
                param: rest.trim().to_string(),
            },
            None => Self {
                verb: line.to_uppercase(),
                param: String::new(),
            },
        }
    }
}

/// Split a `CONNECT` parameter into identifier and reported address.
///
/// The identifier ends at the first space found past index 1; without such
/// a space the whole parameter is the identifier and the reported address
/// is left empty for the registry to default.
pub fn split_connect_param(param: &str) -> (&str, &str) {
    match param.find(' ') {
        Some(idx) if idx > 1 => (&param[..idx], param[idx + 1..].trim()),
        _ => (param, ""),
    }
}

/// A response line: marker, echoed verb, space-separated arguments.
///
/// Arguments are written verbatim, so an empty argument shows up as a
/// trailing space on the wire. Clients depend on that shape for responses
/// like `OK PING ` to a bare `PING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    ok: bool,
    verb: String,
    args: Vec<String>,
}

impl Response {
    /// Start a success response echoing `verb`.
    pub fn ok(verb: &str) -> Self {
        Self {
            ok: true,
            verb: verb.to_string(),
            args: Vec::new(),
        }
    }

    /// Start an error response echoing `verb`.
    pub fn error(verb: &str) -> Self {
        Self {
            ok: false,
            verb: verb.to_string(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Whether this is an `OK` response.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Encode as a wire line, LF-terminated.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(8 + self.verb.len());
        line.push_str(if self.ok { OK } else { ERROR });
        line.push(' ');
        line.push_str(&self.verb);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\n');
        line
    }
}
