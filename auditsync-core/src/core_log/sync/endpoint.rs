/*
    endpoint.rs - Server side of the log sync protocol

    Commands, all bodies one record per line:
    - query[?tid]              -> descriptors
    - send                     <- events
    - receive?tid&logid[&range]-> events
    - sendids                  <- watermarks
    - receiveids[?tid]         -> watermarks

    The endpoint is transport independent: the axum router and the in-process
    loopback connection both call `dispatch`.
*/

use crate::core_log::codec::{self, CodecError};
use crate::core_log::descriptor::Descriptor;
use crate::core_log::range_set::RangeSet;
use crate::core_log::store::{LogStore, StoreError};
use crate::core_log::sync::connection::HttpResponse;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Protocol commands, used as the last path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Query,
    Send,
    Receive,
    SendIds,
    ReceiveIds,
}

impl Command {
    pub const ALL: [Command; 5] =
        [Command::Query, Command::Send, Command::Receive, Command::SendIds, Command::ReceiveIds];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Query => "query",
            Command::Send => "send",
            Command::Receive => "receive",
            Command::SendIds => "sendids",
            Command::ReceiveIds => "receiveids",
        }
    }

    /// Whether the command carries a request body
    pub fn is_post(&self) -> bool {
        matches!(self, Command::Send | Command::SendIds)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EndpointError::BadRequest(format!("unknown command '{}'", s)))
    }
}

/// Request failures, each mapped to an HTTP status
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Malformed body: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EndpointError {
    pub fn status(&self) -> u16 {
        match self {
            EndpointError::BadRequest(_) | EndpointError::Codec(_) => 400,
            EndpointError::Store(StoreError::Busy { .. }) => 503,
            EndpointError::Store(StoreError::InvalidArgument(_)) => 400,
            EndpointError::Store(_) => 500,
        }
    }
}

type EndpointResult<T> = Result<T, EndpointError>;

/// Serves the sync protocol from a local store
#[derive(Clone)]
pub struct LogEndpoint {
    store: Arc<LogStore>,
}

impl LogEndpoint {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn query(&self, target_id: Option<&str>) -> EndpointResult<String> {
        let descriptors = self.store.get_descriptors(target_id)?;
        Ok(codec::encode_lines(&descriptors, codec::encode_descriptor))
    }

    /// Store posted events; returns how many were new
    pub fn send(&self, body: &str) -> EndpointResult<usize> {
        let events = codec::decode_events(body)?;
        Ok(self.store.put(&events)?)
    }

    pub fn receive(&self, target_id: &str, log_id: u64, range: Option<RangeSet>) -> EndpointResult<String> {
        let events = match range {
            Some(range_set) => self.store.get(&Descriptor::new(target_id, log_id, range_set))?,
            None => self.store.get_all(target_id, log_id)?,
        };
        Ok(codec::encode_events(&events))
    }

    /// Apply posted watermarks; returns how many advanced
    pub fn send_ids(&self, body: &str) -> EndpointResult<usize> {
        let watermarks = codec::decode_lines(body, codec::decode_watermark)?;
        let mut advanced = 0;
        for watermark in &watermarks {
            if self.store.set_lowest_id(&watermark.target_id, watermark.log_id, watermark.lowest_id)? {
                advanced += 1;
            }
        }
        Ok(advanced)
    }

    pub fn receive_ids(&self, target_id: Option<&str>) -> EndpointResult<String> {
        let watermarks = self.store.get_watermarks(target_id)?;
        Ok(codec::encode_lines(&watermarks, codec::encode_watermark))
    }

    /// Run one command and render the outcome as a response
    pub fn dispatch(&self, command: Command, params: &HashMap<String, String>, body: &str) -> HttpResponse {
        let result = match command {
            Command::Query => self.query(optional(params, "tid")),
            Command::Send => self.send(body).map(|n| format!("{}\n", n)),
            Command::Receive => required(params, "tid").and_then(|tid| {
                let log_id = required(params, "logid")?
                    .parse::<u64>()
                    .map_err(|_| EndpointError::BadRequest("logid must be a number".to_string()))?;
                let range = match optional(params, "range") {
                    Some(text) => Some(text.parse::<RangeSet>().map_err(CodecError::from)?),
                    None => None,
                };
                self.receive(tid, log_id, range)
            }),
            Command::SendIds => self.send_ids(body).map(|n| format!("{}\n", n)),
            Command::ReceiveIds => self.receive_ids(optional(params, "tid")),
        };

        match result {
            Ok(body) => {
                debug!(%command, bytes = body.len(), "served sync request");
                HttpResponse::ok(body)
            }
            Err(e) => {
                let status = e.status();
                match status {
                    500 => error!(%command, error = %e, "sync request failed"),
                    503 => debug!(%command, error = %e, "sync request hit a busy log"),
                    _ => warn!(%command, error = %e, "rejected sync request"),
                }
                HttpResponse::new(status, e.to_string())
            }
        }
    }
}

fn optional<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> EndpointResult<&'a str> {
    optional(params, name).ok_or_else(|| EndpointError::BadRequest(format!("missing parameter '{}'", name)))
}
