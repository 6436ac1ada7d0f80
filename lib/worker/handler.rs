use std::io::Write;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::queue::IncomingRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Processes one dequeued request. An `Err` makes the worker retry or drop the request.
pub trait RequestHandler: Send + Sync {
    fn handle<'a>(&'a self, request: &'a IncomingRequest) -> BoxFuture<'a, Result<(), HandlerError>>;
}

impl<T> RequestHandler for Arc<T>
where
    T: RequestHandler + ?Sized,
{
    fn handle<'a>(&'a self, request: &'a IncomingRequest) -> BoxFuture<'a, Result<(), HandlerError>> {
        (**self).handle(request)
    }
}

/// Writes every request as one JSON line to the wrapped writer.
pub struct JsonLinesHandler<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, request: &IncomingRequest) -> Result<(), HandlerError> {
        let line = serde_json::to_string(request)
            .map_err(|err| HandlerError(format!("failed to encode request: {err}")))?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| HandlerError::new("output writer poisoned"))?;
        writeln!(out, "{line}").map_err(|err| HandlerError(format!("failed to write request: {err}")))?;
        out.flush()
            .map_err(|err| HandlerError(format!("failed to flush output: {err}")))
    }
}

impl<W: Write + Send> RequestHandler for JsonLinesHandler<W> {
    fn handle<'a>(&'a self, request: &'a IncomingRequest) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move { self.write_line(request) })
    }
}
