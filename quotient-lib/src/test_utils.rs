use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::transport::Transport;
use crate::{ErrorKind, Request, Response, Result};

/// One scripted reaction of a [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
    },
    /// A retryable transport failure
    Fail(&'static str),
    /// Any other error
    Error(fn() -> ErrorKind),
}

impl Scripted {
    pub(crate) const fn status(status: u16) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
        }
    }

    pub(crate) const fn fail(message: &'static str) -> Self {
        Self::Fail(message)
    }

    /// Add a response header
    ///
    /// # Panics
    ///
    /// Panics when called on a failure
    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Respond { headers, .. } => headers.push((name, value.into())),
            Self::Fail(_) | Self::Error(_) => panic!("Failures have no headers"),
        }
        self
    }

    fn into_result(self, request: &Request) -> Result<Response> {
        match self {
            Self::Respond { status, headers } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(
                        HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        HeaderValue::from_str(&value).unwrap(),
                    );
                }
                Ok(Response::new(
                    StatusCode::from_u16(status).unwrap(),
                    map,
                    Vec::new(),
                    request.url.clone(),
                ))
            }
            Self::Fail(message) => Err(ErrorKind::Transport(message.to_string())),
            Self::Error(make) => Err(make()),
        }
    }
}

/// A transport that plays back a script instead of touching the network.
///
/// Once the script runs out, every further send gets `then`.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    then: Scripted,
    sends: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>, then: Scripted) -> Self {
        Self {
            script: Mutex::new(script.into()),
            then,
            sends: AtomicUsize::new(0),
        }
    }

    pub(crate) fn repeating(then: Scripted) -> Self {
        Self::new(Vec::new(), then)
    }

    /// How many times `send` was called
    pub(crate) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.then.clone());
        next.into_result(request)
    }
}
