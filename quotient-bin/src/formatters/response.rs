use serde::Serialize;
use url::Url;

/// What happened to a single request target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RequestOutcome {
    pub(crate) method: String,
    pub(crate) url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl RequestOutcome {
    pub(crate) fn new(
        method: &http::Method,
        url: &Url,
        result: &quotient_lib::Result<quotient_lib::Response>,
    ) -> Self {
        let (status, error) = match result {
            Ok(response) => (Some(response.status().as_u16()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status,
            error,
        }
    }

    /// A response with a 2xx status
    pub(crate) fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

/// Format a request outcome as a single plain text line, e.g.
/// `[200] GET https://api.example.com/`
pub(crate) fn format_outcome(outcome: &RequestOutcome) -> String {
    match (&outcome.status, &outcome.error) {
        (Some(status), _) => format!("[{status}] {} {}", outcome.method, outcome.url),
        (None, Some(error)) => format!("[ERROR] {} {} | {error}", outcome.method, outcome.url),
        (None, None) => format!("[ERROR] {} {}", outcome.method, outcome.url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, StatusCode};
    use quotient_lib::{ErrorKind, Response};

    fn url() -> Url {
        Url::parse("https://api.example.com/repos").unwrap()
    }

    #[test]
    fn test_format_response() {
        let response = Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), vec![], url());
        let outcome = RequestOutcome::new(&Method::GET, &url(), &Ok(response));
        assert!(!outcome.is_success());
        assert_eq!(
            format_outcome(&outcome),
            "[404] GET https://api.example.com/repos"
        );
    }

    #[test]
    fn test_format_error() {
        let result = Err(ErrorKind::Transport("connection reset".into()));
        let outcome = RequestOutcome::new(&Method::POST, &url(), &result);
        assert_eq!(outcome.status, None);
        assert_eq!(
            format_outcome(&outcome),
            "[ERROR] POST https://api.example.com/repos | Transport error: connection reset"
        );
    }

    #[test]
    fn test_success() {
        let response = Response::new(StatusCode::NO_CONTENT, HeaderMap::new(), vec![], url());
        assert!(RequestOutcome::new(&Method::GET, &url(), &Ok(response)).is_success());
    }
}
