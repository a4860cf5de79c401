//! `test-utils` is used for testing in both `quotient-lib` and `quotient-bin`.
//! This crate does not depend on `quotient-lib` or `quotient-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Build a response template carrying `X-RateLimit-*` headers.
///
/// `reset` is the window reset as unix seconds.
#[macro_export]
macro_rules! quota_response {
    ($status:expr, $limit:expr, $remaining:expr, $reset:expr $(,)?) => {
        wiremock::ResponseTemplate::new($status)
            .insert_header("x-ratelimit-limit", ($limit).to_string())
            .insert_header("x-ratelimit-remaining", ($remaining).to_string())
            .insert_header("x-ratelimit-reset", ($reset).to_string())
    };
}

/// Gets the "main" binary name (e.g. `quotient`)
#[macro_export]
macro_rules! main_command {
    () => {
        assert_cmd::cargo::cargo_bin_cmd!("quotient")
    };
}
