pub(crate) mod send;

pub(crate) use send::send;

use http::Method;
use quotient_lib::Client;
use url::Url;

/// Everything a batch of requests needs to run
pub(crate) struct CommandParams {
    pub(crate) client: Client,
    pub(crate) method: Method,
    pub(crate) targets: Vec<Url>,
    pub(crate) max_concurrency: usize,
    /// Print every outcome as soon as it completes
    pub(crate) stream_responses: bool,
}
