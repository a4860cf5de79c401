use std::io::{self, Write};

use anyhow::Result;
use futures::StreamExt;
use log::info;
use quotient_lib::RequestOptions;

use super::CommandParams;
use crate::formatters::response::{RequestOutcome, format_outcome};

/// Send one request per target through the shared client.
///
/// At most `max_concurrency` requests are in flight at once; the client
/// spaces them out further according to the quota. Outcomes come back in
/// completion order.
pub(crate) async fn send(params: CommandParams) -> Result<Vec<RequestOutcome>> {
    let CommandParams {
        client,
        method,
        targets,
        max_concurrency,
        stream_responses,
    } = params;

    info!(
        "Sending {} requests with up to {max_concurrency} in flight",
        targets.len()
    );

    let client = &client;
    let method = &method;
    let mut outcomes = futures::stream::iter(targets)
        .map(|url| async move {
            let result = client
                .execute(method.clone(), url.clone(), RequestOptions::default())
                .await;
            RequestOutcome::new(method, &url, &result)
        })
        .buffer_unordered(max_concurrency.max(1));

    let mut responses = Vec::new();
    while let Some(outcome) = outcomes.next().await {
        if stream_responses {
            writeln!(io::stdout(), "{}", format_outcome(&outcome))?;
        }
        responses.push(outcome);
    }
    Ok(responses)
}
