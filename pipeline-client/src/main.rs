//! Annotate a document read from stdin and print the extracted result.
//!
//! Usage: `pipeline-client [ENGINE] < document.txt`
//!
//! Reads `PIPELINE_URL` and `PIPELINE_RESULT_MARKER` from the environment.

use anyhow::Context;
use pipeline_client::{extract_result, PipelineClient};
use pipeline_core::AnnotateRequest;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pipeline_core::init_tracing_stderr("pipeline_client");

    let engine = std::env::args().nth(1);

    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read document from stdin")?;

    let client = PipelineClient::from_env();
    client.health().await?;

    let output = match engine {
        None => client.parse(&text).await?,
        Some(engine) => {
            let response = client
                .annotate(&AnnotateRequest::new(text).with_engine(engine))
                .await?;
            let payload = response.result.into_text();
            match std::env::var("PIPELINE_RESULT_MARKER") {
                Ok(marker) if !marker.is_empty() => extract_result(&payload, &marker)?.to_string(),
                _ => payload,
            }
        }
    };

    println!("{output}");
    Ok(())
}
