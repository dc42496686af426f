use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use billflow::workflow::{NotifyError, ReviewNotifier, ReviewRequest, ReviewSummary};

/// Line printed on stdout when a document is suspended for review.
#[derive(Serialize)]
struct ReviewLine<'a> {
    event: &'static str,
    token: &'a str,
    #[serde(flatten)]
    summary: &'a ReviewSummary,
}

/// Writes review requests to stdout as JSON lines. The operator running
/// the CLI is the reviewer, so the full token is printed here and nowhere
/// else.
#[derive(Debug, Default)]
pub struct PrintNotifier;

#[async_trait]
impl ReviewNotifier for PrintNotifier {
    async fn notify(&self, request: ReviewRequest) -> Result<(), NotifyError> {
        let line = ReviewLine {
            event: "review_requested",
            token: request.token.expose_secret(),
            summary: &request.summary,
        };
        let json =
            serde_json::to_string(&line).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        println!("{}", json);
        Ok(())
    }
}
