use std::collections::BTreeMap;

use clap::Subcommand;
use serde::Serialize;

use billflow::{ResumeError, ReviewerAction, WorkflowOutcome};

use super::emit;
use crate::AppContext;

#[derive(Debug, Subcommand)]
pub enum ActionArg {
    /// Accept the extracted fields as they are
    Approve,

    /// Correct fields and send the invoice back through validation
    Modify {
        /// Note for the record
        #[arg(long)]
        feedback: Option<String>,

        /// Field correction, as `name=value`. Repeatable.
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_correction)]
        corrections: Vec<(String, String)>,
    },

    /// Refuse the invoice
    Reject {
        #[arg(long)]
        reason: String,
    },
}

impl From<ActionArg> for ReviewerAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Approve => ReviewerAction::Approve,
            ActionArg::Modify {
                feedback,
                corrections,
            } => ReviewerAction::Modify {
                feedback,
                corrections: corrections.into_iter().collect::<BTreeMap<_, _>>(),
            },
            ActionArg::Reject { reason } => ReviewerAction::Reject { reason },
        }
    }
}

fn parse_correction(raw: &str) -> Result<(String, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{}'", raw))?;
    let field = field.trim();
    if field.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    Ok((field.to_string(), value.trim().to_string()))
}

#[derive(Serialize)]
struct ResumeLine {
    event: &'static str,
    #[serde(flatten)]
    outcome: WorkflowOutcome,
    message: String,
}

#[derive(Serialize)]
struct ResumeErrorLine<'a> {
    event: &'static str,
    code: &'a str,
    message: &'a str,
}

/// Exit codes: 0 resumed, 1 resumed but the workflow failed, 2 the token
/// was refused.
pub async fn run(context: &AppContext, token: &str, action: ActionArg) -> i32 {
    let action = ReviewerAction::from(action);

    match context.pipeline.resume(token, action).await {
        Ok(outcome) => {
            let failed = matches!(outcome, WorkflowOutcome::Failed { .. });
            emit(&ResumeLine {
                event: "resumed",
                message: outcome.user_message(),
                outcome,
            });
            if failed {
                1
            } else {
                0
            }
        }
        Err(e) => {
            report_refusal(&e);
            2
        }
    }
}

fn report_refusal(error: &ResumeError) {
    tracing::warn!(code = error.code(), error = %error, "Resume refused");
    emit(&ResumeErrorLine {
        event: "resume_refused",
        code: error.code(),
        message: error.user_message(),
    });
}
