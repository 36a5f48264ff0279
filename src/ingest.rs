//! Pipeline orchestration.
//!
//! Sequences the collaborators behind [`MessageSource`], [`MessageStore`]
//! and [`Mailer`]: authenticate → fetch → parse → dedupe → persist → notify.
//!
//! Authentication and fetch failures end the run. Everything after that is
//! isolated per message: an unparseable or unsavable message is logged and
//! skipped, and a failed email never undoes the committed row. Each new
//! message is persisted before it is notified.

use chrono::Utc;

use crate::error::{PipelineError, StoreError};
use crate::models::{ParsedConsumption, PersistedMessage, RawMessage};
use crate::notify::{FormattingOptions, Notifier};
use crate::parse;
use crate::store::{MessageStore, SaveOutcome};
use crate::traits::{Mailer, MessageSource};

/// States the orchestrator moves through, recorded in [`RunReport::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Authenticated,
    Fetched,
    ParsedNew,
    NoNewMessages,
    Persisted,
    Notified,
    Done,
    Failed(&'static str),
}

#[derive(Debug)]
pub enum RunOutcome {
    /// At least one message was persisted.
    NewData,
    /// Nothing new to store.
    NothingNew,
    Failed(PipelineError),
}

impl RunOutcome {
    /// Process exit code: 0 new data, 1 failure, 2 nothing new.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::NewData => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::NothingNew => 2,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub states: Vec<RunState>,
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub persisted: usize,
    pub notified: usize,
    pub notify_failures: usize,
    pub parse_failures: usize,
    pub store_failures: usize,
}

impl RunReport {
    fn new() -> Self {
        Self {
            states: vec![RunState::Start],
            outcome: RunOutcome::NothingNew,
            fetched: 0,
            persisted: 0,
            notified: 0,
            notify_failures: 0,
            parse_failures: 0,
            store_failures: 0,
        }
    }

    fn enter(&mut self, state: RunState) {
        if self.states.last() != Some(&state) {
            self.states.push(state);
        }
    }

    fn fail(mut self, error: PipelineError) -> Self {
        tracing::error!(stage = error.stage(), error = %error, "Pipeline failed");
        self.enter(RunState::Failed(error.stage()));
        self.outcome = RunOutcome::Failed(error);
        self
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

/// Where and how notifications go.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub formatting: FormattingOptions,
}

/// A message that parsed and whose hash the store has not seen.
struct Candidate {
    raw: RawMessage,
    parsed: ParsedConsumption,
}

pub async fn run_pipeline<S, M>(
    source: &mut S,
    store: &dyn MessageStore,
    notifier: &Notifier<M>,
    opts: &PipelineOptions,
) -> RunReport
where
    S: MessageSource,
    M: Mailer,
{
    let mut report = RunReport::new();

    let session = match source.authenticate().await {
        Ok(session) => session,
        Err(e) => return report.fail(e.into()),
    };
    report.enter(RunState::Authenticated);

    let messages = match source.fetch_messages(&session).await {
        Ok(messages) => messages,
        Err(e) => return report.fail(e.into()),
    };
    report.enter(RunState::Fetched);
    report.fetched = messages.len();
    tracing::info!(count = messages.len(), "Found candidate consumption message(s)");

    let mut candidates = Vec::new();
    let mut last_store_error: Option<StoreError> = None;

    for raw in messages {
        let hash = raw.content_hash();
        let parsed = match parse::parse(&raw.body_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                report.parse_failures += 1;
                tracing::warn!(
                    id = %raw.id,
                    hash = hash.short(),
                    error = %e,
                    "Skipping unparseable message"
                );
                continue;
            }
        };

        match store.is_new(hash.as_str()).await {
            Ok(true) => {
                tracing::info!(
                    id = %raw.id,
                    hash = hash.short(),
                    period = %parsed.period_label().unwrap_or_default(),
                    "Parsed new message"
                );
                candidates.push(Candidate { raw, parsed });
            }
            Ok(false) => {
                tracing::info!(
                    id = %raw.id,
                    hash = hash.short(),
                    "Message already processed, skipping"
                );
            }
            Err(e) => {
                report.store_failures += 1;
                tracing::error!(id = %raw.id, hash = hash.short(), error = %e, "Dedupe lookup failed");
                last_store_error = Some(e);
            }
        }
    }

    if candidates.is_empty() {
        return finish_without_new(report, last_store_error);
    }
    report.enter(RunState::ParsedNew);

    for Candidate { raw, parsed } in candidates {
        let hash = raw.content_hash();
        let row = match PersistedMessage::new(&raw, &parsed, Utc::now()) {
            Ok(row) => row,
            Err(e) => {
                report.store_failures += 1;
                tracing::error!(id = %raw.id, hash = hash.short(), error = %e, "Could not encode parsed data");
                last_store_error = Some(e.into());
                continue;
            }
        };

        match store.save(&row).await {
            Ok(SaveOutcome::Inserted) => {
                report.persisted += 1;
                report.enter(RunState::Persisted);
                tracing::info!(id = %raw.id, hash = hash.short(), "Saved message to database");
            }
            Ok(SaveOutcome::AlreadyPresent) => {
                tracing::info!(
                    id = %raw.id,
                    hash = hash.short(),
                    "Message was stored concurrently, not notifying"
                );
                continue;
            }
            Err(e) => {
                report.store_failures += 1;
                tracing::error!(id = %raw.id, hash = hash.short(), error = %e, "Failed to save message");
                last_store_error = Some(e);
                continue;
            }
        }

        match notifier
            .send(&opts.recipients, &opts.cc, &parsed, &opts.formatting)
            .await
        {
            Ok(()) => {
                report.notified += 1;
                report.enter(RunState::Notified);
            }
            Err(e) => {
                report.notify_failures += 1;
                tracing::error!(
                    id = %raw.id,
                    hash = hash.short(),
                    error = %e,
                    "Notification failed; message stays stored"
                );
            }
        }
    }

    if report.persisted == 0 {
        return finish_without_new(report, last_store_error);
    }

    report.enter(RunState::Done);
    report.outcome = RunOutcome::NewData;
    tracing::info!(
        persisted = report.persisted,
        notified = report.notified,
        notify_failures = report.notify_failures,
        "Workflow completed successfully"
    );
    report
}

fn finish_without_new(mut report: RunReport, store_error: Option<StoreError>) -> RunReport {
    if let Some(e) = store_error {
        return report.fail(e.into());
    }
    if report.parse_failures > 0 {
        tracing::warn!(
            parse_failures = report.parse_failures,
            "No new messages; some fetched messages could not be parsed"
        );
    } else {
        tracing::info!("All fetched messages were already processed");
    }
    report.enter(RunState::NoNewMessages);
    report.outcome = RunOutcome::NothingNew;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::NewData.exit_code(), 0);
        assert_eq!(RunOutcome::NothingNew.exit_code(), 2);
        let failed = RunOutcome::Failed(PipelineError::Fetch(crate::error::FetchError::Status(503)));
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_enter_does_not_repeat_states() {
        let mut report = RunReport::new();
        report.enter(RunState::Persisted);
        report.enter(RunState::Persisted);
        report.enter(RunState::Notified);
        assert_eq!(
            report.states,
            vec![RunState::Start, RunState::Persisted, RunState::Notified]
        );
    }
}
