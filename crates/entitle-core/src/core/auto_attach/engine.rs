use anyhow::Result;
use entitle_domain::{RetryAutoAttachOptions, RetryAutoAttachState, RetrySchedule};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, info};

use super::clock::Clock;
use super::reasons::AttachError;
use super::state::RetryStateStore;
use crate::core::config::{Config, PathsConfig};
use crate::core::store::{Notice, NoticeStore, TextArtifact};

/// The attach operation being retried.
pub trait AttachAction {
    fn is_attached(&self) -> bool;
    /// Runs a full auto-attach, including taking the lock around its mutations.
    fn full_auto_attach(&self, options: &RetryAutoAttachOptions) -> Result<(), AttachError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Attached before the loop started; nothing was read or written.
    AlreadyAttached,
    /// `attempts` counts the attach calls made by this run.
    Attached { attempts: usize },
    /// A terminal attach error ended the loop.
    Stopped { reason: String },
    /// Every interval was used up.
    TotalFailure { reason: String },
}

pub struct RetryAutoAttach<'a> {
    paths: PathsConfig,
    schedule: RetrySchedule,
    store: RetryStateStore,
    notices: NoticeStore,
    status: TextArtifact,
    total_failure: TextArtifact,
    action: &'a dyn AttachAction,
    clock: &'a dyn Clock,
}

impl<'a> RetryAutoAttach<'a> {
    #[must_use]
    pub fn new(config: &Config, action: &'a dyn AttachAction, clock: &'a dyn Clock) -> Self {
        let paths = config.paths().clone();
        Self {
            schedule: config.retry().schedule.clone(),
            store: RetryStateStore::new(&paths),
            notices: NoticeStore::new(&paths),
            status: TextArtifact::new(paths.auto_attach_status_file()),
            total_failure: TextArtifact::new(paths.auto_attach_total_failure_file()),
            paths,
            action,
            clock,
        }
    }

    /// Runs the retry loop to completion, blocking through every interval.
    pub fn run(&self) -> Result<RetryOutcome> {
        if self.action.is_attached() {
            info!("machine already attached; not retrying auto-attach");
            return Ok(RetryOutcome::AlreadyAttached);
        }

        let state = self.store.load_state()?;
        let options = self.store.load_options()?;
        let offset = state.as_ref().map_or(0, |state| state.interval_index);
        let mut failure_reason = state.and_then(|state| state.failure_reason);
        if offset > 0 {
            info!(interval_index = offset, "resuming auto-attach retries");
        }

        let mut attempts = 0;
        for (index, interval) in self.schedule.intervals().iter().enumerate().skip(offset) {
            self.store.save_state(&RetryAutoAttachState {
                interval_index: index,
                failure_reason: failure_reason.clone(),
            })?;
            let next_attempt = self
                .clock
                .now()
                .saturating_add(time::Duration::try_from(*interval).unwrap_or(time::Duration::MAX));
            self.publish_progress(index, failure_reason.as_deref(), next_attempt)?;

            info!(
                interval_index = index,
                seconds = interval.as_secs(),
                "waiting before next auto-attach attempt"
            );
            self.clock.sleep(*interval);

            if self.action.is_attached() {
                info!("machine attached while waiting; stopping retries");
                self.cleanup()?;
                return Ok(RetryOutcome::Attached { attempts });
            }

            attempts += 1;
            match self.action.full_auto_attach(&options) {
                Ok(()) => {
                    info!(attempts, "auto-attach succeeded");
                    self.cleanup()?;
                    return Ok(RetryOutcome::Attached { attempts });
                }
                Err(err) if err.is_terminal() => {
                    info!(%err, "auto-attach stopped");
                    self.cleanup()?;
                    return Ok(RetryOutcome::Stopped {
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    let reason = err.failure_reason();
                    error!(interval_index = index, %err, %reason, "auto-attach attempt failed");
                    failure_reason = Some(reason);
                }
            }
        }

        self.record_total_failure(offset, failure_reason)
    }

    /// Removes every trace of the retry loop.
    pub fn cleanup(&self) -> Result<()> {
        cleanup(&self.paths)
    }

    fn publish_progress(
        &self,
        index: usize,
        failure_reason: Option<&str>,
        next_attempt: OffsetDateTime,
    ) -> Result<()> {
        let message = format!(
            "Failed to automatically attach {} time(s).\nThe failure was due to: {}.\nThe next attempt is scheduled for {}.",
            index + 1,
            failure_reason.unwrap_or(AttachError::unknown_reason()),
            next_attempt.format(&Rfc3339).unwrap_or_default()
        );
        self.notices.add(Notice::AutoAttachRetryFailure, &message)?;
        self.status.write(&message)
    }

    /// `offset` is the index the run resumed at; the persisted index never
    /// moves below it even if the schedule has since been shortened.
    fn record_total_failure(
        &self,
        offset: usize,
        failure_reason: Option<String>,
    ) -> Result<RetryOutcome> {
        let exhausted = self.schedule.len().max(offset);
        self.store.save_state(&RetryAutoAttachState {
            interval_index: exhausted,
            failure_reason: failure_reason.clone(),
        })?;

        let reason =
            failure_reason.unwrap_or_else(|| AttachError::unknown_reason().to_string());
        let message = format!(
            "Failed to automatically attach {} times.\nThe most recent failure was due to: {reason}.",
            exhausted + 1
        );
        self.notices.remove(Notice::AutoAttachRetryFailure)?;
        self.status.remove()?;
        self.notices
            .add(Notice::AutoAttachRetryTotalFailure, &message)?;
        self.total_failure.write(&message)?;
        error!(attempts = exhausted + 1, %reason, "auto-attach retries exhausted");
        Ok(RetryOutcome::TotalFailure { reason })
    }
}

/// Deletes retry state and options and every artifact the loop publishes.
/// Safe to call when nothing is there.
pub fn cleanup(paths: &PathsConfig) -> Result<()> {
    RetryStateStore::new(paths).clear()?;
    let notices = NoticeStore::new(paths);
    notices.remove(Notice::AutoAttachRetryFailure)?;
    notices.remove(Notice::AutoAttachRetryTotalFailure)?;
    TextArtifact::new(paths.auto_attach_status_file()).remove()?;
    TextArtifact::new(paths.auto_attach_total_failure_file()).remove()?;
    TextArtifact::new(paths.auto_attach_failed_flag()).remove()?;
    debug!("auto-attach retry state cleared");
    Ok(())
}

/// Hands a failed boot-time attach over to the retry loop.
///
/// Options are recorded only the first time; an existing state record is left
/// alone so a restart never rewinds progress.
pub fn schedule_retry(
    paths: &PathsConfig,
    options: &RetryAutoAttachOptions,
    failure_reason: Option<String>,
) -> Result<()> {
    let store = RetryStateStore::new(paths);
    if !store.save_options_once(options)? {
        debug!("keeping previously recorded auto-attach options");
    }
    if store.load_state()?.is_none() {
        store.save_state(&RetryAutoAttachState {
            interval_index: 0,
            failure_reason,
        })?;
    }
    TextArtifact::new(paths.auto_attach_failed_flag()).write("")?;
    info!("auto-attach retry scheduled");
    Ok(())
}
