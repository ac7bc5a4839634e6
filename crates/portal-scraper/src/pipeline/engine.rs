use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, info_span, warn, Instrument};

use crate::category::{Category, RecordSet};
use crate::config::PortalConfig;
use crate::error::{ErrorDetail, ErrorKind};
use crate::job::{CategoryResult, JobParameters};
use crate::portal::{
    default_extractors, CategoryExtractor, HttpPortal, PortalConnector, PortalError, PortalSession,
};
use crate::sanitize;

use super::cancel::CancelFlag;
use super::context::PipelineContext;
use super::progress::{ProgressEvent, ProgressReporter};

/// Named states of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Authenticating,
    /// Index into the selected categories.
    Extracting(usize),
    Finalizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// At least one category produced records.
    Extracted,
    /// Every requested category failed.
    AllFailed(ErrorDetail),
    /// Login failed; no category was attempted.
    Aborted(ErrorDetail),
    /// Stopped at a category boundary after cancellation.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub outcome: PipelineOutcome,
    pub final_state: EngineState,
    pub records: BTreeMap<Category, RecordSet>,
    pub category_results: BTreeMap<Category, CategoryResult>,
}

#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub login: Duration,
    pub category: Duration,
}

impl StepTimeouts {
    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            login: config.login_timeout(),
            category: config.category_timeout(),
        }
    }
}

/// Logs in and runs the requested extractors one after another.
pub struct ScraperEngine {
    connector: Arc<dyn PortalConnector>,
    extractors: BTreeMap<Category, Arc<dyn CategoryExtractor>>,
    timeouts: StepTimeouts,
}

impl ScraperEngine {
    pub fn new(
        connector: Arc<dyn PortalConnector>,
        extractors: Vec<Arc<dyn CategoryExtractor>>,
        timeouts: StepTimeouts,
    ) -> Self {
        let extractors = extractors
            .into_iter()
            .map(|extractor| (extractor.category(), extractor))
            .collect();
        Self {
            connector,
            extractors,
            timeouts,
        }
    }

    /// Production constructor: HTTP portal plus the built-in extractors.
    pub fn from_config(config: &PortalConfig) -> Result<Self, PortalError> {
        let connector = Arc::new(HttpPortal::new(config)?);
        Ok(Self::new(
            connector,
            default_extractors(config),
            StepTimeouts::from_config(config),
        ))
    }

    pub async fn run(
        &self,
        job_id: &str,
        params: &JobParameters,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult {
        let span = info_span!("pipeline",
            job_id = %job_id,
            user = %sanitize::redact_username(&params.username),
            categories = params.selected_categories().len(),
        );
        self.run_steps(params, cancel, progress).instrument(span).await
    }

    async fn run_steps(
        &self,
        params: &JobParameters,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult {
        let mut ctx = PipelineContext::new(params.selected_categories());

        progress.report(ProgressEvent::Phase {
            message: "Logging in to portal".to_string(),
        });
        let login = timeout(
            self.timeouts.login,
            self.connector
                .authenticate(&params.username, &params.password),
        )
        .instrument(info_span!("authenticate"))
        .await;

        let mut session = match login {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("Login failed: {}", e);
                return ctx.abort(e.detail());
            }
            Err(_) => {
                warn!("Login timed out after {:?}", self.timeouts.login);
                return ctx.abort(ErrorDetail::new(
                    ErrorKind::Timeout,
                    format!(
                        "Login timed out after {} seconds",
                        self.timeouts.login.as_secs()
                    ),
                ));
            }
        };
        progress.report(ProgressEvent::Authenticated {
            progress: ctx.progress(),
        });

        for (index, category) in ctx.selected.clone().into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancellation requested before {}", category);
                self.close_session(session.as_mut()).await;
                return ctx.cancel();
            }

            ctx.transition(EngineState::Extracting(index));
            progress.report(ProgressEvent::CategoryStarted { category });

            let outcome = match self.extractors.get(&category) {
                Some(extractor) => {
                    let attempt = timeout(
                        self.timeouts.category,
                        extractor.extract(session.as_mut(), &params.academic_year),
                    )
                    .instrument(info_span!("extract", category = %category))
                    .await;
                    match attempt {
                        Ok(Ok(records)) => Ok(records),
                        Ok(Err(e)) => Err(e.detail()),
                        Err(_) => Err(ErrorDetail::new(
                            ErrorKind::Timeout,
                            format!(
                                "{} timed out after {} seconds",
                                category,
                                self.timeouts.category.as_secs()
                            ),
                        )),
                    }
                }
                None => Err(ErrorDetail::new(
                    ErrorKind::Internal,
                    format!("no extractor registered for {}", category),
                )),
            };

            let result = match outcome {
                Ok(records) => {
                    info!(category = %category, records = records.len(), "Category extracted");
                    ctx.record_success(category, records)
                }
                Err(error) => {
                    warn!(category = %category, "Category failed: {}", error);
                    ctx.record_failure(category, error)
                }
            };

            progress.report(ProgressEvent::CategoryFinished {
                category,
                result,
                progress: ctx.reportable_progress(),
            });
        }

        ctx.transition(EngineState::Finalizing);
        self.close_session(session.as_mut()).await;
        ctx.finish()
    }

    /// Logs out, bounded by the login timeout.
    async fn close_session(&self, session: &mut dyn PortalSession) {
        if timeout(self.timeouts.login, session.close()).await.is_err() {
            warn!("Portal logout timed out");
        }
    }
}
