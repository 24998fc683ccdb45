//! Expression evaluation.
//! - evaluate/evaluate_in: `evaluate` against the selected or an explicit frame
//! - completions: REPL completion targets
//! - HoverController: debounced hover with supersession

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HoverSettings;
use crate::error::{DapError, DapResult};
use crate::protocol::{CompletionsArguments, CompletionsResponseBody, EvaluateArguments};
use crate::session::DebugSession;
use crate::types::{CompletionItem, EvaluateResponse, Generation, Variable};

/// `context` argument of an `evaluate` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateContext {
    Watch,
    Hover,
    Repl,
    Clipboard,
}

impl EvaluateContext {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Hover => "hover",
            Self::Repl => "repl",
            Self::Clipboard => "clipboard",
        }
    }
}

impl DebugSession {
    /// Evaluate in the selected frame, or without a frame when nothing is stopped.
    pub async fn evaluate(
        &self,
        expression: &str,
        context: EvaluateContext,
    ) -> DapResult<EvaluateResponse> {
        let frame_id = self.implicit_frame().await?;
        self.evaluate_in(expression, frame_id, context).await
    }

    /// Evaluate in an explicit frame. Adapter failures become
    /// [`DapError::Evaluate`].
    pub async fn evaluate_in(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: EvaluateContext,
    ) -> DapResult<EvaluateResponse> {
        let generation = self.generation_for_frame(frame_id)?;
        let outcome: DapResult<Value> = self
            .client()
            .request(
                "evaluate",
                EvaluateArguments {
                    expression: expression.to_string(),
                    frame_id,
                    context: Some(context.as_str().to_string()),
                },
            )
            .await;
        let body = match outcome {
            Ok(body) => body,
            Err(DapError::Adapter { message, .. }) => {
                return Err(DapError::Evaluate {
                    expression: expression.to_string(),
                    message,
                })
            }
            Err(err) => return Err(err),
        };
        Ok(EvaluateResponse::from_json(&body, generation)?)
    }

    /// REPL completions for `text` with the cursor at `column` (1-based).
    pub async fn completions(&self, text: &str, column: i64) -> DapResult<Vec<CompletionItem>> {
        self.require("completions", |capabilities| {
            capabilities.supports_completions_request
        })?;
        let frame_id = self.implicit_frame().await?;
        let body: CompletionsResponseBody = self
            .client()
            .request(
                "completions",
                CompletionsArguments {
                    text: text.to_string(),
                    column,
                    frame_id,
                },
            )
            .await?;
        let items = body
            .targets
            .iter()
            .map(CompletionItem::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    async fn implicit_frame(&self) -> DapResult<Option<i64>> {
        match self.selected_frame().await {
            Ok(frame) => Ok(Some(frame.id)),
            Err(DapError::NoFrameSelected) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Outcome of a hover that was not superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverResult {
    pub expression: String,
    /// Unnamed root node holding the result.
    pub root: Variable,
    /// Children of an expandable result; empty otherwise.
    pub children: Arc<[Variable]>,
}

/// Debounced hover evaluation. Starting a hover supersedes every earlier
/// one; superseded hovers resolve to `Ok(None)` without presenting anything.
#[derive(Debug)]
pub struct HoverController {
    session: DebugSession,
    debounce: Duration,
    version: AtomicU64,
}

impl HoverController {
    #[must_use]
    pub fn new(session: DebugSession, settings: &HoverSettings) -> Self {
        Self {
            session,
            debounce: settings.debounce,
            version: AtomicU64::new(0),
        }
    }

    /// Supersede any hover in progress (e.g. the pointer moved away).
    pub fn cancel(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, version: u64) -> bool {
        self.version.load(Ordering::SeqCst) == version
    }

    /// Evaluate `expression` in the hover context and present it after the
    /// debounce if no newer hover started meanwhile. Evaluation failures are
    /// logged and yield `Ok(None)`, as does every hover against an adapter
    /// without `supportsEvaluateForHovers`.
    pub async fn hover(&self, expression: &str) -> DapResult<Option<HoverResult>> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        if !self
            .session
            .supports(|capabilities| capabilities.supports_evaluate_for_hovers)
        {
            debug!(expression, "adapter does not evaluate for hovers");
            return Ok(None);
        }

        let response = match self
            .session
            .evaluate(expression, EvaluateContext::Hover)
            .await
        {
            Ok(response) => response,
            Err(err @ DapError::Evaluate { .. }) => {
                warn!(expression, error = %err, "hover evaluation failed");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        tokio::time::sleep(self.debounce).await;
        if !self.is_current(version) {
            debug!(expression, "hover superseded");
            return Ok(None);
        }

        let root = Variable::from_evaluate(&response);
        // Results evaluated while nothing is stopped cannot be expanded.
        let children = match root.children() {
            Some(key) if key.generation != Generation::NONE => match self.session.expand(key).await {
                Ok(children) => children,
                Err(err @ DapError::StaleReference { .. }) => {
                    debug!(expression, error = %err, "hover result went stale");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            },
            _ => Arc::from(Vec::new()),
        };
        if !self.is_current(version) {
            debug!(expression, "hover superseded");
            return Ok(None);
        }
        Ok(Some(HoverResult {
            expression: expression.to_string(),
            root,
            children,
        }))
    }
}
