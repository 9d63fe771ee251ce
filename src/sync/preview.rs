//! Debounced live preview
//!
//! [`PreviewSubscription`] is the pure state machine for one preview
//! surface; [`PreviewSynchronizer`] drives it on a task with real timers
//! and a renderer.
//!
//! ```text
//! Idle --change--> Pending --quiet interval--> Rendering --done--> Idle
//!                  ^     |  (change resets)      |   ^
//!                  |     |                       |   | change sets dirty
//!                  +-----+----- done, dirty -----+---+
//! ```
//!
//! The first render of a surface, and the first after it becomes visible,
//! skips the quiet interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, OptionFuture};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tower_lsp::lsp_types::Url;
use tracing::{debug, warn};

use crate::config;
use crate::error::BridgeError;
use crate::gateway::CommandExecutor;

pub const PREVIEW_COMMAND: &str = "preview-html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    Pending { deadline: Instant },
    /// `dirty` records a change that arrived mid-render.
    Rendering { dirty: bool },
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewAction {
    Render(Url),
    Wait(Instant),
    Nothing,
}

#[derive(Debug, Clone)]
pub struct PreviewSubscription {
    target: Option<Url>,
    state: PreviewState,
    has_rendered_once: bool,
    /// A retarget or re-show arrived mid-render; render right after it.
    render_next_immediately: bool,
    visible: bool,
    quiet: Duration,
}

impl PreviewSubscription {
    pub fn new(quiet: Duration) -> Self {
        Self {
            target: None,
            state: PreviewState::Idle,
            has_rendered_once: false,
            render_next_immediately: false,
            visible: true,
            quiet,
        }
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    pub fn state(&self) -> PreviewState {
        self.state
    }

    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            PreviewState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// The target document changed.
    pub fn changed(&mut self, uri: &Url, now: Instant) -> PreviewAction {
        if !self.visible || self.target.as_ref() != Some(uri) {
            return PreviewAction::Nothing;
        }

        match self.state {
            PreviewState::Rendering { .. } => {
                self.state = PreviewState::Rendering { dirty: true };
                PreviewAction::Nothing
            }
            PreviewState::Idle if !self.has_rendered_once => self.render_now(),
            PreviewState::Idle | PreviewState::Pending { .. } => self.schedule(now),
        }
    }

    /// A surface was opened for `uri`.
    pub fn opened(&mut self, uri: Url) -> PreviewAction {
        self.retarget(uri)
    }

    /// The surface now follows `uri`; it renders as if new.
    pub fn retarget(&mut self, uri: Url) -> PreviewAction {
        if self.target.as_ref() == Some(&uri) && self.has_rendered_once {
            return PreviewAction::Nothing;
        }

        self.target = Some(uri);
        self.has_rendered_once = false;
        self.refresh_now()
    }

    pub fn visibility(&mut self, visible: bool) -> PreviewAction {
        let was_visible = std::mem::replace(&mut self.visible, visible);

        if !visible {
            if let PreviewState::Pending { .. } = self.state {
                self.state = PreviewState::Idle;
            }
            return PreviewAction::Nothing;
        }
        if was_visible {
            return PreviewAction::Nothing;
        }

        self.has_rendered_once = false;
        self.refresh_now()
    }

    /// The timer returned by an earlier [`PreviewAction::Wait`] fired.
    pub fn deadline_elapsed(&mut self, now: Instant) -> PreviewAction {
        match self.state {
            PreviewState::Pending { deadline } if now >= deadline => self.render_now(),
            PreviewState::Pending { deadline } => PreviewAction::Wait(deadline),
            _ => PreviewAction::Nothing,
        }
    }

    pub fn render_finished(&mut self, now: Instant) -> PreviewAction {
        let PreviewState::Rendering { dirty } = self.state else {
            return PreviewAction::Nothing;
        };

        if std::mem::take(&mut self.render_next_immediately) && self.visible {
            return self.render_now();
        }

        self.has_rendered_once = true;
        if dirty && self.visible {
            self.schedule(now)
        } else {
            self.state = PreviewState::Idle;
            PreviewAction::Nothing
        }
    }

    fn refresh_now(&mut self) -> PreviewAction {
        match self.state {
            PreviewState::Rendering { .. } => {
                self.state = PreviewState::Rendering { dirty: true };
                self.render_next_immediately = true;
                PreviewAction::Nothing
            }
            _ if self.visible => self.render_now(),
            _ => PreviewAction::Nothing,
        }
    }

    fn render_now(&mut self) -> PreviewAction {
        let Some(target) = self.target.clone() else {
            self.state = PreviewState::Idle;
            return PreviewAction::Nothing;
        };
        self.state = PreviewState::Rendering { dirty: false };
        PreviewAction::Render(target)
    }

    fn schedule(&mut self, now: Instant) -> PreviewAction {
        let deadline = now + self.quiet;
        self.state = PreviewState::Pending { deadline };
        PreviewAction::Wait(deadline)
    }
}

impl Default for PreviewSubscription {
    fn default() -> Self {
        Self::new(config::preview_quiet_interval())
    }
}

#[async_trait]
pub trait PreviewRenderer: Send + Sync {
    async fn render(&self, target: &Url) -> Result<String, BridgeError>;
}

/// Renders through the `preview-html` command.
pub struct CommandRenderer {
    executor: Arc<dyn CommandExecutor>,
}

impl CommandRenderer {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl PreviewRenderer for CommandRenderer {
    async fn render(&self, target: &Url) -> Result<String, BridgeError> {
        let html = self
            .executor
            .execute_command(PREVIEW_COMMAND, json!({"url": target}))
            .await?;

        match html {
            serde_json::Value::String(html) => Ok(html),
            other => Err(BridgeError::Command(format!(
                "{} returned {} instead of markup",
                PREVIEW_COMMAND, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEvent {
    Changed(Url),
    Opened(Url),
    Visibility(bool),
    Retarget(Url),
}

/// Latest rendered output of a preview surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewFrame {
    pub target: Option<Url>,
    pub html: Option<String>,
    /// Completed renders so far, failed ones included
    pub renders: u64,
    pub error: Option<String>,
}

pub struct PreviewSynchronizer {
    events: mpsc::UnboundedSender<PreviewEvent>,
    frames: watch::Receiver<PreviewFrame>,
    task: JoinHandle<()>,
}

impl PreviewSynchronizer {
    pub fn spawn(renderer: Arc<dyn PreviewRenderer>, quiet: Duration) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames) = watch::channel(PreviewFrame::default());

        let task = tokio::spawn(run(
            renderer,
            PreviewSubscription::new(quiet),
            events_rx,
            frames_tx,
        ));

        Self {
            events,
            frames,
            task,
        }
    }

    pub fn changed(&self, uri: Url) {
        self.send(PreviewEvent::Changed(uri));
    }

    pub fn opened(&self, uri: Url) {
        self.send(PreviewEvent::Opened(uri));
    }

    pub fn visibility(&self, visible: bool) {
        self.send(PreviewEvent::Visibility(visible));
    }

    pub fn retarget(&self, uri: Url) {
        self.send(PreviewEvent::Retarget(uri));
    }

    pub fn frames(&self) -> watch::Receiver<PreviewFrame> {
        self.frames.clone()
    }

    pub fn frame(&self) -> PreviewFrame {
        self.frames.borrow().clone()
    }

    fn send(&self, event: PreviewEvent) {
        if self.events.send(event).is_err() {
            warn!("Preview task is gone, dropping event");
        }
    }
}

impl Drop for PreviewSynchronizer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Render = BoxFuture<'static, (Url, Result<String, BridgeError>)>;

fn start(renderer: &Arc<dyn PreviewRenderer>, target: Url) -> OptionFuture<Render> {
    debug!("Rendering preview of {}", target);
    let renderer = renderer.clone();
    Some(async move {
        let result = renderer.render(&target).await;
        (target, result)
    }
    .boxed())
    .into()
}

async fn run(
    renderer: Arc<dyn PreviewRenderer>,
    mut subscription: PreviewSubscription,
    mut events: mpsc::UnboundedReceiver<PreviewEvent>,
    frames: watch::Sender<PreviewFrame>,
) {
    let mut rendering: OptionFuture<Render> = None.into();

    loop {
        let deadline = subscription.deadline();

        let action = tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let now = Instant::now();
                match event {
                    PreviewEvent::Changed(uri) => subscription.changed(&uri, now),
                    PreviewEvent::Opened(uri) => subscription.opened(uri),
                    PreviewEvent::Visibility(visible) => subscription.visibility(visible),
                    PreviewEvent::Retarget(uri) => subscription.retarget(uri),
                }
            }
            Some((target, result)) = &mut rendering => {
                rendering = None.into();
                frames.send_modify(|frame| {
                    frame.renders += 1;
                    frame.target = Some(target);
                    match result {
                        Ok(html) => {
                            frame.html = Some(html);
                            frame.error = None;
                        }
                        Err(e) => {
                            warn!("Preview render failed: {}", e);
                            frame.error = Some(e.to_string());
                        }
                    }
                });
                subscription.render_finished(Instant::now())
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                subscription.deadline_elapsed(Instant::now())
            }
        };

        if let PreviewAction::Render(target) = action {
            rendering = start(&renderer, target);
        }
    }
}
