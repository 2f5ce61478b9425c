//! Host shell services offered to components
//!
//! The shell injects one [`HostBinding`] when the lifecycle manager is
//! constructed; every component context carries it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Modal dialog a component asks the shell to show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogRequest {
    pub title: String,
    pub message: String,
    /// Button labels, left to right
    pub buttons: Vec<String>,
}

impl DialogRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            buttons: vec!["OK".to_string()],
        }
    }

    pub fn with_buttons<I, S>(mut self, buttons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buttons = buttons.into_iter().map(Into::into).collect();
        self
    }
}

/// How a dialog was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogResult {
    /// Index into [`DialogRequest::buttons`]
    Button(usize),
    Dismissed,
}

/// Facts about the running host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub language: String,
    pub host_version: String,
    /// True when driving a simulated controller
    pub simulation: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            simulation: false,
        }
    }
}

#[async_trait]
pub trait HostBinding: Send + Sync {
    fn show_toast(&self, text: &str);

    async fn show_dialog(&self, request: DialogRequest) -> DialogResult;

    fn environment(&self) -> Environment;
}

/// Headless host: toasts and dialogs go to the log
#[derive(Debug, Clone, Default)]
pub struct LoggingHost {
    environment: Environment,
}

impl LoggingHost {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl HostBinding for LoggingHost {
    fn show_toast(&self, text: &str) {
        info!(target: "module_host::toast", "{}", text);
    }

    async fn show_dialog(&self, request: DialogRequest) -> DialogResult {
        info!(
            target: "module_host::dialog",
            "{}: {} {:?}", request.title, request.message, request.buttons
        );
        DialogResult::Dismissed
    }

    fn environment(&self) -> Environment {
        self.environment.clone()
    }
}
