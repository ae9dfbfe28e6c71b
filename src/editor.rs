//! Editing of supervisor config documents.
//!
//! An editor loads one document, keeps a working buffer next to the last
//! saved text and writes back either the whole document or a single field.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::api::{ConfigPayload, ControlApi, DocumentKind};
use crate::config::QuickEdit;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorPhase {
    Loading,
    Ready,
    Saving,
    Failed,
}

/// Text shown in the editor for a fetched payload.
///
/// Plain-text documents always use `content`. For every other type a `raw`
/// rendition wins when present; JSON without one is pretty-printed.
pub fn editable_text(payload: &ConfigPayload) -> String {
    match (payload.kind, payload.raw.as_ref()) {
        (DocumentKind::Text, _) => value_as_text(&payload.content),
        (_, Some(raw)) => raw.clone(),
        (DocumentKind::Json, None) => serde_json::to_string_pretty(&payload.content)
            .unwrap_or_else(|_| payload.content.to_string()),
        (_, None) => value_as_text(&payload.content),
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Body `content` for a whole-document save of `buffer`.
///
/// JSON documents are sent as structured values and must parse; everything
/// else goes out as raw text.
pub fn encode_for_save(kind: DocumentKind, buffer: &str, document: &str) -> Result<Value> {
    match kind {
        DocumentKind::Json => serde_json::from_str(buffer)
            .map_err(|e| AppError::invalid_format(document, e.to_string())),
        _ => Ok(Value::String(buffer.to_string())),
    }
}

/// Dot-separated path with no empty segments.
pub fn validate_field_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(AppError::invalid_field_path(path));
    }
    Ok(())
}

#[derive(Debug)]
struct EditorState {
    phase: EditorPhase,
    kind: Option<DocumentKind>,
    saved: String,
    buffer: String,
    last_error: Option<AppError>,
}

pub struct ConfigEditor {
    api: Arc<dyn ControlApi>,
    name: String,
    state: Mutex<EditorState>,
}

impl ConfigEditor {
    /// An editor for `name` that has not been loaded yet.
    pub fn new(api: Arc<dyn ControlApi>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
            state: Mutex::new(EditorState {
                phase: EditorPhase::Loading,
                kind: None,
                saved: String::new(),
                buffer: String::new(),
                last_error: None,
            }),
        }
    }

    /// Create and load in one step.
    pub async fn open(api: Arc<dyn ControlApi>, name: impl Into<String>) -> Result<Self> {
        let editor = Self::new(api, name);
        editor.load().await?;
        Ok(editor)
    }

    /// Fetch the document and reset both buffers to its text.
    pub async fn load(&self) -> Result<()> {
        self.lock().phase = EditorPhase::Loading;
        match self.api.fetch_config(&self.name).await {
            Ok(payload) => {
                self.apply_payload(&payload);
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}", self.name, e);
                {
                    let mut state = self.lock();
                    state.phase = EditorPhase::Failed;
                    state.last_error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    fn apply_payload(&self, payload: &ConfigPayload) {
        let text = editable_text(payload);
        let mut state = self.lock();
        state.kind = Some(payload.kind);
        state.saved.clone_from(&text);
        state.buffer = text;
        state.phase = EditorPhase::Ready;
        state.last_error = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> EditorPhase {
        self.lock().phase
    }

    pub fn kind(&self) -> Option<DocumentKind> {
        self.lock().kind
    }

    pub fn buffer(&self) -> String {
        self.lock().buffer.clone()
    }

    pub fn saved(&self) -> String {
        self.lock().saved.clone()
    }

    pub fn set_buffer(&self, text: impl Into<String>) {
        self.lock().buffer = text.into();
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.lock();
        state.buffer != state.saved
    }

    pub fn can_save(&self) -> bool {
        let state = self.lock();
        state.phase == EditorPhase::Ready && state.buffer != state.saved
    }

    /// Error of the last failed load or save.
    pub fn last_error(&self) -> Option<AppError> {
        self.lock().last_error.clone()
    }

    pub fn discard_changes(&self) {
        let mut state = self.lock();
        state.buffer = state.saved.clone();
    }

    fn begin_save(&self) -> Result<()> {
        let mut state = self.lock();
        if state.phase != EditorPhase::Ready {
            return Err(AppError::save_in_flight());
        }
        state.phase = EditorPhase::Saving;
        drop(state);
        Ok(())
    }

    fn end_save(&self, outcome: &Result<()>) {
        let mut state = self.lock();
        state.phase = EditorPhase::Ready;
        state.last_error = outcome.as_ref().err().cloned();
    }

    /// Write the whole working buffer back.
    pub async fn save(&self) -> Result<()> {
        let (content, sent) = {
            let mut state = self.lock();
            if state.phase != EditorPhase::Ready {
                return Err(AppError::save_in_flight());
            }
            if state.buffer == state.saved {
                return Err(AppError::nothing_to_save());
            }
            let kind = state.kind.ok_or_else(AppError::save_in_flight)?;
            let content = encode_for_save(kind, &state.buffer, &self.name)?;
            state.phase = EditorPhase::Saving;
            (content, state.buffer.clone())
        };

        log::info!("Saving {}", self.name);
        let outcome = self.api.save_config(&self.name, content).await;
        self.end_save(&outcome);
        match &outcome {
            Ok(()) => self.lock().saved = sent,
            Err(e) => log::warn!("Failed to save {}: {}", self.name, e),
        }
        outcome
    }

    /// Write a single field, then reload the document from the server.
    pub async fn save_field(&self, field_path: &str, value: Value) -> Result<()> {
        validate_field_path(field_path)?;
        self.begin_save()?;

        log::info!("Saving {} field {}", self.name, field_path);
        let outcome = self
            .api
            .save_config_field(&self.name, field_path, value)
            .await;
        self.end_save(&outcome);
        if let Err(e) = &outcome {
            log::warn!("Failed to save {} field {}: {}", self.name, field_path, e);
            return outcome;
        }
        self.load().await
    }

    /// Set a configured single field, e.g. a forwarding secret.
    pub async fn apply_quick_edit(&self, edit: &QuickEdit, value: &str) -> Result<()> {
        if edit.document != self.name {
            return Err(AppError::other(format!(
                "{} is not a field of {}",
                edit.field_path, self.name
            )));
        }
        let value = value.trim();
        if value.is_empty() {
            return Err(AppError::empty_value(&edit.field_path));
        }
        self.save_field(&edit.field_path, Value::String(value.to_string()))
            .await
    }
}
