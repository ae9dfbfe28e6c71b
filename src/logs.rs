//! Tail view over one process's log.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::api::ControlApi;
use crate::config::LogConfig;
use crate::error::{AppError, Result};
use crate::ids::ProcessId;
use crate::task::{Liveness, PeriodicTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
    Default,
}

/// Assigns a display severity to a log line.
pub trait SeverityClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Severity;
}

/// Case-insensitive keyword match, first hit wins:
/// `ERROR`/`FATAL`, `WARN`, `INFO`, `DEBUG`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl SeverityClassifier for KeywordClassifier {
    fn classify(&self, line: &str) -> Severity {
        let line = line.to_uppercase();
        if line.contains("ERROR") || line.contains("FATAL") {
            Severity::Error
        } else if line.contains("WARN") {
            Severity::Warn
        } else if line.contains("INFO") {
            Severity::Info
        } else if line.contains("DEBUG") {
            Severity::Debug
        } else {
            Severity::Default
        }
    }
}

/// A line that passed the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// 1-based position within the filtered lines.
    pub number: usize,
    pub text: String,
    pub severity: Severity,
}

/// Buffer, filter and scroll state of the log view.
#[derive(Clone)]
pub struct LogView {
    lines: Vec<String>,
    loaded: bool,
    filter: String,
    auto_scroll: bool,
    position: usize,
    classifier: Arc<dyn SeverityClassifier>,
}

impl LogView {
    pub fn new(classifier: Arc<dyn SeverityClassifier>) -> Self {
        Self {
            lines: Vec::new(),
            loaded: false,
            filter: String::new(),
            auto_scroll: true,
            position: 0,
            classifier,
        }
    }

    /// Replace the whole buffer with a fresh fetch.
    pub fn replace_lines(&mut self, lines: Vec<String>) {
        self.lines = lines
            .into_iter()
            .map(|mut line| {
                let trimmed = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed);
                line
            })
            .collect();
        self.loaded = true;
        self.follow();
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.follow();
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.auto_scroll = enabled;
        self.follow();
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    /// Index of the bottom visible line within the filtered lines.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn scroll_to(&mut self, position: usize) {
        self.position = position.min(self.end_position());
    }

    pub fn end_position(&self) -> usize {
        self.filtered_count().saturating_sub(1)
    }

    /// True until the first fetch lands.
    pub fn is_loading(&self) -> bool {
        !self.loaded
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn total_count(&self) -> usize {
        self.lines.len()
    }

    pub fn filtered_count(&self) -> usize {
        self.matching().count()
    }

    pub fn filtered(&self) -> Vec<LogLine> {
        self.matching()
            .zip(1..)
            .map(|(text, number)| LogLine {
                number,
                text: text.clone(),
                severity: self.classifier.classify(text),
            })
            .collect()
    }

    fn matching(&self) -> impl Iterator<Item = &String> {
        let needle = self.filter.to_lowercase();
        self.lines
            .iter()
            .filter(move |line| needle.is_empty() || line.to_lowercase().contains(&needle))
    }

    /// Pin to the end while auto-scrolling; otherwise stay put, within bounds.
    fn follow(&mut self) {
        self.position = if self.auto_scroll {
            self.end_position()
        } else {
            self.position.min(self.end_position())
        };
    }
}

impl Default for LogView {
    fn default() -> Self {
        Self::new(Arc::new(KeywordClassifier))
    }
}

async fn fetch_into(
    api: &dyn ControlApi,
    target: &ProcessId,
    lines: u32,
    view: &Mutex<LogView>,
    liveness: &Liveness,
) -> Result<()> {
    let result = api.fetch_logs(target, lines).await;
    if !liveness.is_alive() {
        return Ok(());
    }
    match result {
        Ok(fetched) => {
            view.lock()
                .unwrap_or_else(|e| e.into_inner())
                .replace_lines(fetched);
            Ok(())
        }
        Err(e) => {
            log::warn!("Failed to fetch logs of {}: {}", target, e);
            Err(e)
        }
    }
}

struct TailLoop {
    task: PeriodicTask,
    liveness: Liveness,
}

impl TailLoop {
    fn stop(self) {
        self.liveness.revoke();
        self.task.cancel();
    }
}

/// Polls the last N lines of one process while open.
pub struct LogViewer {
    api: Arc<dyn ControlApi>,
    target: ProcessId,
    config: LogConfig,
    view: Arc<Mutex<LogView>>,
    line_window: Mutex<u32>,
    tail: Mutex<Option<TailLoop>>,
}

impl LogViewer {
    pub fn open(api: Arc<dyn ControlApi>, target: ProcessId, config: LogConfig) -> Self {
        Self::with_classifier(api, target, config, Arc::new(KeywordClassifier))
    }

    pub fn with_classifier(
        api: Arc<dyn ControlApi>,
        target: ProcessId,
        config: LogConfig,
        classifier: Arc<dyn SeverityClassifier>,
    ) -> Self {
        let viewer = Self {
            api,
            target,
            line_window: Mutex::new(config.default_lines),
            config,
            view: Arc::new(Mutex::new(LogView::new(classifier))),
            tail: Mutex::new(None),
        };
        log::info!("Opened log view of {}", viewer.target);
        viewer.restart();
        viewer
    }

    pub fn target(&self) -> &ProcessId {
        &self.target
    }

    pub fn line_window(&self) -> u32 {
        *self.line_window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Change N and restart the tail with an immediate fetch.
    pub fn set_line_window(&self, lines: u32) -> Result<()> {
        if !self.config.allows(lines) {
            return Err(AppError::invalid_line_window(lines));
        }
        *self.line_window.lock().unwrap_or_else(|e| e.into_inner()) = lines;
        self.restart();
        Ok(())
    }

    fn restart(&self) {
        let liveness = Liveness::new();
        let task = {
            let api = Arc::clone(&self.api);
            let target = self.target.clone();
            let view = Arc::clone(&self.view);
            let liveness = liveness.clone();
            let lines = self.line_window();
            PeriodicTask::spawn("log-tail", self.config.interval(), move || {
                let api = Arc::clone(&api);
                let target = target.clone();
                let view = Arc::clone(&view);
                let liveness = liveness.clone();
                async move {
                    let _ = fetch_into(api.as_ref(), &target, lines, &view, &liveness).await;
                }
            })
        };

        let previous = self
            .tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(TailLoop { task, liveness });
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// One fetch outside the timer.
    pub async fn refresh(&self) -> Result<()> {
        let liveness = {
            let tail = self.tail.lock().unwrap_or_else(|e| e.into_inner());
            match tail.as_ref() {
                Some(tail) => tail.liveness.clone(),
                None => return Ok(()),
            }
        };
        fetch_into(
            self.api.as_ref(),
            &self.target,
            self.line_window(),
            &self.view,
            &liveness,
        )
        .await
    }

    pub fn is_open(&self) -> bool {
        self.tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop polling. Fetches still in flight are discarded.
    pub fn close(&self) {
        let previous = self.tail.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            log::info!("Closed log view of {}", self.target);
            previous.stop();
        }
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&LogView) -> R) -> R {
        let view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        f(&*view)
    }

    pub fn with_view_mut<R>(&self, f: impl FnOnce(&mut LogView) -> R) -> R {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *view)
    }
}

impl Drop for LogViewer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::ErrorKind;
    use crate::testing::{Call, FakeApi};

    fn view_with(lines: &[&str]) -> LogView {
        let mut view = LogView::default();
        view.replace_lines(lines.iter().map(|l| (*l).to_string()).collect());
        view
    }

    fn open(fake: &Arc<FakeApi>) -> LogViewer {
        let api: Arc<dyn ControlApi> = Arc::clone(fake) as Arc<dyn ControlApi>;
        LogViewer::open(api, ProcessId::new("proxy"), LogConfig::default())
    }

    fn fetches(fake: &FakeApi, lines: u32) -> usize {
        fake.count(|c| matches!(c, Call::FetchLogs { lines: n, .. } if *n == lines))
    }

    #[test]
    fn filter_is_case_insensitive_and_classified() {
        let mut view = view_with(&["INFO start", "ERROR boom", "plain line"]);
        view.set_filter("error");

        let filtered = view.filtered();
        assert_eq!(
            filtered,
            vec![LogLine {
                number: 1,
                text: "ERROR boom".to_string(),
                severity: Severity::Error,
            }]
        );
        assert_eq!(view.filtered_count(), 1);
        assert_eq!(view.total_count(), 3);
    }

    #[test]
    fn keyword_classifier_checks_in_order() {
        let classifier = KeywordClassifier;
        assert_eq!(classifier.classify("[12:00 FATAL]: crash"), Severity::Error);
        assert_eq!(classifier.classify("warn: error budget low"), Severity::Error);
        assert_eq!(classifier.classify("[WARN] lag"), Severity::Warn);
        assert_eq!(classifier.classify("info: done"), Severity::Info);
        assert_eq!(classifier.classify("Debug output"), Severity::Debug);
        assert_eq!(classifier.classify("Done (3.2s)!"), Severity::Default);
    }

    #[test]
    fn line_terminators_are_stripped() {
        let view = view_with(&["first\r\n", "second\n", "third"]);
        assert_eq!(view.lines(), ["first", "second", "third"]);
    }

    #[test]
    fn auto_scroll_follows_updates() {
        let mut view = view_with(&["a", "b", "c"]);
        assert_eq!(view.position(), 2);

        view.replace_lines(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        assert_eq!(view.position(), 3);

        view.set_filter("a");
        assert_eq!(view.position(), 0);
    }

    #[test]
    fn disabled_auto_scroll_leaves_position_alone() {
        let mut view = view_with(&["a", "b", "c", "d"]);
        view.set_auto_scroll(false);
        view.scroll_to(1);

        view.replace_lines((0..50).map(|n| n.to_string()).collect());
        assert_eq!(view.position(), 1);

        view.set_auto_scroll(true);
        assert_eq!(view.position(), 49);
    }

    #[test]
    fn frozen_position_stays_within_a_shrinking_view() {
        let mut view = view_with(&["alpha", "bravo", "charlie", "delta"]);
        view.set_auto_scroll(false);
        view.scroll_to(3);

        view.set_filter("a");
        assert_eq!(view.position(), 3);
        view.set_filter("alpha");
        assert_eq!(view.filtered_count(), 1);
        assert_eq!(view.position(), 0);
        assert!(view.filtered().get(view.position()).is_some());

        view.replace_lines(vec!["x".to_string(), "y".to_string()]);
        view.set_filter("");
        assert_eq!(view.position(), 0);
        assert!(!view.auto_scroll());
    }

    #[test]
    fn classifier_is_replaceable() {
        struct Everything;
        impl SeverityClassifier for Everything {
            fn classify(&self, _line: &str) -> Severity {
                Severity::Warn
            }
        }

        let mut view = LogView::new(Arc::new(Everything));
        view.replace_lines(vec!["INFO hi".to_string()]);
        assert_eq!(view.filtered()[0].severity, Severity::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn tails_with_default_window() {
        let fake = Arc::new(FakeApi::new());
        fake.set_logs(&["INFO Proxy started\n", "WARN slow tick\n"]);
        let viewer = open(&fake);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetches(&fake, 500), 1);
        assert!(!viewer.with_view(LogView::is_loading));
        assert_eq!(
            viewer.with_view(|v| v.lines().to_vec()),
            vec!["INFO Proxy started".to_string(), "WARN slow tick".to_string()]
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fetches(&fake, 500), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changing_window_restarts_with_immediate_fetch() {
        let fake = Arc::new(FakeApi::new());
        let viewer = open(&fake);
        tokio::time::sleep(Duration::from_millis(500)).await;

        viewer.set_line_window(1000).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetches(&fake, 1000), 1);
        assert_eq!(viewer.line_window(), 1000);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fetches(&fake, 500), 1);
        assert_eq!(fetches(&fake, 1000), 3);

        let err = viewer.set_line_window(42).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLineWindow);
        assert_eq!(viewer.line_window(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_buffer() {
        let fake = Arc::new(FakeApi::new());
        fake.set_logs(&["INFO ready"]);
        let viewer = open(&fake);
        tokio::time::sleep(Duration::from_millis(10)).await;

        fake.fail_logs(true);
        let err = viewer.refresh().await.unwrap_err();
        assert_eq!(err.detail(), Some("Log file not found"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(viewer.with_view(LogView::total_count), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_polling() {
        let fake = Arc::new(FakeApi::new());
        let viewer = open(&fake);
        tokio::time::sleep(Duration::from_millis(10)).await;

        viewer.close();
        assert!(!viewer.is_open());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fetches(&fake, 500), 1);

        viewer.refresh().await.unwrap();
        assert_eq!(fetches(&fake, 500), 1);
    }
}
