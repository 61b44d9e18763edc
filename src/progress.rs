//! Index progress reporting.
//!
//! The engine reports after every batch of documents and at every yield
//! point of the pairwise loops, so a host sees movement at least once per
//! batch. The CLI reporters write to **stderr** so stdout stays parseable
//! for scripts.

use std::io::Write;

/// Phase of an index run, as reported in JSON progress lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexPhase {
    Scanning,
    Relations,
    RelatedConcepts,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::Scanning => "scanning",
            IndexPhase::Relations => "relations",
            IndexPhase::RelatedConcepts => "related_concepts",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// `current` of `total` documents scanned; `document` is the last one.
    Scanning {
        current: usize,
        total: usize,
        document: String,
    },
    /// `current` of `total` rows of the document-pair loop done.
    Relations { current: usize, total: usize },
    /// `current` of `total` documents folded into co-occurrence counts.
    RelatedConcepts { current: usize, total: usize },
}

impl IndexProgressEvent {
    pub fn phase(&self) -> IndexPhase {
        match self {
            IndexProgressEvent::Scanning { .. } => IndexPhase::Scanning,
            IndexProgressEvent::Relations { .. } => IndexPhase::Relations,
            IndexProgressEvent::RelatedConcepts { .. } => IndexPhase::RelatedConcepts,
        }
    }

    pub fn counts(&self) -> (usize, usize) {
        match self {
            IndexProgressEvent::Scanning { current, total, .. }
            | IndexProgressEvent::Relations { current, total }
            | IndexProgressEvent::RelatedConcepts { current, total } => (*current, *total),
        }
    }
}

/// Receives progress events from the index engine.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: &IndexProgressEvent);
}

/// Adapts a closure over whole events.
pub struct ProgressFn<F>(pub F);

impl<F> IndexProgressReporter for ProgressFn<F>
where
    F: Fn(&IndexProgressEvent) + Send + Sync,
{
    fn report(&self, event: &IndexProgressEvent) {
        (self.0)(event)
    }
}

/// Adapts a `(current, total, document)` callback; only scan events reach it.
pub struct ScanCallback<F>(pub F);

impl<F> IndexProgressReporter for ScanCallback<F>
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, event: &IndexProgressEvent) {
        if let IndexProgressEvent::Scanning {
            current,
            total,
            document,
        } = event
        {
            (self.0)(*current, *total, document)
        }
    }
}

/// Human-friendly progress on stderr: "index  scanning  1,234 / 5,000 documents".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let line = match event {
            IndexProgressEvent::Scanning {
                current,
                total,
                document,
            } => format!(
                "index  scanning  {} / {} documents  {}\n",
                format_number(*current as u64),
                format_number(*total as u64),
                document
            ),
            IndexProgressEvent::Relations { current, total } => format!(
                "index  relations  {} / {} rows\n",
                format_number(*current as u64),
                format_number(*total as u64)
            ),
            IndexProgressEvent::RelatedConcepts { current, total } => format!(
                "index  related concepts  {} / {} documents\n",
                format_number(*current as u64),
                format_number(*total as u64)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let (n, total) = event.counts();
        let mut obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase().as_str(),
            "n": n,
            "total": total
        });
        if let IndexProgressEvent::Scanning { document, .. } = event {
            obj["document"] = serde_json::json!(document);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: &IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn scan_callback_ignores_other_phases() {
        let calls = Mutex::new(Vec::new());
        let reporter = ScanCallback(|current: usize, total: usize, doc: &str| {
            calls.lock().unwrap().push((current, total, doc.to_string()));
        });
        reporter.report(&IndexProgressEvent::Scanning {
            current: 50,
            total: 100,
            document: "a.md".to_string(),
        });
        reporter.report(&IndexProgressEvent::Relations {
            current: 1,
            total: 2,
        });
        drop(reporter);
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls, vec![(50, 100, "a.md".to_string())]);
    }

    #[test]
    fn event_counts_and_phase() {
        let e = IndexProgressEvent::RelatedConcepts {
            current: 3,
            total: 9,
        };
        assert_eq!(e.counts(), (3, 9));
        assert_eq!(e.phase().as_str(), "related_concepts");
    }
}
