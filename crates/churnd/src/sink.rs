//! Outgoing result stream.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Event,
    Mark,
    Error,
    Round,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Event => "event",
            ResultKind::Mark => "mark",
            ResultKind::Error => "error",
            ResultKind::Round => "round",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    pub at: DateTime<Utc>,
    pub kind: ResultKind,
    pub message: String,
}

impl std::fmt::Display for ResultLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.kind.as_str().to_uppercase(),
            self.message
        )
    }
}

/// Multi-producer handle onto the result stream. Lines sent after the
/// receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: mpsc::UnboundedSender<ResultLine>,
}

impl ResultSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResultLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, kind: ResultKind, message: impl Into<String>) {
        let _ = self.tx.send(ResultLine {
            at: Utc::now(),
            kind,
            message: message.into(),
        });
    }

    pub fn event(&self, message: impl Into<String>) {
        self.emit(ResultKind::Event, message);
    }

    pub fn mark(&self, message: impl Into<String>) {
        self.emit(ResultKind::Mark, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ResultKind::Error, message);
    }

    pub fn round(&self, message: impl Into<String>) {
        self.emit(ResultKind::Round, message);
    }
}

#[cfg(test)]
mod tests {
    use super::{ResultKind, ResultLine, ResultSink};
    use chrono::{TimeZone, Utc};

    #[test]
    fn display_prefixes_timestamp_and_kind() {
        let line = ResultLine {
            at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap(),
            kind: ResultKind::Mark,
            message: "{\"type\":\"event\"}".to_string(),
        };
        assert_eq!(
            line.to_string(),
            "2024-05-01T12:00:03.000Z [MARK] {\"type\":\"event\"}"
        );
    }

    #[test]
    fn serializes_kind_in_snake_case() {
        let line = ResultLine {
            at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap(),
            kind: ResultKind::Round,
            message: "reset".to_string(),
        };
        let value = serde_json::to_value(&line).unwrap();
        assert_eq!(value["kind"], "round");
        assert_eq!(value["message"], "reset");
    }

    #[test]
    fn lines_arrive_in_send_order_and_closed_receiver_is_ignored() {
        let (sink, mut rx) = ResultSink::channel();
        sink.event("one");
        sink.error("two");
        assert_eq!(rx.try_recv().unwrap().kind, ResultKind::Event);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, ResultKind::Error);
        assert_eq!(second.message, "two");

        drop(rx);
        sink.round("nobody listening");
    }
}
