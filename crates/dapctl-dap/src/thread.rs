//! Debuggee threads as tracked by a session.
use crate::protocol::{StackFrame, StoppedEventBody};

/// One adapter thread. Entries are never removed for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: i64,
    pub name: String,
    pub stopped: bool,
    /// Human readable reason, empty while running.
    pub stopped_reason: String,
    pub stopped_event: Option<StoppedEventBody>,
    frames: Option<Vec<StackFrame>>,
    /// Bumped on every stop so stale frame fetches can be discarded.
    generation: u64,
}

impl Thread {
    pub(crate) fn new(id: i64, name: impl Into<String>, stopped: bool) -> Self {
        Self {
            id,
            name: name.into(),
            stopped,
            stopped_reason: String::new(),
            stopped_event: None,
            frames: None,
            generation: 0,
        }
    }

    /// Cached stack frames, valid until the thread next stops or runs.
    pub fn frames(&self) -> Option<&[StackFrame]> {
        self.frames.as_deref()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_frames(&mut self, generation: u64, frames: Vec<StackFrame>) -> bool {
        if generation != self.generation || !self.stopped {
            return false;
        }
        self.frames = Some(frames);
        true
    }

    pub(crate) fn set_stopped(&mut self, event: Option<&StoppedEventBody>) {
        self.frames = None;
        self.generation += 1;
        self.stopped = true;

        if let Some(event) = event {
            self.stopped_reason = stopped_text(event);
            self.stopped_event = Some(event.clone());
        }
    }

    pub(crate) fn set_continued(&mut self) {
        self.frames = None;
        self.generation += 1;
        self.stopped = false;
        self.stopped_reason.clear();
        self.stopped_event = None;
    }
}

fn stopped_text(event: &StoppedEventBody) -> String {
    let description = event.description.as_deref().filter(|s| !s.is_empty());
    let text = event.text.as_deref().filter(|s| !s.is_empty());
    let reason = Some(event.reason.as_str()).filter(|s| !s.is_empty());

    match (description, text) {
        (Some(description), Some(text)) => format!("Stopped: {description}: {text}"),
        _ => match text.or(description).or(reason) {
            Some(detail) => format!("Stopped: {detail}"),
            None => "Stopped".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(reason: &str, description: Option<&str>, text: Option<&str>) -> StoppedEventBody {
        StoppedEventBody {
            reason: reason.into(),
            description: description.map(str::to_string),
            text: text.map(str::to_string),
            ..StoppedEventBody::default()
        }
    }

    #[test]
    fn thread_stopped_text_variants() {
        assert_eq!(
            stopped_text(&event("exception", Some("Paused on exception"), Some("ValueError"))),
            "Stopped: Paused on exception: ValueError"
        );
        assert_eq!(stopped_text(&event("step", None, Some("t"))), "Stopped: t");
        assert_eq!(stopped_text(&event("pause", Some("d"), None)), "Stopped: d");
        assert_eq!(stopped_text(&event("breakpoint", None, None)), "Stopped: breakpoint");
        assert_eq!(stopped_text(&event("", None, None)), "Stopped");
    }

    #[test]
    fn thread_stop_without_event_keeps_reason() {
        let mut thread = Thread::new(1, "main", false);
        thread.set_stopped(Some(&event("breakpoint", None, None)));
        thread.set_stopped(None);
        assert!(thread.stopped);
        assert_eq!(thread.stopped_reason, "Stopped: breakpoint");

        thread.set_continued();
        assert!(!thread.stopped);
        assert!(thread.stopped_reason.is_empty());
        assert!(thread.stopped_event.is_none());
    }

    #[test]
    fn thread_discards_stale_frames() {
        let mut thread = Thread::new(1, "main", false);
        thread.set_stopped(None);
        let generation = thread.generation();
        thread.set_continued();
        assert!(!thread.set_frames(generation, Vec::new()));
        assert!(thread.frames().is_none());

        thread.set_stopped(None);
        assert!(thread.set_frames(thread.generation(), Vec::new()));
        assert_eq!(thread.frames().map(<[StackFrame]>::len), Some(0));
    }
}
