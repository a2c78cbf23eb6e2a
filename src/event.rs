//! Formatting raw evdev events into sequence tokens.

use evdev::{InputEvent, InputEventKind};

/// Which half of the remote produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Keyboard,
    Mouse,
}

impl Source {
    /// One-letter tag embedded in tokens.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Keyboard => "K",
            Self::Mouse => "M",
        }
    }
}

/// Render one raw event as a token, or `None` for event kinds the
/// matcher does not track (sync, misc, led, ...).
///
/// Key events become `<tag>=<key-name>=<state>` with state 0/1/2 for
/// release/press/repeat; relative and absolute motion become
/// `<tag>=<axis-name>=<signed-value>`.
pub fn format_event(source: Source, ev: &InputEvent) -> Option<String> {
    match ev.kind() {
        InputEventKind::Key(key) => {
            Some(format!("{}={:?}={}", source.tag(), key, ev.value()))
        }
        InputEventKind::RelAxis(axis) => {
            Some(format!("{}={:?}={}", source.tag(), axis, ev.value()))
        }
        InputEventKind::AbsAxis(axis) => {
            Some(format!("{}={:?}={}", source.tag(), axis, ev.value()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::{EventType, Key, RelativeAxisType};

    #[test]
    fn test_key_press_token() {
        let ev = InputEvent::new(EventType::KEY, Key::KEY_VOLUMEUP.code(), 1);
        assert_eq!(
            format_event(Source::Keyboard, &ev).as_deref(),
            Some("K=KEY_VOLUMEUP=1")
        );
    }

    #[test]
    fn test_key_release_and_repeat_states() {
        let release = InputEvent::new(EventType::KEY, Key::KEY_ENTER.code(), 0);
        let repeat = InputEvent::new(EventType::KEY, Key::KEY_ENTER.code(), 2);
        assert_eq!(
            format_event(Source::Keyboard, &release).as_deref(),
            Some("K=KEY_ENTER=0")
        );
        assert_eq!(
            format_event(Source::Keyboard, &repeat).as_deref(),
            Some("K=KEY_ENTER=2")
        );
    }

    #[test]
    fn test_relative_motion_keeps_sign() {
        let ev = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, -3);
        assert_eq!(
            format_event(Source::Mouse, &ev).as_deref(),
            Some("M=REL_X=-3")
        );
    }

    #[test]
    fn test_untracked_kinds_produce_no_token() {
        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        let misc = InputEvent::new(EventType::MISC, 4, 458792);
        assert_eq!(format_event(Source::Keyboard, &sync), None);
        assert_eq!(format_event(Source::Mouse, &misc), None);
    }
}
