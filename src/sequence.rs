//! Sequence segmenting and canonical key encoding.
//!
//! A *sequence* is one inactivity-bounded run of tokens: the first
//! token arms it, and a readiness timeout with no further events closes
//! it. Timeouts while nothing has been collected are ignored, so an
//! idle remote never produces empty sequences.

use crate::device::{DeviceError, ReadOutcome, Remote};
use crate::event::format_event;
use std::time::Duration;
use tracing::debug;

/// Ordered tokens of one closed sequence. Never empty once emitted.
pub type Sequence = Vec<String>;

/// Idle/Active segmenter state machine, fed from reader outcomes.
#[derive(Debug, Default)]
pub struct Segmenter {
    tokens: Vec<String>,
}

/// Result of feeding one reader outcome into the segmenter.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Token accumulated; the sequence stays open.
    Open,
    /// Timeout while idle; nothing to close.
    Idle,
    /// A gap after activity closed the sequence.
    Closed(Sequence),
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a formatted token. The first token arms the sequence.
    pub fn push(&mut self, token: String) -> Step {
        self.tokens.push(token);
        Step::Open
    }

    /// Feed an inactivity timeout. While idle this is a no-op so that
    /// repeated timeouts before any activity never close anything.
    pub fn timeout(&mut self) -> Step {
        if self.tokens.is_empty() {
            Step::Idle
        } else {
            Step::Closed(std::mem::take(&mut self.tokens))
        }
    }
}

/// Canonical config key for a sequence: comma-joined and lowercased,
/// with `=` and `:` substituted because they delimit keys in the config
/// format and must never appear in a stored key.
///
/// Keep in sync with [`crate::matcher::match_score`], which assumes `,`
/// is the only inter-token separator.
pub fn encode_key(seq: &[String]) -> String {
    seq.join(",").replace('=', "/").replace(':', "@").to_lowercase()
}

/// Outcome of a capture session.
#[derive(Debug)]
pub enum Capture {
    /// A sequence closed by an inactivity gap. Never empty.
    Sequence(Sequence),
    /// Cancel flag raised; partial tokens are dropped, the caller
    /// shuts down cleanly.
    Interrupted,
    /// A device vanished mid-read (BLE sleep); the caller reconnects.
    Disappeared,
}

/// Capture one sequence: wait for the first token, then collect until
/// the inter-token gap exceeds `timeout`. With `verbose`, tokens are
/// echoed as they arrive.
pub fn capture_sequence(
    remote: &mut Remote,
    timeout: Duration,
    verbose: bool,
) -> Result<Capture, DeviceError> {
    let mut seg = Segmenter::new();

    loop {
        match remote.next_event(timeout)? {
            ReadOutcome::Event(source, ev) => {
                let Some(token) = format_event(source, &ev) else {
                    continue;
                };
                if verbose {
                    println!("{token}");
                }
                seg.push(token);
            }
            ReadOutcome::Timeout => {
                if let Step::Closed(seq) = seg.timeout() {
                    debug!("sequence closed with {} token(s)", seq.len());
                    return Ok(Capture::Sequence(seq));
                }
            }
            ReadOutcome::Interrupted => return Ok(Capture::Interrupted),
            ReadOutcome::Disappeared => return Ok(Capture::Disappeared),
        }
    }
}

/// Continuous capture: echo every token, hand each closed sequence to
/// `sink`, print an inactivity marker after a burst of activity, and
/// keep going until interrupted or the device goes away.
pub fn monitor_sequences<F>(
    remote: &mut Remote,
    timeout: Duration,
    mut sink: F,
) -> Result<Capture, DeviceError>
where
    F: FnMut(Sequence),
{
    let mut seg = Segmenter::new();
    let mut active = false;

    loop {
        match remote.next_event(timeout)? {
            ReadOutcome::Event(source, ev) => {
                let Some(token) = format_event(source, &ev) else {
                    continue;
                };
                println!("{token}");
                active = true;
                seg.push(token);
            }
            ReadOutcome::Timeout => {
                if active {
                    println!("....");
                    active = false;
                }
                if let Step::Closed(seq) = seg.timeout() {
                    sink(seq);
                }
            }
            ReadOutcome::Interrupted => return Ok(Capture::Interrupted),
            ReadOutcome::Disappeared => return Ok(Capture::Disappeared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_timeout_while_idle_is_noop() {
        let mut seg = Segmenter::new();
        assert_eq!(seg.timeout(), Step::Idle);
        assert_eq!(seg.timeout(), Step::Idle);
    }

    #[test]
    fn test_first_token_arms_then_gap_closes() {
        let mut seg = Segmenter::new();
        assert_eq!(seg.push("K=KEY_ENTER=1".into()), Step::Open);
        assert_eq!(seg.push("K=KEY_ENTER=0".into()), Step::Open);
        assert_eq!(
            seg.timeout(),
            Step::Closed(tokens(&["K=KEY_ENTER=1", "K=KEY_ENTER=0"]))
        );
    }

    #[test]
    fn test_segmenter_returns_to_idle_after_close() {
        let mut seg = Segmenter::new();
        seg.push("a".into());
        assert!(matches!(seg.timeout(), Step::Closed(_)));
        // Back in idle: timeouts are no-ops again.
        assert_eq!(seg.timeout(), Step::Idle);
        seg.push("b".into());
        assert_eq!(seg.timeout(), Step::Closed(tokens(&["b"])));
    }

    #[test]
    fn test_encode_key_joins_lowercases_and_substitutes() {
        let seq = tokens(&["K=KEY_VOLUMEUP=1", "K=KEY_VOLUMEUP=0"]);
        assert_eq!(encode_key(&seq), "k/key_volumeup/1,k/key_volumeup/0");
    }

    #[test]
    fn test_encode_key_never_emits_reserved_delimiters() {
        let seq = tokens(&["K=KEY_A=1", "M=ABS_X=10", "odd:token=2"]);
        let key = encode_key(&seq);
        assert!(!key.contains('='), "raw '=' in {key}");
        assert!(!key.contains(':'), "raw ':' in {key}");
    }

    #[test]
    fn test_encode_key_preserves_token_order() {
        let forward = encode_key(&tokens(&["M=REL_X=1", "K=KEY_ENTER=1"]));
        let backward = encode_key(&tokens(&["K=KEY_ENTER=1", "M=REL_X=1"]));
        assert_ne!(forward, backward);
        assert!(forward.starts_with("m/rel_x/1,"));
    }
}
