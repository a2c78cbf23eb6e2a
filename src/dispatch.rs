//! Scoring live sequences against the bindings and running the winner.

use crate::config::Config;
use crate::device::{CancelFlag, Remote, sleep_cancelable};
use crate::matcher::match_score;
use crate::sequence::{Capture, capture_sequence, encode_key};
use anyhow::Result;
use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before reopening after the remote drops off (BLE sleep).
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Best score per binding name for one live key. Every stored key is
/// scored; a name recorded under several keys keeps its maximum.
pub fn score_bindings(
    bindings: &BTreeMap<String, String>,
    live_key: &str,
) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for (stored_key, name) in bindings {
        let score = match_score(live_key, stored_key);
        let best = scores.entry(name.clone()).or_insert(0.0);
        if score > *best {
            *best = score;
        }
    }
    scores
}

/// What a dispatch cycle decided for one live key.
#[derive(Debug, PartialEq)]
pub enum Decision {
    /// Best candidate cleared the threshold.
    Execute { name: String, score: f64 },
    /// Nothing matched at all; suggest recording.
    Unknown,
    /// Best candidate stayed below the threshold; report, don't act.
    LowScore { name: String, score: f64 },
}

/// Pick the best-scoring name and apply the threshold. Ties keep the
/// first name in map order; the score alone is the contract.
pub fn decide(scores: &BTreeMap<String, f64>, threshold: f64) -> Decision {
    let mut best: Option<(&str, f64)> = None;
    for (name, &score) in scores {
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((name, score));
        }
    }

    let Some((name, score)) = best else {
        return Decision::Unknown;
    };
    if score >= threshold {
        Decision::Execute {
            name: name.to_string(),
            score,
        }
    } else if score == 0.0 {
        Decision::Unknown
    } else {
        Decision::LowScore {
            name: name.to_string(),
            score,
        }
    }
}

/// Run a binding's command and surface the exit status. A non-zero
/// exit or a launch failure is reported, never fatal to the loop.
fn run_command(name: &str, argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        warn!("empty command recorded for '{name}'");
        return;
    };
    match Command::new(program).args(args).status() {
        Ok(status) if !status.success() => {
            warn!("command for '{name}' exited with {status}");
        }
        Ok(_) => {}
        Err(e) => warn!("failed to launch command for '{name}': {e}"),
    }
}

/// The dispatch loop: capture a sequence, encode it, score every
/// binding, act on the best name. Reopens the devices after the remote
/// drops into BLE sleep; exits cleanly on Ctrl-C. Device-layer I/O
/// errors other than disappearance propagate and end the process.
pub fn run_loop(cfg: &Config, cancel: &CancelFlag) -> Result<()> {
    let timeout = cfg.device.timeout_duration();
    let threshold = cfg.device.match_threshold;
    let config_path = Config::path()?;

    loop {
        let Some(mut remote) = Remote::open(&cfg.inputs, cancel, None)? else {
            return Ok(());
        };
        info!("dispatching; press buttons on the remote");

        let disappeared = loop {
            match capture_sequence(&mut remote, timeout, false)? {
                Capture::Sequence(seq) => dispatch_one(cfg, &seq, threshold, &config_path),
                Capture::Interrupted => break false,
                Capture::Disappeared => break true,
            }
        };

        remote.close();
        if !disappeared {
            return Ok(());
        }

        println!("Device disappeared (BLE sleep)");
        if !sleep_cancelable(RECONNECT_DELAY, cancel) {
            return Ok(());
        }
    }
}

/// One capture's worth of matching and acting.
fn dispatch_one(cfg: &Config, seq: &[String], threshold: f64, config_path: &std::path::Path) {
    let live_key = encode_key(seq);
    let scores = score_bindings(&cfg.bindings, &live_key);
    debug!("live key {live_key}, scores {scores:?}");

    match decide(&scores, threshold) {
        Decision::Execute { name, score } => {
            info!("matched '{name}' (score {score:.1})");
            match cfg.scripts.get(&name) {
                Some(argv) => run_command(&name, argv),
                None => warn!("'{name}' matched but has no script; record one"),
            }
        }
        Decision::Unknown => {
            println!(
                "Event sequence unknown:\n    {seq:?}\n  \
                 Try the 'record' command to add this.\n\
                 Or manually add a binding in {}:\n\"{live_key}\" = \"NAME\"",
                config_path.display()
            );
        }
        Decision::LowScore { name, score } => {
            println!(
                "Low score {score:.1} -> {name} for event sequence:\n    {seq:?}\n  \
                 Try adjustments in {}",
                config_path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_live_key_dispatches_its_name() {
        let b = bindings(&[("k/key_enter/1", "OK"), ("k/key_esc/1", "CANCEL")]);
        let scores = score_bindings(&b, "k/key_enter/1");
        assert_eq!(
            decide(&scores, 50.0),
            Decision::Execute {
                name: "OK".to_string(),
                score: 100.0
            }
        );
    }

    #[test]
    fn test_double_press_still_dispatches_via_band_match() {
        let b = bindings(&[("k/key_enter/1", "OK"), ("k/key_esc/1", "CANCEL")]);
        let scores = score_bindings(&b, "k/key_enter/1,k/key_enter/1");
        match decide(&scores, 50.0) {
            Decision::Execute { name, score } => {
                assert_eq!(name, "OK");
                assert!(score >= 60.0, "got {score}");
            }
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn test_unrelated_live_key_is_unknown() {
        let b = bindings(&[("k/key_enter/1", "OK")]);
        let scores = score_bindings(&b, "x/9/9");
        assert_eq!(decide(&scores, 50.0), Decision::Unknown);
    }

    #[test]
    fn test_no_bindings_is_unknown() {
        let scores = score_bindings(&BTreeMap::new(), "k/key_enter/1");
        assert_eq!(decide(&scores, 50.0), Decision::Unknown);
    }

    #[test]
    fn test_partial_match_below_threshold_reports_low_score() {
        // Interior-band match lands in [40, 60); with threshold 60 it
        // must be reported, not executed.
        let b = bindings(&[("m/rel_x/1", "NUDGE")]);
        let scores = score_bindings(&b, "k/a/1,m/rel_x/1,k/b/1");
        match decide(&scores, 60.0) {
            Decision::LowScore { name, score } => {
                assert_eq!(name, "NUDGE");
                assert!(score > 0.0 && score < 60.0, "got {score}");
            }
            other => panic!("expected LowScore, got {other:?}"),
        }
    }

    #[test]
    fn test_name_keeps_maximum_over_its_keys() {
        // Two recorded variants of the same button; the exact one wins.
        let b = bindings(&[
            ("k/key_volumeup/1", "VOLUP"),
            ("k/key_volumeup/1,k/key_volumeup/0", "VOLUP"),
        ]);
        let scores = score_bindings(&b, "k/key_volumeup/1,k/key_volumeup/0");
        assert_eq!(scores["VOLUP"], 100.0);
    }

    #[test]
    fn test_best_name_across_names_wins() {
        let b = bindings(&[
            ("k/key_enter/1,k/key_enter/0", "OK"),
            ("k/key_esc/1", "CANCEL"),
        ]);
        // Live key extends OK's sequence; CANCEL scores 0.
        let scores = score_bindings(&b, "k/key_enter/1,k/key_enter/0,m/rel_x/2");
        match decide(&scores, 50.0) {
            Decision::Execute { name, .. } => assert_eq!(name, "OK"),
            other => panic!("expected Execute, got {other:?}"),
        }
    }
}
