//! Discovery of the remote's input device nodes.
//!
//! The kernel lists every input device in `/proc/bus/input/devices` as
//! a blank-line separated block. The remote shows up as two blocks
//! sharing a name prefix: a "Consumer Control" half with a `kbd`
//! handler and a "Mouse" half with a `mouse` handler. The scan pulls
//! out the `event*` node and the vendor/product ids for each.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub const PROC_INPUT_DEVICES: &str = "/proc/bus/input/devices";

/// Where to install the generated udev rules.
pub const UDEV_RULE_FILE: &str = "/etc/udev/rules.d/99-blebind.rules";

/// Commands to activate the rules (printed after the template).
pub const UDEV_RELOAD_HELP: &str = r#"
    echo 'options bluetooth hid_suspend=0' | sudo tee /etc/modprobe.d/bt-nosleep.conf
    sudo udevadm control --reload-rules
    sudo udevadm trigger
    sudo usermod -a -G input $USER
    # (and log out and back in again)
"#;

/// What a scan found for one name prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub kbd: Option<PathBuf>,
    pub mouse: Option<PathBuf>,
    pub vendor: Option<String>,
    pub product: Option<String>,
}

impl ScanResult {
    pub fn found_any(&self) -> bool {
        self.kbd.is_some() || self.mouse.is_some()
    }
}

/// Scan the kernel's input-device listing for `prefix`-named devices.
pub fn scan(prefix: &str) -> Result<ScanResult> {
    let listing = fs::read_to_string(PROC_INPUT_DEVICES)
        .with_context(|| format!("Failed to read {PROC_INPUT_DEVICES}"))?;
    Ok(parse_devices(&listing, prefix))
}

/// Parse a proc input listing. Pure so it can be exercised on captured
/// fixtures without hardware.
pub fn parse_devices(listing: &str, prefix: &str) -> ScanResult {
    let mut result = ScanResult::default();
    let name_marker = format!("Name=\"{prefix}");

    for block in listing.split("\n\n") {
        if !block.contains(&name_marker) {
            continue;
        }
        debug!("matched device block for prefix '{prefix}'");

        for line in block.lines() {
            // I: Bus=0005 Vendor=0e05 Product=0a00 Version=4002
            if let Some(ids) = line.strip_prefix("I: ") {
                for field in ids.split_whitespace() {
                    if let Some(vendor) = field.strip_prefix("Vendor=") {
                        result.vendor = Some(vendor.to_string());
                    } else if let Some(product) = field.strip_prefix("Product=") {
                        result.product = Some(product.to_string());
                    }
                }
            }

            // H: Handlers=kbd event14   /   H: Handlers=mouse2 event15
            if let Some(handlers) = line.strip_prefix("H: Handlers=") {
                let Some(event) = handlers
                    .split_whitespace()
                    .find(|h| h.starts_with("event"))
                else {
                    continue;
                };
                let node = PathBuf::from("/dev/input").join(event);
                if handlers.split_whitespace().any(|h| h.starts_with("kbd")) {
                    result.kbd = Some(node);
                } else if handlers.split_whitespace().any(|h| h.starts_with("mouse")) {
                    result.mouse = Some(node);
                }
            }
        }
    }

    result
}

/// udev rules that stop libinput consuming the remote, grant the input
/// group read access, and disable BLE autosuspend.
pub fn udev_rules(vendor: &str, product: &str) -> String {
    format!(
        r#"# Stop libinput feeding events into X11 or wayland
SUBSYSTEM=="input", ATTRS{{id/vendor}}=="{vendor}", ATTRS{{id/product}}=="{product}", ENV{{LIBINPUT_IGNORE_DEVICE}}="1"
# Allow normal users to read the remote's input devices
SUBSYSTEM=="input", ATTRS{{id/vendor}}=="{vendor}", ATTRS{{id/product}}=="{product}", MODE="0664", GROUP="input"
# Disable BLE auto suspend
SUBSYSTEM=="input", ATTRS{{id/vendor}}=="{vendor}", ATTRS{{id/product}}=="{product}", RUN+="/bin/sh -c 'echo 1 > /sys/class/input/%k/device/power/control'"
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const LISTING: &str = r#"I: Bus=0019 Vendor=0000 Product=0005 Version=0000
N: Name="Lid Switch"
P: Phys=PNP0C0D/button/input0
H: Handlers=event0
B: EV=21

I: Bus=0005 Vendor=0e05 Product=0a00 Version=4002
N: Name="BLE-M3 Consumer Control"
P: Phys=aa:bb:cc:dd:ee:ff
H: Handlers=sysrq kbd event14
B: EV=1f

I: Bus=0005 Vendor=0e05 Product=0a00 Version=4002
N: Name="BLE-M3 Mouse"
P: Phys=aa:bb:cc:dd:ee:ff
H: Handlers=mouse2 event15
B: EV=17"#;

    #[test]
    fn test_parse_finds_both_halves() {
        let result = parse_devices(LISTING, "BLE-M3");
        assert_eq!(result.kbd.as_deref(), Some(Path::new("/dev/input/event14")));
        assert_eq!(result.mouse.as_deref(), Some(Path::new("/dev/input/event15")));
        assert_eq!(result.vendor.as_deref(), Some("0e05"));
        assert_eq!(result.product.as_deref(), Some("0a00"));
    }

    #[test]
    fn test_parse_ignores_other_devices() {
        let result = parse_devices(LISTING, "BLE-M3");
        // The Lid Switch block has a kbd-less handler line and a
        // different name; it must not leak into the result.
        assert_ne!(result.kbd.as_deref(), Some(Path::new("/dev/input/event0")));
    }

    #[test]
    fn test_parse_unknown_prefix_finds_nothing() {
        let result = parse_devices(LISTING, "SomeOtherRemote");
        assert!(!result.found_any());
        assert_eq!(result.vendor, None);
    }

    #[test]
    fn test_parse_single_half() {
        // Only the consumer-control half paired yet.
        let partial = LISTING.rsplit_once("\n\n").unwrap().0;
        let result = parse_devices(partial, "BLE-M3");
        assert!(result.kbd.is_some());
        assert!(result.mouse.is_none());
        assert!(result.found_any());
    }

    #[test]
    fn test_udev_rules_interpolate_ids() {
        let rules = udev_rules("0e05", "0a00");
        assert!(rules.contains(r#"ATTRS{id/vendor}=="0e05""#));
        assert!(rules.contains(r#"ATTRS{id/product}=="0a00""#));
        assert!(rules.contains("LIBINPUT_IGNORE_DEVICE"));
        assert!(rules.contains(r#"GROUP="input""#));
    }
}
