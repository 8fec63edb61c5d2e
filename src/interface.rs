//! Resolving the capture interface and switching it into monitor mode.

use std::collections::HashMap;
use std::process::Command;

use nl80211_ng::Nl80211;

use crate::config::InterfaceBackend;
use crate::error::{ProbeLoggerError, Result};
use crate::frame::parse_mac;

pub trait InterfaceManager {
    /// Name of the interface whose hardware address is `mac`.
    fn resolve(&mut self, mac: &str) -> Result<String>;

    fn set_state(&mut self, interface: &str, enabled: bool) -> Result<()>;

    fn enable_monitor_mode(&mut self, interface: &str) -> Result<()>;
}

/// Resolve `mac`, then take the interface down, into monitor mode and back up.
///
/// The interface is left in monitor mode when the program exits.
pub fn prepare_monitor(manager: &mut dyn InterfaceManager, mac: &str) -> Result<String> {
    let interface = manager.resolve(mac)?;
    log::info!("Resolved {} to interface {}", mac, interface);

    log::info!("Setting {} down.", interface);
    manager.set_state(&interface, false)?;

    log::info!("Setting {} to monitor mode.", interface);
    manager.enable_monitor_mode(&interface)?;

    log::info!("Setting {} up.", interface);
    manager.set_state(&interface, true)?;

    Ok(interface)
}

pub fn from_backend(backend: InterfaceBackend) -> Result<Box<dyn InterfaceManager>> {
    match backend {
        InterfaceBackend::Command => Ok(Box::new(CommandInterfaceManager)),
        InterfaceBackend::Netlink => Ok(Box::new(NetlinkInterfaceManager::new()?)),
    }
}

/// Drives `ip` and `iw`.
pub struct CommandInterfaceManager;

impl InterfaceManager for CommandInterfaceManager {
    fn resolve(&mut self, mac: &str) -> Result<String> {
        let listing = execute_command("ip", &["-br", "link"])?;
        find_interface(&listing, mac).ok_or_else(|| {
            ProbeLoggerError::Setup(format!("No network interface with MAC address {mac}"))
        })
    }

    fn set_state(&mut self, interface: &str, enabled: bool) -> Result<()> {
        let state = if enabled { "up" } else { "down" };
        execute_command("ip", &["link", "set", interface, state]).map(|_| ())
    }

    fn enable_monitor_mode(&mut self, interface: &str) -> Result<()> {
        execute_command("iw", &["dev", interface, "set", "type", "monitor"]).map(|_| ())
    }
}

/// Run a command, returning stdout. A non-zero exit carries stderr.
fn execute_command(program: &str, args: &[&str]) -> Result<String> {
    let command_line = format!("{} {}", program, args.join(" "));
    log::debug!("Running `{}`", command_line);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ProbeLoggerError::Setup(format!("cannot run `{command_line}`: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeLoggerError::Setup(format!(
            "`{}` failed ({}): {}",
            command_line,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Find the interface name in `ip -br link` output.
///
/// Rows look like `wlan1  DOWN  00:c0:ca:ab:12:34 <BROADCAST,MULTICAST>`;
/// virtual links carry a `@parent` suffix on the name.
fn find_interface(listing: &str, mac: &str) -> Option<String> {
    let wanted = parse_mac(mac)?.0;
    listing.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        let name = columns.next()?;
        columns
            .any(|column| parse_mac(column).map_or(false, |found| found.0 == wanted))
            .then(|| name.split('@').next().unwrap_or(name).to_string())
    })
}

/// nl80211 over netlink.
pub struct NetlinkInterfaceManager {
    netlink: Nl80211,
    indexes: HashMap<String, u32>,
}

impl NetlinkInterfaceManager {
    pub fn new() -> Result<Self> {
        let netlink = Nl80211::new()
            .map_err(|e| ProbeLoggerError::Setup(format!("Cannot open Nl80211: {e:?}")))?;
        Ok(NetlinkInterfaceManager {
            netlink,
            indexes: HashMap::new(),
        })
    }

    fn index(&self, interface: &str) -> Result<u32> {
        self.indexes.get(interface).copied().ok_or_else(|| {
            ProbeLoggerError::Setup(format!("Interface {interface} was not resolved"))
        })
    }
}

impl InterfaceManager for NetlinkInterfaceManager {
    fn resolve(&mut self, mac: &str) -> Result<String> {
        let wanted = parse_mac(mac)
            .ok_or_else(|| ProbeLoggerError::Setup(format!("Invalid MAC address {mac}")))?;

        let iface = self
            .netlink
            .get_interfaces()
            .iter()
            .find(|&(_, iface)| iface.mac.as_deref() == Some(&wanted.0[..]))
            .map(|(_, iface)| iface.clone())
            .ok_or_else(|| {
                ProbeLoggerError::Setup(format!("No network interface with MAC address {mac}"))
            })?;

        let idx = iface
            .index
            .ok_or_else(|| ProbeLoggerError::Setup(format!("Interface {mac} has no index")))?;
        let name = iface.name_as_string();
        self.indexes.insert(name.clone(), idx);
        Ok(name)
    }

    fn set_state(&mut self, interface: &str, enabled: bool) -> Result<()> {
        let idx = self.index(interface)?;
        let result = if enabled {
            self.netlink.set_interface_up(idx)
        } else {
            self.netlink.set_interface_down(idx)
        };
        result.map(|_| ()).map_err(|e| {
            ProbeLoggerError::Setup(format!(
                "Setting {} {} failed: {e:?}",
                interface,
                if enabled { "up" } else { "down" }
            ))
        })
    }

    fn enable_monitor_mode(&mut self, interface: &str) -> Result<()> {
        let idx = self.index(interface)?;
        self.netlink
            .set_interface_monitor(false, idx)
            .map(|_| ())
            .map_err(|e| {
                ProbeLoggerError::Setup(format!("Monitor mode on {interface} failed: {e:?}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every call; fails the step named in `fail_on`.
    #[derive(Default)]
    struct RecordingManager {
        calls: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl RecordingManager {
        fn step(&mut self, call: String, name: &'static str) -> Result<()> {
            self.calls.push(call);
            if self.fail_on == Some(name) {
                return Err(ProbeLoggerError::Setup(format!("{name}: Operation not permitted")));
            }
            Ok(())
        }
    }

    impl InterfaceManager for RecordingManager {
        fn resolve(&mut self, mac: &str) -> Result<String> {
            self.step(format!("resolve {mac}"), "resolve")?;
            Ok("wlan1".to_string())
        }

        fn set_state(&mut self, interface: &str, enabled: bool) -> Result<()> {
            self.step(format!("state {interface} {enabled}"), "state")
        }

        fn enable_monitor_mode(&mut self, interface: &str) -> Result<()> {
            self.step(format!("monitor {interface}"), "monitor")
        }
    }

    const LISTING: &str = "\
lo               UNKNOWN        00:00:00:00:00:00 <LOOPBACK,UP,LOWER_UP>
eth0             UP             b8:27:eb:12:34:56 <BROADCAST,MULTICAST,UP,LOWER_UP>
wlan0            UP             B8:27:EB:AA:BB:CC <BROADCAST,MULTICAST,UP,LOWER_UP>
wlan1            DOWN           00:c0:ca:ab:12:34 <BROADCAST,MULTICAST>
veth1@if7        UP             0a:1b:2c:3d:4e:5f <BROADCAST,MULTICAST,UP,LOWER_UP>
";

    #[test]
    fn test_find_interface() {
        assert_eq!(find_interface(LISTING, "00:C0:CA:AB:12:34").as_deref(), Some("wlan1"));
        assert_eq!(find_interface(LISTING, "b8:27:eb:aa:bb:cc").as_deref(), Some("wlan0"));
        assert_eq!(find_interface(LISTING, "0a:1b:2c:3d:4e:5f").as_deref(), Some("veth1"));
        assert_eq!(find_interface(LISTING, "02:00:00:00:00:01"), None);
        assert_eq!(find_interface(LISTING, "not-a-mac"), None);
    }

    #[test]
    fn test_prepare_monitor_order() {
        let mut manager = RecordingManager::default();
        let interface = prepare_monitor(&mut manager, "00:c0:ca:ab:12:34").unwrap();

        assert_eq!(interface, "wlan1");
        assert_eq!(
            manager.calls,
            vec![
                "resolve 00:c0:ca:ab:12:34",
                "state wlan1 false",
                "monitor wlan1",
                "state wlan1 true",
            ]
        );
    }

    #[test]
    fn test_prepare_monitor_stops_at_failure() {
        let mut manager = RecordingManager {
            fail_on: Some("monitor"),
            ..Default::default()
        };
        let err = prepare_monitor(&mut manager, "00:c0:ca:ab:12:34").unwrap_err();

        assert!(matches!(err, ProbeLoggerError::Setup(_)));
        assert_eq!(manager.calls.len(), 3);
    }

    #[test]
    fn test_failed_command_reports_stderr() {
        let err = execute_command("sh", &["-c", "echo 'no such device' >&2; exit 3"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no such device"));
        assert!(message.contains("sh -c"));
    }

    #[test]
    fn test_missing_program_is_setup_error() {
        let err = execute_command("probelogger-no-such-tool", &[]).unwrap_err();
        assert!(matches!(err, ProbeLoggerError::Setup(_)));
    }
}
