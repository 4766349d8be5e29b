//! Monitor commands and target discovery
//!
//! Probes such as the Black Magic Probe expose their own commands through
//! `qRcmd` (`monitor` in GDB). Scanning the debug port and listing the
//! discovered targets both go through this path; selecting one is a
//! `vAttach`.

use svdlink_core::config::ScanKind;
use svdlink_core::{Error, Result};

use crate::device::Target;
use crate::memory::{is_error_reply, is_ok};
use crate::packet::printable;
use crate::transport::Transport;

/// A target listed by the probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// Index to pass to [`Target::attach`]
    pub index: u32,
    /// Driver or part name reported by the probe
    pub name: String,
    /// Whether the probe is currently attached to it
    pub connected: bool,
}

/// Parse `monitor targets` output
///
/// Lines look like ` 1   *  STM32F1 medium density M3`; headers and
/// anything not starting with a number are ignored.
pub fn parse_targets(output: &str) -> Vec<TargetInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let digits = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len());
            let index = line[..digits].parse().ok()?;
            let rest = line[digits..].trim();
            let (connected, name) = match rest.strip_prefix('*') {
                Some(name) => (true, name.trim()),
                None => (false, rest),
            };
            Some(TargetInfo {
                index,
                name: name.to_string(),
                connected,
            })
        })
        .collect()
}

impl<T: Transport> Target<T> {
    /// Run a monitor command, returning its console output chunks
    pub fn monitor(&mut self, command: &str) -> Result<Vec<String>> {
        let request = format!("qRcmd,{}", hex::encode(command));
        self.rsp.send_packet(request.as_bytes())?;

        let mut output = Vec::new();
        loop {
            let reply = self.rsp.receive_packet()?;
            if is_ok(&reply) {
                return Ok(output);
            }
            if reply.is_empty() {
                return Err(Error::Protocol(
                    "monitor commands are not supported by the remote".to_string(),
                ));
            }
            if is_error_reply(&reply) {
                return Err(Error::Protocol(format!(
                    "monitor {:?} failed: {}",
                    command,
                    printable(&reply)
                )));
            }
            let chunk = reply
                .strip_prefix(b"O")
                .and_then(|hex_text| hex::decode(hex_text).ok())
                .ok_or_else(|| {
                    Error::Protocol(format!("unexpected monitor reply {}", printable(&reply)))
                })?;
            output.push(String::from_utf8_lossy(&chunk).into_owned());
        }
    }

    /// Run a monitor command, returning its output as one string
    pub fn monitor_text(&mut self, command: &str) -> Result<String> {
        Ok(self.monitor(command)?.concat())
    }

    /// Targets the probe has discovered
    pub fn targets(&mut self) -> Result<Vec<TargetInfo>> {
        Ok(parse_targets(&self.monitor_text("targets")?))
    }

    /// Name of the connected target, if any
    ///
    /// It is an error for more than one target to be connected.
    pub fn target_name(&mut self) -> Result<Option<String>> {
        let connected: Vec<TargetInfo> = self
            .targets()?
            .into_iter()
            .filter(|t| t.connected)
            .collect();
        match connected.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.name.clone())),
            many => Err(Error::Protocol(format!(
                "{} targets are connected",
                many.len()
            ))),
        }
    }

    /// Scan the debug port and list what was found
    pub fn scan(&mut self, kind: ScanKind) -> Result<Vec<TargetInfo>> {
        let output = self.monitor_text(kind.monitor_command())?;
        log::debug!("rsp: {} output: {}", kind.monitor_command(), output.trim_end());
        self.targets()
    }

    /// Attach to target `index`
    pub fn attach(&mut self, index: u32) -> Result<()> {
        self.loaded_stub = None;
        let request = format!("vAttach;{:08X}", index);
        let reply = self.rsp.command(request.as_bytes())?;
        if reply.is_empty() || reply[0] == b'E' {
            return Err(Error::ConnectionFailed(format!(
                "attach to target {} failed: {}",
                index,
                printable(&reply)
            )));
        }
        log::info!("Attached to target {}", index);
        Ok(())
    }

    /// Detach from the current target
    pub fn detach(&mut self) -> Result<()> {
        let reply = self.rsp.command(b"D")?;
        if !is_ok(&reply) {
            return Err(Error::Protocol(format!(
                "detach failed: {}",
                printable(&reply)
            )));
        }
        self.loaded_stub = None;
        Ok(())
    }

    /// Reset the target. The remote sends no reply.
    pub fn reset(&mut self) -> Result<()> {
        self.loaded_stub = None;
        self.rsp.send_packet(b"r")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{replies, reply, ScriptedTransport};

    const BMP_TARGETS: &str = "Available Targets:\nNo. Att Driver\n 1      STM32F1 medium density M3\n 2   *  Cortex-M0+\n";

    fn target(script: &[u8]) -> Target<ScriptedTransport> {
        let mut input = reply(b"");
        input.extend_from_slice(script);
        let mut t = Target::new(ScriptedTransport::new(&input)).unwrap();
        t.set_timeout(std::time::Duration::from_millis(50));
        t
    }

    fn output(text: &str) -> Vec<u8> {
        format!("O{}", hex::encode(text)).into_bytes()
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets(BMP_TARGETS);
        assert_eq!(
            targets,
            vec![
                TargetInfo {
                    index: 1,
                    name: "STM32F1 medium density M3".to_string(),
                    connected: false,
                },
                TargetInfo {
                    index: 2,
                    name: "Cortex-M0+".to_string(),
                    connected: true,
                },
            ]
        );
    }

    #[test]
    fn test_monitor_collects_output() {
        let script = replies(&[output("a "), output("b\n"), b"OK".to_vec()]);
        let mut t = target(&script);
        assert_eq!(t.monitor_text("version").unwrap(), "a b\n");
        let sent = t.into_inner().sent_packets();
        assert_eq!(sent[1], format!("qRcmd,{}", hex::encode("version")).into_bytes());
    }

    #[test]
    fn test_monitor_unsupported() {
        let mut t = target(&reply(b""));
        assert!(matches!(t.monitor("targets"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_target_name() {
        let script = replies(&[output(BMP_TARGETS), b"OK".to_vec()]);
        let mut t = target(&script);
        assert_eq!(t.target_name().unwrap().as_deref(), Some("Cortex-M0+"));

        let both = " 1 * A\n 2 * B\n";
        let script = replies(&[output(both), b"OK".to_vec()]);
        let mut t = target(&script);
        assert!(t.target_name().is_err());
    }

    #[test]
    fn test_attach() {
        let mut t = target(&reply(b"T05"));
        t.attach(1).unwrap();
        assert_eq!(t.into_inner().sent_packets()[1], b"vAttach;00000001");

        let mut t = target(&reply(b"E01"));
        assert!(matches!(t.attach(3), Err(Error::ConnectionFailed(_))));
    }

    #[test]
    fn test_reset_waits_only_for_ack() {
        let mut t = target(b"+");
        t.reset().unwrap();
        assert_eq!(t.into_inner().sent_packets()[1], b"r");
    }
}
