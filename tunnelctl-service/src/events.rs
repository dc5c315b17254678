//! Lifecycle events from the connection manager, one JSON `VpnState` per line

use std::io::BufRead;
use tunnelctl_core::VpnState;

/// Parse one line. Blank lines are `Ok(None)`.
pub fn parse_event(line: &str) -> serde_json::Result<Option<VpnState>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Feed every event read from `reader` to `on_event` until EOF or until
/// `on_event` returns false. Malformed lines are logged and skipped.
pub fn read_events<R: BufRead>(reader: R, mut on_event: impl FnMut(VpnState) -> bool) -> std::io::Result<usize> {
    let mut delivered = 0;

    for line in reader.lines() {
        let line = line?;
        match parse_event(&line) {
            Ok(Some(state)) => {
                if !on_event(state) {
                    log::warn!("Event consumer stopped, ignoring further events");
                    break;
                }
                delivered += 1;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Ignoring malformed lifecycle event '{}': {}", line, e),
        }
    }

    Ok(delivered)
}
