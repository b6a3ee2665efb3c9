//! Port allocation.
//!
//! Probes are bind-and-release: nothing is reserved, so another process may
//! still grab the port before the dev server does. The server's own bind is
//! the final word on that.

use std::io::ErrorKind;
use std::net::TcpListener;

use tracing::debug;

use crate::error::{ServeError, ServeResult};

/// Whether `port` can currently be bound on all interfaces.
///
/// `EADDRNOTAVAIL` is reported as an error rather than "busy", since moving
/// to the next port would not help.
pub fn is_port_available(port: u16) -> ServeResult<bool> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => Ok(listener.local_addr().is_ok()),
        Err(err) if err.kind() == ErrorKind::AddrNotAvailable => {
            Err(ServeError::AddressNotAvailable { port })
        }
        Err(err) => {
            debug!(port, error = %err, "port unavailable");
            Ok(false)
        }
    }
}

/// Returns the first open port at or above `start`.
pub fn find_closest_open_port(start: u16) -> ServeResult<u16> {
    let mut port = start;
    loop {
        if is_port_available(port)? {
            if port != start {
                debug!(requested = start, chosen = port, "requested port busy");
            }
            return Ok(port);
        }
        port = port
            .checked_add(1)
            .ok_or(ServeError::PortsExhausted { start })?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn open_port_is_returned_unchanged() {
        let port = free_port();
        assert_eq!(find_closest_open_port(port).unwrap(), port);
    }

    #[test]
    fn busy_port_is_skipped() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let found = find_closest_open_port(busy).unwrap();
        assert!(found > busy);
        drop(listener);
    }
}
