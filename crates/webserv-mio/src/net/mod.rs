mod listener;

use std::io::ErrorKind;

pub use self::listener::{ListeningEndpoint, StartupError};

/// Split "would block" out of an IO result.
///
/// Returns `Ok(None)` when the operation would block, or was interrupted before doing
/// anything, so it can be retried on the next readiness event.
pub fn check_io<T>(value: Result<T, std::io::Error>) -> Result<Option<T>, std::io::Error> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            // WouldBlock just means we've run out of things to handle
            if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                Ok(None)
            } else {
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};

    use super::check_io;

    #[test]
    fn would_block_is_none() {
        let result: Result<u8, Error> = Err(ErrorKind::WouldBlock.into());
        assert!(matches!(check_io(result), Ok(None)));
    }

    #[test]
    fn other_errors_pass_through() {
        let result: Result<u8, Error> = Err(ErrorKind::ConnectionReset.into());
        let error = check_io(result).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConnectionReset);
    }
}
