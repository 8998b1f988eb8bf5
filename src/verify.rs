//! Data verification.

use crate::{Context, Error, Result};

/// Compares transmitted and received bytes.
///
/// Fails with [`Error::Verification`] naming the first differing byte.
pub fn compare(tx: &[u8], rx: &[u8]) -> Result<()> {
    if tx == rx {
        return Ok(());
    }

    match tx.iter().zip(rx).position(|(a, b)| a != b) {
        Some(offset) => Err(Error::Verification { offset, expected: tx[offset], actual: rx[offset] }),
        None => Err(Error::InvalidConfig(format!("cannot compare {} with {} bytes", tx.len(), rx.len()))),
    }
}

impl Context {
    /// Verifies that the first `len` bytes of both buffers are equal.
    pub fn verify(&self, len: usize) -> Result<()> {
        if len > self.size {
            return Err(Error::InvalidConfig(format!("cannot verify {len} bytes of {} byte buffers", self.size)));
        }

        compare(&self.tx[..len], &self.rx[..len]).inspect_err(|err| log::debug!("{err}"))
    }
}

#[cfg(test)]
mod test {
    use super::compare;
    use crate::Error;

    #[test]
    fn equal() {
        compare(&[1, 2, 3], &[1, 2, 3]).unwrap();
        compare(&[], &[]).unwrap();
    }

    #[test]
    fn first_mismatch() {
        match compare(&[1, 2, 3, 4], &[1, 2, 9, 8]) {
            Err(Error::Verification { offset: 2, expected: 3, actual: 9 }) => (),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn length_mismatch() {
        assert!(matches!(compare(&[1, 2], &[1, 2, 3]), Err(Error::InvalidConfig(_))));
    }
}
