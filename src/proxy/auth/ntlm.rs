//! NTLM proxy authentication
//!
//! NTLM is registered so a proxy offering it gets a deterministic
//! answer, but the challenge/response flow itself is not implemented.

use super::{AuthScheme, Credential};
use crate::http::{Error, Result};

pub(super) fn build(
    _data: Option<&str>,
    _credential: Credential,
) -> Result<Box<dyn AuthScheme>> {
    Err(Error::NotImplemented("NTLM proxy authentication"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fails() {
        let err = build(None, Credential::new("u", "p")).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }
}
