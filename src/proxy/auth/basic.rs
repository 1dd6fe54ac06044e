//! Basic proxy authentication

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{AuthScheme, Credential};
use crate::http::Result;

/// The header value is fixed for the lifetime of the credential, so it
/// is computed once at construction.
#[derive(Debug)]
struct BasicAuth {
    header: String,
}

pub(super) fn build(
    _data: Option<&str>,
    credential: Credential,
) -> Result<Box<dyn AuthScheme>> {
    let token = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
    Ok(Box::new(BasicAuth {
        header: format!("Basic {}", token),
    }))
}

impl AuthScheme for BasicAuth {
    fn authorization(
        &mut self,
        _method: &str,
        _uri: &str,
        _entity_body: Option<&[u8]>,
    ) -> Result<Option<String>> {
        Ok(Some(self.header.clone()))
    }
}
