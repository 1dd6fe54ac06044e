//! Digest proxy authentication (RFC 2617)
//!
//! Carries the full challenge state: realm, server nonce, quality of
//! protection, algorithm, opaque blob, plus the client nonce and its
//! monotonically increasing use count. One client nonce serves up to an
//! hour of requests against the same challenge; after that the scheme
//! stays quiet until a fresh 407 re-arms it.

use std::time::{Duration, Instant};

use openssl::hash::{hash, MessageDigest};
use rand::Rng;

use super::{AuthScheme, Credential};
use crate::http::{Error, Result};

/// How long one client nonce may be reused
const CNONCE_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    fn label(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

#[derive(Debug)]
struct DigestAuth {
    credential: Credential,
    realm: String,
    nonce: String,
    qop: Option<Qop>,
    algorithm: Algorithm,
    opaque: Option<String>,
    cnonce: String,
    cnonce_created: Instant,
    nc: u32,
}

pub(super) fn build(
    data: Option<&str>,
    credential: Credential,
) -> Result<Box<dyn AuthScheme>> {
    let data = data.ok_or_else(|| Error::Auth("Digest challenge carries no data".to_string()))?;
    Ok(Box::new(parse_challenge(data, credential)?))
}

/// Parse the scheme-data of a Digest challenge.
///
/// `realm` and `nonce` have no defaults and are required; an algorithm
/// or qop token outside the supported set aborts setup rather than
/// silently downgrading.
fn parse_challenge(data: &str, credential: Credential) -> Result<DigestAuth> {
    let realm = grab(data, "realm")
        .ok_or_else(|| Error::Auth("Header realm not found".to_string()))?;
    let nonce = grab(data, "nonce")
        .ok_or_else(|| Error::Auth("Header nonce not found".to_string()))?;

    let algorithm = match grab(data, "algorithm")
        .unwrap_or_else(|| "MD5".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "md5" => Algorithm::Md5,
        "md5-sess" => Algorithm::Md5Sess,
        other => {
            return Err(Error::Auth(format!("Unsupported algorithm {}", other)));
        }
    };

    let mut qop = None;
    for token in grab(data, "qop")
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
    {
        match token.as_str() {
            // Plain auth is preferred when the server offers both
            "auth" => qop = Some(Qop::Auth),
            "auth-int" => {
                if qop.is_none() {
                    qop = Some(Qop::AuthInt);
                }
            }
            other => {
                return Err(Error::Auth(format!("Unsupported QOP {}", other)));
            }
        }
    }

    let opaque = grab(data, "opaque").filter(|o| !o.is_empty());

    Ok(DigestAuth {
        credential,
        realm,
        nonce,
        qop,
        algorithm,
        opaque,
        cnonce: rand::thread_rng().gen_range(123400..9999999u32).to_string(),
        cnonce_created: Instant::now(),
        nc: 0,
    })
}

/// Extract `name=value` or `name="value"` from challenge data. The name
/// must sit at a token boundary so `nonce` never matches inside
/// `cnonce`.
fn grab(header: &str, name: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();
    let needle = name.to_ascii_lowercase();
    let mut from = 0;

    while let Some(found) = lower[from..].find(needle.as_str()) {
        let idx = from + found;
        from = idx + 1;

        if idx > 0 && !matches!(lower.as_bytes()[idx - 1], b' ' | b'\t' | b',') {
            continue;
        }

        let rest = header[idx + name.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();

        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"')?;
            return Some(quoted[..end].to_string());
        }
        let end = rest.find(',').unwrap_or(rest.len());
        return Some(rest[..end].trim().to_string());
    }

    None
}

fn md5_hex(input: &[u8]) -> Result<String> {
    let digest = hash(MessageDigest::md5(), input)
        .map_err(|e| Error::Auth(format!("MD5 unavailable: {}", e)))?;
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

impl DigestAuth {
    fn compute(&mut self, method: &str, uri: &str, entity_body: Option<&[u8]>) -> Result<String> {
        self.nc += 1;

        let mut ha1 = md5_hex(
            format!(
                "{}:{}:{}",
                self.credential.username, self.realm, self.credential.password
            )
            .as_bytes(),
        )?;

        let algorithm = match self.algorithm {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => {
                ha1 = md5_hex(format!("{}:{}:{}", ha1, self.nonce, self.cnonce).as_bytes())?;
                "MD5-sess"
            }
        };

        let ha2 = match self.qop {
            Some(Qop::AuthInt) => {
                let body_hash = md5_hex(entity_body.unwrap_or_default())?;
                md5_hex(format!("{}:{}:{}", method, uri, body_hash).as_bytes())?
            }
            _ => md5_hex(format!("{}:{}", method, uri).as_bytes())?,
        };

        let response = match self.qop {
            Some(qop) => md5_hex(
                format!(
                    "{}:{}:{:08x}:{}:{}:{}",
                    ha1,
                    self.nonce,
                    self.nc,
                    self.cnonce,
                    qop.label(),
                    ha2
                )
                .as_bytes(),
            )?,
            None => md5_hex(format!("{}:{}:{}", ha1, self.nonce, ha2).as_bytes())?,
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", nc={:08x}",
            self.credential.username, self.realm, self.nonce, uri, self.nc
        );
        if self.algorithm != Algorithm::Md5 {
            header.push_str(&format!(", algorithm=\"{}\"", algorithm));
        }
        if let Some(qop) = self.qop {
            header.push_str(&format!(", cnonce=\"{}\", qop={}", self.cnonce, qop.label()));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header.push_str(&format!(", response=\"{}\"", response));
        Ok(header)
    }
}

impl AuthScheme for DigestAuth {
    fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        entity_body: Option<&[u8]>,
    ) -> Result<Option<String>> {
        // An aged client nonce needs a fresh challenge before the scheme
        // can speak again
        if self.cnonce_created.elapsed() >= CNONCE_LIFETIME {
            return Ok(None);
        }
        self.compute(method, uri, entity_body).map(Some)
    }
}
