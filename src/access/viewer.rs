use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VIEWER_COOKIE: &str = "viewer";

/// The identity a request is filtered under. Anonymous viewers always have
/// restricted-content filtering enforced; named viewers may have it lifted by
/// the classification oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Named(String),
}

impl Viewer {
    /// Resolve the viewer from the signed cookie. A missing or invalid
    /// signature degrades to anonymous rather than erroring.
    pub fn from_headers(headers: &HeaderMap, secret: &str) -> Viewer {
        match is_authenticated(headers, secret) {
            Some(username) => Viewer::Named(username),
            None => Viewer::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Viewer::Anonymous)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::Named(name) => Some(name),
        }
    }

    /// Stable key for the request-level cache.
    pub fn cache_key(&self) -> String {
        match self {
            Viewer::Anonymous => "anonymous".to_string(),
            Viewer::Named(name) => format!("user:{name}"),
        }
    }
}

pub fn create_signed_cookie(secret: &str, value: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "Invalid secret key")?;
    mac.update(value.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);
    Ok(format!("{}:{}", value, signature_b64))
}

pub fn verify_signed_cookie(secret: &str, signed_value: &str) -> bool {
    if let Some((value, signature_b64)) = signed_value.rsplit_once(':')
        && let Ok(signature) = general_purpose::URL_SAFE_NO_PAD.decode(signature_b64)
        && let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes())
    {
        mac.update(value.as_bytes());
        return mac.verify_slice(&signature).is_ok();
    }
    false
}

pub fn is_authenticated(headers: &HeaderMap, secret: &str) -> Option<String> {
    get_cookie_value(headers, VIEWER_COOKIE).and_then(|signed_value| {
        if verify_signed_cookie(secret, &signed_value) {
            signed_value
                .rsplit_once(':')
                .map(|(username, _)| username.to_string())
        } else {
            None
        }
    })
}

fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get("cookie")?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let cookie = cookie.trim();
            if let Some((key, value)) = cookie.split_once('=') {
                if key.trim() == name {
                    Some(value.trim().to_string())
                } else {
                    None
                }
            } else {
                None
            }
        })
}

/// Build the `Cookie` header value for a named viewer. Used by tests and
/// operators; this server never issues cookies itself.
pub fn viewer_cookie_header(secret: &str, username: &str) -> Result<String, String> {
    let signed = create_signed_cookie(secret, username)?;
    Ok(format!("{VIEWER_COOKIE}={signed}"))
}
