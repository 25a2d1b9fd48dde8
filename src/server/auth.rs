//! Decoded-principal extraction (spec.md §6 "Auth contract").
//!
//! The actual bearer/hashed-key validation is an external middleware
//! concern (spec.md §1): this crate never parses `Authorization` headers or
//! checks key hashes against the repository. It only reads whatever
//! principal that middleware already decoded and stashed in the request's
//! extensions, defaulting to an anonymous principal when none is present
//! (e.g. auth disabled, or no middleware configured in front of this
//! service at all).

use actix_web::HttpMessage;
use actix_web::dev::Extensions;

/// The decoded caller identity, as an upstream auth layer would attach it
/// to `HttpRequest::extensions_mut()` before this crate's handlers run.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub api_key_id: Option<String>,
    pub user_id: Option<String>,
}

impl Principal {
    fn from_extensions(extensions: &Extensions) -> Self {
        extensions.get::<Principal>().cloned().unwrap_or_default()
    }
}

pub fn read_principal(req: &actix_web::HttpRequest) -> Principal {
    Principal::from_extensions(&req.extensions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn missing_extension_defaults_to_anonymous() {
        let req = TestRequest::default().to_http_request();
        let principal = read_principal(&req);
        assert!(principal.api_key_id.is_none());
        assert!(principal.user_id.is_none());
    }

    #[test]
    fn present_extension_is_read_through() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(Principal {
            api_key_id: Some("key-123".to_string()),
            user_id: Some("user-9".to_string()),
        });
        let principal = read_principal(&req);
        assert_eq!(principal.api_key_id.as_deref(), Some("key-123"));
        assert_eq!(principal.user_id.as_deref(), Some("user-9"));
    }
}
