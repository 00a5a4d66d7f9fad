//! Request-time session verification.
//!
//! Access tokens are accepted from the `token` cookie or an
//! `Authorization: Bearer` header. Verification is stateless apart from
//! resolving the subject to a user, so deleting a user revokes their
//! outstanding access tokens.

mod cookie;
mod extractors;
mod ip;
mod state;

pub use cookie::{
    ACCESS_COOKIE_NAME, OAUTH_STATE_COOKIE_NAME, REFRESH_COOKIE_NAME, access_token_from_headers,
    bearer_token, clear_cookie, get_cookie, set_cookie,
};
pub use extractors::{Auth, AuthenticatedUser};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
