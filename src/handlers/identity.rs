//! Caller identity, consumed from upstream collaborators: the auth layer
//! (out of scope here) injects a trusted `x-user-id` header for logged-in
//! callers, and anonymous callers carry the httpOnly guest cookie minted by
//! create-intent.

use actix_web::HttpRequest;
use uuid::Uuid;

use crate::errors::AppError;
use crate::gateway::metadata::{IntentMetadata, MetadataOwner};

pub const GUEST_COOKIE: &str = "guest_id";
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
}

impl RequestIdentity {
    pub fn from_request(req: &HttpRequest) -> Self {
        let user_id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok());
        let guest_id = req.cookie(GUEST_COOKIE).map(|c| c.value().to_string());
        RequestIdentity { user_id, guest_id }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Verify the caller owns the intent: matching user id for authenticated
/// callers, matching guest cookie otherwise.
pub fn check_ownership(meta: &IntentMetadata, identity: &RequestIdentity) -> Result<(), AppError> {
    let owns = match meta.owner() {
        Some(MetadataOwner::User(uid)) => identity.user_id == Some(uid),
        Some(MetadataOwner::Guest(gid)) => identity.guest_id.as_deref() == Some(gid.as_str()),
        None => false,
    };
    if owns {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
