use sellerdesk_core::UserId;

/// Header carrying the acting user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Who is issuing the request (recorded in audit entries).
///
/// Present on every route; falls back to [`UserId::system`] when the header is absent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn system() -> Self {
        Self::new(UserId::system())
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
