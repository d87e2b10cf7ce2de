//! Authenticated identities.

/// A user a session is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub real_name: Option<String>,
    pub email: Option<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            real_name: None,
            email: None,
        }
    }

    /// The identity of sessions that used `ANONYMOUS` authentication.
    pub fn anonymous() -> Self {
        Self::new("$anonymous")
    }

    pub fn is_anonymous(&self) -> bool {
        self.username == "$anonymous"
    }
}
