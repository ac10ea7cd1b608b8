pub const SESSION_COOKIE: &str = "userId";

const SESSION_MAX_AGE_SECS: u32 = 86_400;

/// The signed-in user, resolved once per request from the `userId` cookie.
///
/// The cookie is a plain value set by the login page; it carries no
/// signature and is trusted as-is, matching what the backend expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    User(String),
}

impl Session {
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(user) if !user.is_empty() => Session::User(user.to_string()),
            _ => Session::Anonymous,
        }
    }

    /// Parses a raw `Cookie` request header.
    pub fn from_cookie_header(header: &str) -> Self {
        let value = header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value);
        Self::from_value(value)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Session::User(id) => Some(id),
            Session::Anonymous => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, Session::User(_))
    }

    /// Session half of the report-load key; the view token keeps anonymous
    /// visitors apart.
    pub fn sequence_key(&self) -> &str {
        self.user_id().unwrap_or("")
    }
}

/// `Set-Cookie` value written after a successful login.
pub fn login_cookie(user_id: &str) -> String {
    format!("{SESSION_COOKIE}={user_id}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; SameSite=Lax")
}

/// `Set-Cookie` value that clears the session.
pub fn logout_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

/// User ids end up verbatim in a cookie, so they are kept to characters that
/// need no quoting there.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= 20
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_user_from_cookie_header() {
        let session = Session::from_cookie_header("theme=dark; userId=alice; other=1");
        assert_eq!(session.user_id(), Some("alice"));
        assert!(session.is_signed_in());
    }

    #[test]
    fn empty_or_missing_cookie_is_anonymous() {
        assert_eq!(Session::from_cookie_header("userId=; a=b"), Session::Anonymous);
        assert_eq!(Session::from_cookie_header(""), Session::Anonymous);
        assert_eq!(Session::from_cookie_header("xuserId=bob"), Session::Anonymous);
        assert_eq!(Session::from_value(None).sequence_key(), "");
    }

    #[test]
    fn cookies_match_login_and_logout_shape() {
        assert_eq!(
            login_cookie("alice"),
            "userId=alice; Path=/; Max-Age=86400; SameSite=Lax"
        );
        assert!(logout_cookie().starts_with("userId=;"));
    }

    #[test]
    fn validates_user_ids() {
        assert!(is_valid_user_id("alice_01"));
        assert!(!is_valid_user_id(""));
        assert!(!is_valid_user_id("semi;colon"));
        assert!(!is_valid_user_id("this-id-is-way-too-long-for-the-backend"));
    }
}
