/// Chat wire protocol — client requests and server lines.
///
/// The protocol is plain UTF-8 text with no framing. An unauthenticated
/// client may send exactly one of:
///   `login` SPACE login SPACE password
///   `register` SPACE login SPACE password
///
/// Everything an authenticated client sends is a chat line. The server
/// answers with direct replies ([`Reply`]) or broadcast lines ([`Notice`]).
use std::fmt;

/// Help text printed by the interactive client on startup.
pub const BANNER: &str = "Commands:\nlogin your_login your_password\nregister your_login your_password";

/// An authentication request from an unauthenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Login { login: String, password: String },
    Register { login: String, password: String },
}

impl Request {
    /// Parse raw text into a request.
    ///
    /// Splits on any whitespace. Only three-token input with a known verb
    /// is a request; anything else is `None` and gets ignored by the server.
    pub fn parse(input: &str) -> Option<Self> {
        let mut tokens = input.split_whitespace();
        let (verb, login, password) = (tokens.next()?, tokens.next()?, tokens.next()?);
        if tokens.next().is_some() {
            return None;
        }

        let (login, password) = (login.to_owned(), password.to_owned());
        match verb {
            "login" => Some(Request::Login { login, password }),
            "register" => Some(Request::Register { login, password }),
            _ => None,
        }
    }
}

/// Replies sent only to the requesting connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    LoggedIn,
    InvalidCredentials,
    LoginTaken,
    Registered,
}

impl Reply {
    pub fn as_str(self) -> &'static str {
        match self {
            Reply::LoggedIn => "Successful login",
            Reply::InvalidCredentials => "Invalid login or password",
            Reply::LoginTaken => "Login already taken",
            Reply::Registered => "Successful registration",
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lines delivered to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice<'a> {
    /// A chat line from an authenticated user.
    Chat { nickname: &'a str, text: &'a str },
    Joined(&'a str),
    Left(&'a str),
}

impl Notice<'_> {
    /// Serialize to the wire text (no trailing newline).
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Chat { nickname, text } => write!(f, "[{nickname}]: {text}"),
            Notice::Joined(nickname) => write!(f, "{nickname} connected"),
            Notice::Left(nickname) => write!(f, "{nickname} disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_login() {
        assert_eq!(
            Request::parse("login alice pw1"),
            Some(Request::Login {
                login: "alice".into(),
                password: "pw1".into(),
            })
        );
    }

    #[test]
    fn parse_register() {
        assert_eq!(
            Request::parse("register bob hunter2"),
            Some(Request::Register {
                login: "bob".into(),
                password: "hunter2".into(),
            })
        );
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        assert_eq!(
            Request::parse("  login\talice   pw1\n"),
            Some(Request::Login {
                login: "alice".into(),
                password: "pw1".into(),
            })
        );
    }

    #[test]
    fn parse_multiline_input_is_one_unit() {
        // Two requests in one read are six tokens, not two requests.
        assert_eq!(Request::parse("login a b\nlogin c d"), None);
    }

    // ── Ignored shapes ───────────────────────────────────────────

    #[test]
    fn parse_rejects_wrong_token_count() {
        assert_eq!(Request::parse(""), None);
        assert_eq!(Request::parse("login"), None);
        assert_eq!(Request::parse("login alice"), None);
        assert_eq!(Request::parse("login alice pw extra"), None);
    }

    #[test]
    fn parse_rejects_unknown_verb() {
        assert_eq!(Request::parse("hello there friend"), None);
    }

    #[test]
    fn parse_verb_is_case_sensitive() {
        assert_eq!(Request::parse("LOGIN alice pw1"), None);
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn reply_texts() {
        assert_eq!(Reply::LoggedIn.to_string(), "Successful login");
        assert_eq!(Reply::InvalidCredentials.to_string(), "Invalid login or password");
        assert_eq!(Reply::LoginTaken.to_string(), "Login already taken");
        assert_eq!(Reply::Registered.to_string(), "Successful registration");
    }

    #[test]
    fn notice_wire_format() {
        let chat = Notice::Chat { nickname: "alice", text: "hello" };
        assert_eq!(chat.to_wire(), "[alice]: hello");
        assert_eq!(Notice::Joined("alice").to_wire(), "alice connected");
        assert_eq!(Notice::Left("alice").to_wire(), "alice disconnected");
    }

    #[test]
    fn chat_text_is_verbatim() {
        let chat = Notice::Chat { nickname: "bob", text: "a\nb " };
        assert_eq!(chat.to_wire(), "[bob]: a\nb ");
    }
}
