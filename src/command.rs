use std::fmt;

/// Protocol verbs the receiver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Vrfy,
    Expn,
    Help,
    Noop,
    Quit,
}

impl Verb {
    /// Looks up an already uppercased token. `HELO` is folded into `EHLO`.
    pub fn from_token(token: &str) -> Option<Self> {
        let verb = match token {
            "EHLO" | "HELO" => Verb::Ehlo,
            "MAIL" => Verb::Mail,
            "RCPT" => Verb::Rcpt,
            "DATA" => Verb::Data,
            "RSET" => Verb::Rset,
            "VRFY" => Verb::Vrfy,
            "EXPN" => Verb::Expn,
            "HELP" => Verb::Help,
            "NOOP" => Verb::Noop,
            "QUIT" => Verb::Quit,
            _ => return None,
        };
        Some(verb)
    }

    pub fn reply(self) -> Reply {
        match self {
            Verb::Ehlo | Verb::Mail | Verb::Rcpt | Verb::Rset | Verb::Vrfy | Verb::Noop => {
                Reply::Okay
            }
            Verb::Data => Reply::StartMailInput,
            Verb::Expn | Verb::Help => Reply::NotImplemented,
            Verb::Quit => Reply::Closing,
        }
    }
}

/// Fixed reply lines sent back in command mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Closing,
    Okay,
    StartMailInput,
    ServiceNotAvailable,
    NotImplemented,
}

impl Reply {
    pub fn code(self) -> u16 {
        match self {
            Reply::Closing => 221,
            Reply::Okay => 250,
            Reply::StartMailInput => 354,
            Reply::ServiceNotAvailable => 421,
            Reply::NotImplemented => 502,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Reply::Closing => "221 Bye",
            Reply::Okay => "250 OK",
            Reply::StartMailInput => "354 Start mail input; end with <CRLF>.<CRLF>",
            Reply::ServiceNotAvailable => "421 Idle timeout, closing connection",
            Reply::NotImplemented => "502 Command not implemented",
        }
    }

    /// The reply as it goes on the wire, CRLF included.
    pub fn line(self) -> String {
        format!("{}\r\n", self.text())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Maps a raw command line to its verb and the reply to send.
///
/// Unknown verbs and blank lines are accepted with `250`, the receiver never
/// answers with a syntax error.
pub fn interpret(line: &str) -> (Option<Verb>, Reply) {
    let verb = line
        .split_whitespace()
        .next()
        .and_then(|token| Verb::from_token(&token.to_uppercase()));

    match verb {
        Some(verb) => (Some(verb), verb.reply()),
        None => (None, Reply::Okay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_verbs_get_their_reply() {
        let table = [
            ("EHLO client.example", Verb::Ehlo, 250),
            ("HELO client.example", Verb::Ehlo, 250),
            ("MAIL FROM:<a@x.com>", Verb::Mail, 250),
            ("RCPT TO:<b@y.com>", Verb::Rcpt, 250),
            ("DATA", Verb::Data, 354),
            ("RSET", Verb::Rset, 250),
            ("VRFY someone", Verb::Vrfy, 250),
            ("EXPN list", Verb::Expn, 502),
            ("HELP", Verb::Help, 502),
            ("NOOP", Verb::Noop, 250),
            ("QUIT", Verb::Quit, 221),
        ];

        for (line, verb, code) in table {
            let (parsed, reply) = interpret(&format!("{}\r\n", line));
            assert_eq!(parsed, Some(verb), "{}", line);
            assert_eq!(reply.code(), code, "{}", line);
        }
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(interpret("quit\r\n"), (Some(Verb::Quit), Reply::Closing));
        assert_eq!(interpret("  Data  \n"), (Some(Verb::Data), Reply::StartMailInput));
        assert_eq!(interpret("mail\tfrom:<a@b.c>"), (Some(Verb::Mail), Reply::Okay));
    }

    #[test]
    fn unknown_input_is_accepted() {
        assert_eq!(interpret("STARTTLS\r\n"), (None, Reply::Okay));
        assert_eq!(interpret(".\r\n"), (None, Reply::Okay));
        assert_eq!(interpret("\r\n"), (None, Reply::Okay));
        assert_eq!(interpret(""), (None, Reply::Okay));
        assert_eq!(interpret("MAILFROM:<a@b.c>"), (None, Reply::Okay));
    }

    #[test]
    fn wire_lines_end_with_crlf() {
        assert_eq!(Reply::Closing.line(), "221 Bye\r\n");
        assert!(Reply::StartMailInput.line().starts_with("354 "));
        assert_eq!(Reply::NotImplemented.to_string(), "502 Command not implemented");
    }
}
