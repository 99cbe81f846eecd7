use std::net::SocketAddr;

use crate::address::{sanitize_addr, DEFAULT_ADDR};
use crate::blocklist::reverse_ip;
use crate::command::{interpret, Reply, Verb};

/// What the connection handler should do after a line was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Reply(Reply),
    /// Body line, nothing goes back on the wire.
    Silent,
    /// Send the reply, then close.
    Quit(Reply),
}

/// Protocol state of one connection.
pub struct Session {
    pub client_addr: SocketAddr,
    pub remote_ip: String,
    pub mail_from: String,
    pub rcpt_to: String,
    pub reading_data: bool,
    /// Peer is on the blocklist but spam detection let it through.
    pub listed: bool,
}

impl Session {
    pub fn new(client_addr: SocketAddr, listed: bool) -> Self {
        Self {
            client_addr,
            remote_ip: reverse_ip(client_addr.ip()),
            mail_from: DEFAULT_ADDR.to_string(),
            rcpt_to: DEFAULT_ADDR.to_string(),
            reading_data: false,
            listed,
        }
    }

    /// Advances the state machine by one complete line.
    ///
    /// In data mode a line starting with `.` ends the body and is then
    /// handled as a command line like any other. Leading dots are not
    /// unstuffed and command order is not enforced.
    pub fn on_line(&mut self, line: &str) -> Step {
        if self.reading_data && line.starts_with('.') {
            self.reading_data = false;
        }
        if self.reading_data {
            return Step::Silent;
        }

        let (verb, reply) = interpret(line);
        match verb {
            Some(Verb::Mail) => self.mail_from = sanitize_addr(line),
            Some(Verb::Rcpt) => self.rcpt_to = sanitize_addr(line),
            Some(Verb::Data) => self.reading_data = true,
            Some(Verb::Quit) => return Step::Quit(reply),
            _ => {}
        }
        Step::Reply(reply)
    }
}
