//! Mail protocol classification by server port

use serde::{Deserialize, Serialize};

/// Mail protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailProtocol {
    #[serde(rename = "POP")]
    Pop,
    #[serde(rename = "SMTP")]
    Smtp,
    #[serde(rename = "IMAP")]
    Imap,
}

impl MailProtocol {
    /// Classify a destination port; `None` for non-mail ports
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            110 | 995 => Some(MailProtocol::Pop),
            25 | 587 | 465 => Some(MailProtocol::Smtp),
            143 | 993 => Some(MailProtocol::Imap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MailProtocol::Pop => "POP",
            MailProtocol::Smtp => "SMTP",
            MailProtocol::Imap => "IMAP",
        }
    }
}

impl std::fmt::Display for MailProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every port routed to the mail aggregator
pub const MAIL_PORTS: &[u16] = &[110, 995, 25, 587, 465, 143, 993];

/// Ports whose payload is TLS and must never be read
pub const ENCRYPTED_MAIL_PORTS: &[u16] = &[995, 587, 465, 993];

pub fn is_mail_port(port: u16) -> bool {
    MAIL_PORTS.contains(&port)
}

pub fn is_encrypted_port(port: u16) -> bool {
    ENCRYPTED_MAIL_PORTS.contains(&port)
}
