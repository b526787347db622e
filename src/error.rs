// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Inbound packet rejected by the codec.
    Malformed,
    /// ClientID mismatch or required ServerID absent.
    Unauthenticated,
    /// Socket send failure; the transaction retries at the next RT.
    TransientNetwork,
    /// Server replied with a non-success status code.
    ProtocolNak,
    /// Lease applier could not install the lease.
    LocalApplyFailed,
    /// MRC or MRD of the current transaction exhausted.
    BudgetExhausted,
    /// Unrecoverable failure at device creation, e.g. DUID file
    /// unwritable.
    Fatal,
    InvalidArgument,
    Timeout,
    NotSupported,
    Bug,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Malformed => "malformed",
                Self::Unauthenticated => "unauthenticated",
                Self::TransientNetwork => "transient_network",
                Self::ProtocolNak => "protocol_nak",
                Self::LocalApplyFailed => "local_apply_failed",
                Self::BudgetExhausted => "budget_exhausted",
                Self::Fatal => "fatal",
                Self::InvalidArgument => "invalid_argument",
                Self::Timeout => "timeout",
                Self::NotSupported => "not_supported",
                Self::Bug => "bug",
            }
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn msg(&self) -> &str {
        self.msg.as_str()
    }
}

impl std::fmt::Display for DhcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

pub(crate) trait ErrorContext<T> {
    fn context(self, message: &str) -> Result<T, DhcpError>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn context(self, message: &str) -> Result<T, DhcpError> {
        self.map_err(|e| {
            DhcpError::new(ErrorKind::Fatal, format!("{message}: {e}"))
        })
    }
}
