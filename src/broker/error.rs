use std::fmt::{self, Display};

use thiserror::Error;

/// Error codes the broker reports.
///
/// Codes without a dedicated variant land in [`BrokerErrorCode::Other`] and
/// are classified as [`ErrorClass::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BrokerErrorCode {
	/// Topic or subscription is disabled
	MessagingEntityDisabled,
	/// Topic or subscription does not exist
	MessagingEntityNotFound,
	/// Credentials were rejected
	UnauthorizedAccess,
	/// Lock on a received message expired
	MessageLockLost,
	/// Broker is throttling requests
	ServiceBusy,
	/// Any other broker code
	Other(String),
}

impl BrokerErrorCode {
	/// Parses a broker code string.
	pub fn from_code(code: &str) -> Self {
		match code {
			| "MessagingEntityDisabled" => Self::MessagingEntityDisabled,
			| "MessagingEntityNotFound" => Self::MessagingEntityNotFound,
			| "UnauthorizedAccess" => Self::UnauthorizedAccess,
			| "MessageLockLost" => Self::MessageLockLost,
			| "ServiceBusy" => Self::ServiceBusy,
			| other => Self::Other(other.to_string()),
		}
	}

	/// Broker code string.
	pub fn as_str(&self) -> &str {
		match self {
			| Self::MessagingEntityDisabled => "MessagingEntityDisabled",
			| Self::MessagingEntityNotFound => "MessagingEntityNotFound",
			| Self::UnauthorizedAccess => "UnauthorizedAccess",
			| Self::MessageLockLost => "MessageLockLost",
			| Self::ServiceBusy => "ServiceBusy",
			| Self::Other(code) => code,
		}
	}

	/// Recovery class of this code.
	pub fn class(&self) -> ErrorClass {
		match self {
			| Self::MessagingEntityDisabled
			| Self::MessagingEntityNotFound
			| Self::UnauthorizedAccess => ErrorClass::Fatal,
			| Self::MessageLockLost => ErrorClass::Recoverable,
			| Self::ServiceBusy => ErrorClass::Transient,
			| Self::Other(_) => ErrorClass::Unknown,
		}
	}
}

impl Display for BrokerErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<&str> for BrokerErrorCode {
	fn from(code: &str) -> Self {
		Self::from_code(code)
	}
}

/// How the engine reacts to a broker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
	/// Processing cannot continue
	Fatal,
	/// Broker redelivers, nothing to do
	Recoverable,
	/// Back off, then continue
	Transient,
	/// Code the engine does not know
	Unknown,
}

impl Display for ErrorClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| ErrorClass::Fatal => "fatal",
			| ErrorClass::Recoverable => "recoverable",
			| ErrorClass::Transient => "transient",
			| ErrorClass::Unknown => "unknown",
		};
		f.write_str(name)
	}
}

/// Error reported by the broker client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BrokerError {
	/// Broker error code
	pub code: BrokerErrorCode,
	/// Human readable description
	pub message: String,
}

impl BrokerError {
	/// Creates a broker error.
	pub fn new(
		code: impl Into<BrokerErrorCode>,
		message: impl Into<String>,
	) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
		}
	}

	/// Recovery class of the error code.
	pub fn class(&self) -> ErrorClass {
		self.code.class()
	}
}

/// Operation the broker was performing when the error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
	/// Receiving messages
	Receive,
	/// Completing a message
	Complete,
	/// Abandoning a message
	Abandon,
	/// Renewing a message lock
	RenewLock,
	/// Processing inside the message callback
	ProcessMessageCallback,
}

impl Display for ErrorSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| ErrorSource::Receive => "receive",
			| ErrorSource::Complete => "complete",
			| ErrorSource::Abandon => "abandon",
			| ErrorSource::RenewLock => "renewLock",
			| ErrorSource::ProcessMessageCallback => "processMessageCallback",
		};
		f.write_str(name)
	}
}

/// Everything the broker reports alongside a receive-side error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessErrorArgs {
	/// The error itself
	pub error: BrokerError,
	/// Where the error originated
	pub error_source: ErrorSource,
	/// `topic/Subscriptions/name` path of the receiving entity
	pub entity_path: String,
	/// Broker namespace
	pub fully_qualified_namespace: String,
}

impl ProcessErrorArgs {
	/// Receive-side error for the given entity.
	pub fn new(error: BrokerError, entity_path: impl Into<String>) -> Self {
		Self {
			error,
			error_source: ErrorSource::Receive,
			entity_path: entity_path.into(),
			fully_qualified_namespace: String::new(),
		}
	}
}
