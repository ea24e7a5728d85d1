// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur converting between wire types and Rust-facing
/// types. These never cross a gRPC boundary as a `tonic::Status`; callers
/// decide how to surface them (see `qntx-plugin-sdk`'s reserved
/// `_attribute_parse_error` convention for the one case where a parse
/// failure must not silently drop data).
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid JSON in legacy attribute bundle: {0}")]
	InvalidAttributeJson(#[source] serde_json::Error),

	#[error("unknown job status value {0}")]
	UnknownJobStatus(i32),

	#[error("missing required field `{0}` on wire message")]
	MissingField(&'static str),
}
