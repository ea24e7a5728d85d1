// SPDX-License-Identifier: Apache-2.0

//! Wire schemas and gRPC protocol shared by the QNTX plugin host and every
//! plugin process.
//!
//! This crate owns nothing but the shape of the wire: the generated
//! `prost`/`tonic` types in [`proto`], and the conversions in [`types`]
//! between those wire types and the ergonomic Rust-facing types the host
//! and the plugin SDK actually program against. Neither the host's
//! supervision logic nor the plugin SDK's callback clients live here.

pub mod error;
pub mod types;

/// Generated gRPC message and service types.
pub mod proto {
	tonic::include_proto!("qntx.v1");
}
