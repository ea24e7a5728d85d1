// SPDX-License-Identifier: Apache-2.0

//! Rust-facing types for the QNTX plugin wire protocol, and their
//! conversions to and from the generated [`crate::proto`] messages.
//!
//! The conversions here are where the round-trip laws live: header
//! multi-value order, millisecond timestamps, and the attribute bundle's
//! structured-preferred / JSON-legacy duality all get handled exactly
//! once, in one place, rather than re-derived at every call site.

use crate::error::{Error, Result};
use crate::proto;
use serde_json::{Map, Value};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// HTTP headers
// ---------------------------------------------------------------------------

/// An ordered list of header names, each carrying every value it was sent
/// or should be sent with, preserving multi-value semantics (`Set-Cookie`,
/// `Accept`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireHeaders(pub Vec<(String, Vec<String>)>);

impl WireHeaders {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build from an `http::HeaderMap`, grouping by name and preserving
	/// insertion order of each name's values.
	pub fn from_header_map(headers: &http::HeaderMap) -> Self {
		let mut order: Vec<String> = Vec::new();
		let mut grouped: HashMap<String, Vec<String>> = HashMap::new();

		for name in headers.keys() {
			let name = name.as_str().to_owned();
			if !grouped.contains_key(&name) {
				order.push(name.clone());
			}
			let values = headers
				.get_all(name.as_str())
				.iter()
				.map(|v| v.to_str().unwrap_or_default().to_owned())
				.collect::<Vec<_>>();
			grouped.insert(name, values);
		}

		WireHeaders(
			order
				.into_iter()
				.map(|name| {
					let values = grouped.remove(&name).unwrap_or_default();
					(name, values)
				})
				.collect(),
		)
	}

	/// Apply every header value with `Add` semantics (never `Set`), so
	/// multi-value headers survive the round trip.
	pub fn add_to_header_map(&self, headers: &mut http::HeaderMap) {
		for (name, values) in &self.0 {
			let Ok(header_name) = http::HeaderName::from_bytes(name.as_bytes()) else {
				continue;
			};
			for value in values {
				if let Ok(header_value) = http::HeaderValue::from_str(value) {
					headers.append(header_name.clone(), header_value);
				}
			}
		}
	}
}

impl From<&WireHeaders> for Vec<proto::HttpHeader> {
	fn from(headers: &WireHeaders) -> Self {
		headers
			.0
			.iter()
			.map(|(name, values)| proto::HttpHeader {
				name: name.clone(),
				values: values.clone(),
			})
			.collect()
	}
}

impl From<Vec<proto::HttpHeader>> for WireHeaders {
	fn from(wire: Vec<proto::HttpHeader>) -> Self {
		WireHeaders(wire.into_iter().map(|h| (h.name, h.values)).collect())
	}
}

// ---------------------------------------------------------------------------
// HTTP request/response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
	pub method: String,
	pub path: String,
	pub headers: WireHeaders,
	pub body: Vec<u8>,
}

impl From<HttpRequest> for proto::HttpRequest {
	fn from(value: HttpRequest) -> Self {
		proto::HttpRequest {
			method: value.method,
			path: value.path,
			headers: (&value.headers).into(),
			body: value.body,
		}
	}
}

impl From<proto::HttpRequest> for HttpRequest {
	fn from(value: proto::HttpRequest) -> Self {
		HttpRequest {
			method: value.method,
			path: value.path,
			headers: value.headers.into(),
			body: value.body,
		}
	}
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: u16,
	pub headers: WireHeaders,
	pub body: Vec<u8>,
}

impl From<HttpResponse> for proto::HttpResponse {
	fn from(value: HttpResponse) -> Self {
		proto::HttpResponse {
			status: value.status as u32,
			headers: (&value.headers).into(),
			body: value.body,
		}
	}
}

impl From<proto::HttpResponse> for HttpResponse {
	fn from(value: proto::HttpResponse) -> Self {
		HttpResponse {
			status: value.status as u16,
			headers: value.headers.into(),
			body: value.body,
		}
	}
}

// ---------------------------------------------------------------------------
// WebSocket frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
	Connect,
	Data { bytes: Vec<u8>, ts_millis: i64 },
	Ping { ts_millis: i64 },
	Pong { ts_millis: i64 },
	Error { bytes: Vec<u8> },
	Close { ts_millis: i64 },
}

impl From<WsFrame> for proto::WsFrame {
	fn from(value: WsFrame) -> Self {
		use proto::ws_frame::Payload;
		let payload = match value {
			WsFrame::Connect => Payload::Connect(proto::WsConnect {}),
			WsFrame::Data { bytes, ts_millis } => Payload::Data(proto::WsData { bytes, ts_millis }),
			WsFrame::Ping { ts_millis } => Payload::Ping(proto::WsPing { ts_millis }),
			WsFrame::Pong { ts_millis } => Payload::Pong(proto::WsPong { ts_millis }),
			WsFrame::Error { bytes } => Payload::Error(proto::WsError { bytes }),
			WsFrame::Close { ts_millis } => Payload::Close(proto::WsClose { ts_millis }),
		};
		proto::WsFrame {
			payload: Some(payload),
		}
	}
}

impl TryFrom<proto::WsFrame> for WsFrame {
	type Error = Error;

	fn try_from(value: proto::WsFrame) -> Result<Self> {
		use proto::ws_frame::Payload;
		match value.payload.ok_or(Error::MissingField("payload"))? {
			Payload::Connect(_) => Ok(WsFrame::Connect),
			Payload::Data(d) => Ok(WsFrame::Data {
				bytes: d.bytes,
				ts_millis: d.ts_millis,
			}),
			Payload::Ping(p) => Ok(WsFrame::Ping {
				ts_millis: p.ts_millis,
			}),
			Payload::Pong(p) => Ok(WsFrame::Pong {
				ts_millis: p.ts_millis,
			}),
			Payload::Error(e) => Ok(WsFrame::Error { bytes: e.bytes }),
			Payload::Close(c) => Ok(WsFrame::Close {
				ts_millis: c.ts_millis,
			}),
		}
	}
}

// ---------------------------------------------------------------------------
// Plugin identity, health, configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
	pub name: String,
	pub version: String,
	pub required_host_version: String,
	pub description: String,
	pub author: String,
	pub license: String,
}

impl From<proto::PluginMetadata> for PluginMetadata {
	fn from(value: proto::PluginMetadata) -> Self {
		PluginMetadata {
			name: value.name,
			version: value.version,
			required_host_version: value.required_host_version,
			description: value.description,
			author: value.author,
			license: value.license,
		}
	}
}

impl From<PluginMetadata> for proto::PluginMetadata {
	fn from(value: PluginMetadata) -> Self {
		proto::PluginMetadata {
			name: value.name,
			version: value.version,
			required_host_version: value.required_host_version,
			description: value.description,
			author: value.author,
			license: value.license,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
	pub healthy: bool,
	pub paused: bool,
	pub message: String,
	pub detail: HashMap<String, String>,
}

impl HealthStatus {
	pub fn unhealthy(message: impl Into<String>) -> Self {
		HealthStatus {
			healthy: false,
			paused: false,
			message: message.into(),
			detail: HashMap::new(),
		}
	}
}

impl From<proto::HealthStatus> for HealthStatus {
	fn from(value: proto::HealthStatus) -> Self {
		HealthStatus {
			healthy: value.healthy,
			paused: value.paused,
			message: value.message,
			detail: value.detail,
		}
	}
}

impl From<HealthStatus> for proto::HealthStatus {
	fn from(value: HealthStatus) -> Self {
		proto::HealthStatus {
			healthy: value.healthy,
			paused: value.paused,
			message: value.message,
			detail: value.detail,
		}
	}
}

// ---------------------------------------------------------------------------
// Attestations
// ---------------------------------------------------------------------------

/// Reserved attribute key under which a legacy-JSON parse failure is
/// surfaced, so the failure is visible to the plugin rather than silently
/// dropping the record.
pub const ATTRIBUTE_PARSE_ERROR_KEY: &str = "_attribute_parse_error";
/// Reserved attribute key carrying the raw JSON text that failed to parse.
pub const ATTRIBUTE_PARSE_JSON_KEY: &str = "_attribute_parse_json";

#[derive(Debug, Clone, PartialEq)]
pub struct Attestation {
	pub id: String,
	pub subjects: Vec<String>,
	pub predicates: Vec<String>,
	pub contexts: Vec<String>,
	pub actors: Vec<String>,
	pub timestamp_millis: i64,
	pub source: String,
	pub attributes: Value,
	pub created_at_millis: i64,
	pub signature: Option<String>,
	pub signer: Option<String>,
}

fn attribute_value_to_json(value: proto::AttributeValue) -> Value {
	use proto::attribute_value::Kind;
	match value.kind {
		Some(Kind::StringValue(s)) => Value::String(s),
		Some(Kind::NumberValue(n)) => {
			serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
		}
		Some(Kind::BoolValue(b)) => Value::Bool(b),
		Some(Kind::ListValue(list)) => {
			Value::Array(list.items.into_iter().map(attribute_value_to_json).collect())
		}
		Some(Kind::MapValue(map)) => Value::Object(attribute_map_to_json(map)),
		None => Value::Null,
	}
}

fn attribute_map_to_json(map: proto::AttributeMap) -> Map<String, Value> {
	map.fields
		.into_iter()
		.map(|(k, v)| (k, attribute_value_to_json(v)))
		.collect()
}

fn json_to_attribute_value(value: &Value) -> proto::AttributeValue {
	use proto::attribute_value::Kind;
	let kind = match value {
		Value::Null => None,
		Value::Bool(b) => Some(Kind::BoolValue(*b)),
		Value::Number(n) => n.as_f64().map(Kind::NumberValue),
		Value::String(s) => Some(Kind::StringValue(s.clone())),
		Value::Array(items) => Some(Kind::ListValue(proto::AttributeList {
			items: items.iter().map(json_to_attribute_value).collect(),
		})),
		Value::Object(map) => Some(Kind::MapValue(json_to_attribute_map(map))),
	};
	proto::AttributeValue { kind }
}

fn json_to_attribute_map(map: &Map<String, Value>) -> proto::AttributeMap {
	proto::AttributeMap {
		fields: map
			.iter()
			.map(|(k, v)| (k.clone(), json_to_attribute_value(v)))
			.collect(),
	}
}

/// Convert a wire [`proto::AttributeBundle`] to a JSON value, preferring
/// the structured carrier and falling back to parsing the legacy JSON
/// string. A legacy-form parse failure never discards the record: it is
/// surfaced as an object carrying the two reserved error keys.
pub fn attribute_bundle_from_wire(bundle: Option<proto::AttributeBundle>) -> Value {
	use proto::attribute_bundle::Carrier;
	match bundle.and_then(|b| b.carrier) {
		Some(Carrier::Structured(map)) => Value::Object(attribute_map_to_json(map)),
		Some(Carrier::Json(json)) => match serde_json::from_str::<Value>(&json) {
			Ok(value) => value,
			Err(_) => {
				let mut object = Map::new();
				object.insert(ATTRIBUTE_PARSE_ERROR_KEY.to_owned(), Value::Bool(true));
				object.insert(ATTRIBUTE_PARSE_JSON_KEY.to_owned(), Value::String(json));
				Value::Object(object)
			}
		},
		None => Value::Object(Map::new()),
	}
}

/// Convert a JSON value to the wire bundle. New wire contact always uses
/// the structured carrier.
pub fn attribute_bundle_to_wire(value: &Value) -> proto::AttributeBundle {
	use proto::attribute_bundle::Carrier;
	let map = match value {
		Value::Object(map) => json_to_attribute_map(map),
		other => {
			let mut wrapped = Map::new();
			wrapped.insert("value".to_owned(), other.clone());
			json_to_attribute_map(&wrapped)
		}
	};
	proto::AttributeBundle {
		carrier: Some(Carrier::Structured(map)),
	}
}

impl From<proto::Attestation> for Attestation {
	fn from(value: proto::Attestation) -> Self {
		Attestation {
			id: value.id,
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			actors: value.actors,
			timestamp_millis: value.timestamp_millis,
			source: value.source,
			attributes: attribute_bundle_from_wire(value.attributes),
			created_at_millis: value.created_at_millis,
			signature: value.signature,
			signer: value.signer,
		}
	}
}

impl From<Attestation> for proto::Attestation {
	fn from(value: Attestation) -> Self {
		proto::Attestation {
			id: value.id,
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			actors: value.actors,
			timestamp_millis: value.timestamp_millis,
			source: value.source,
			attributes: Some(attribute_bundle_to_wire(&value.attributes)),
			created_at_millis: value.created_at_millis,
			signature: value.signature,
			signer: value.signer,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttestationFilter {
	pub actors: Vec<String>,
	pub subjects: Vec<String>,
	pub predicates: Vec<String>,
	pub contexts: Vec<String>,
	pub time_start_millis: Option<i64>,
	pub time_end_millis: Option<i64>,
	pub limit: Option<u32>,
}

impl From<proto::AttestationFilter> for AttestationFilter {
	fn from(value: proto::AttestationFilter) -> Self {
		// Backward-compat rule: an explicit `actors` list always wins; a
		// lone legacy `actor` becomes a one-element list.
		let actors = if !value.actors.is_empty() {
			value.actors
		} else if let Some(actor) = value.actor {
			vec![actor]
		} else {
			Vec::new()
		};

		AttestationFilter {
			actors,
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			time_start_millis: value.time_start_millis,
			time_end_millis: value.time_end_millis,
			limit: value.limit,
		}
	}
}

impl From<AttestationFilter> for proto::AttestationFilter {
	fn from(value: AttestationFilter) -> Self {
		proto::AttestationFilter {
			actors: value.actors,
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			time_start_millis: value.time_start_millis,
			time_end_millis: value.time_end_millis,
			limit: value.limit,
			actor: None,
		}
	}
}

/// Caller-supplied fields for `GenerateAndCreateAttestation`: identical to
/// [`Attestation`] minus `id`, which the host assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationCommand {
	pub subjects: Vec<String>,
	pub predicates: Vec<String>,
	pub contexts: Vec<String>,
	pub actors: Vec<String>,
	pub timestamp_millis: i64,
	pub source: String,
	pub attributes: Value,
	pub signature: Option<String>,
	pub signer: Option<String>,
}

impl From<proto::AttestationCommand> for AttestationCommand {
	fn from(value: proto::AttestationCommand) -> Self {
		AttestationCommand {
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			actors: value.actors,
			timestamp_millis: value.timestamp_millis,
			source: value.source,
			attributes: attribute_bundle_from_wire(value.attributes),
			signature: value.signature,
			signer: value.signer,
		}
	}
}

impl From<AttestationCommand> for proto::AttestationCommand {
	fn from(value: AttestationCommand) -> Self {
		proto::AttestationCommand {
			subjects: value.subjects,
			predicates: value.predicates,
			contexts: value.contexts,
			actors: value.actors,
			timestamp_millis: value.timestamp_millis,
			source: value.source,
			attributes: Some(attribute_bundle_to_wire(&value.attributes)),
			signature: value.signature,
			signer: value.signer,
		}
	}
}

impl AttestationCommand {
	/// Turn this command into a full [`Attestation`] once the host has
	/// assigned an identifier.
	pub fn into_attestation(self, id: String, created_at_millis: i64) -> Attestation {
		Attestation {
			id,
			subjects: self.subjects,
			predicates: self.predicates,
			contexts: self.contexts,
			actors: self.actors,
			timestamp_millis: self.timestamp_millis,
			source: self.source,
			attributes: self.attributes,
			created_at_millis,
			signature: self.signature,
			signer: self.signer,
		}
	}
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
	Queued,
	Running,
	Paused,
	Completed,
	Failed,
	Cancelled,
}

impl TryFrom<i32> for JobStatus {
	type Error = Error;

	fn try_from(value: i32) -> Result<Self> {
		match proto::JobStatus::try_from(value).unwrap_or(proto::JobStatus::Unspecified) {
			proto::JobStatus::Queued => Ok(JobStatus::Queued),
			proto::JobStatus::Running => Ok(JobStatus::Running),
			proto::JobStatus::Paused => Ok(JobStatus::Paused),
			proto::JobStatus::Completed => Ok(JobStatus::Completed),
			proto::JobStatus::Failed => Ok(JobStatus::Failed),
			proto::JobStatus::Cancelled => Ok(JobStatus::Cancelled),
			proto::JobStatus::Unspecified => Err(Error::UnknownJobStatus(value)),
		}
	}
}

impl From<JobStatus> for proto::JobStatus {
	fn from(value: JobStatus) -> Self {
		match value {
			JobStatus::Queued => proto::JobStatus::Queued,
			JobStatus::Running => proto::JobStatus::Running,
			JobStatus::Paused => proto::JobStatus::Paused,
			JobStatus::Completed => proto::JobStatus::Completed,
			JobStatus::Failed => proto::JobStatus::Failed,
			JobStatus::Cancelled => proto::JobStatus::Cancelled,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulseState {
	pub call_counters_by_period: HashMap<String, i64>,
	pub spend_counters_by_period: HashMap<String, f64>,
	pub paused: bool,
	pub pause_reason: String,
}

impl From<proto::PulseState> for PulseState {
	fn from(value: proto::PulseState) -> Self {
		PulseState {
			call_counters_by_period: value.call_counters_by_period,
			spend_counters_by_period: value.spend_counters_by_period,
			paused: value.paused,
			pause_reason: value.pause_reason,
		}
	}
}

impl From<PulseState> for proto::PulseState {
	fn from(value: PulseState) -> Self {
		proto::PulseState {
			call_counters_by_period: value.call_counters_by_period,
			spend_counters_by_period: value.spend_counters_by_period,
			paused: value.paused,
			pause_reason: value.pause_reason,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
	pub id: String,
	pub handler: String,
	pub payload: Vec<u8>,
	pub source: String,
	pub status: JobStatus,
	pub progress_current: u64,
	pub progress_total: u64,
	pub cost_estimate: f64,
	pub cost_actual: f64,
	pub pulse_state: Option<PulseState>,
	pub error: String,
	pub parent_job_id: String,
	pub retry_count: u32,
	pub created_at_millis: i64,
	pub started_at_millis: Option<i64>,
	pub completed_at_millis: Option<i64>,
}

impl TryFrom<proto::Job> for Job {
	type Error = Error;

	fn try_from(value: proto::Job) -> Result<Self> {
		Ok(Job {
			id: value.id,
			handler: value.handler,
			payload: value.payload,
			source: value.source,
			status: JobStatus::try_from(value.status)?,
			progress_current: value.progress_current,
			progress_total: value.progress_total,
			cost_estimate: value.cost_estimate,
			cost_actual: value.cost_actual,
			pulse_state: value.pulse_state.map(Into::into),
			error: value.error,
			parent_job_id: value.parent_job_id,
			retry_count: value.retry_count,
			created_at_millis: value.created_at_millis,
			started_at_millis: value.started_at_millis,
			completed_at_millis: value.completed_at_millis,
		})
	}
}

impl From<Job> for proto::Job {
	fn from(value: Job) -> Self {
		proto::Job {
			id: value.id,
			handler: value.handler,
			payload: value.payload,
			source: value.source,
			status: proto::JobStatus::from(value.status) as i32,
			progress_current: value.progress_current,
			progress_total: value.progress_total,
			cost_estimate: value.cost_estimate,
			cost_actual: value.cost_actual,
			pulse_state: value.pulse_state.map(Into::into),
			error: value.error,
			parent_job_id: value.parent_job_id,
			retry_count: value.retry_count,
			created_at_millis: value.created_at_millis,
			started_at_millis: value.started_at_millis,
			completed_at_millis: value.completed_at_millis,
		}
	}
}

// ---------------------------------------------------------------------------
// Config field schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFieldType {
	String,
	Number,
	Boolean,
	Array,
}

impl From<proto::ConfigFieldType> for ConfigFieldType {
	fn from(value: proto::ConfigFieldType) -> Self {
		match value {
			proto::ConfigFieldType::Number => ConfigFieldType::Number,
			proto::ConfigFieldType::Boolean => ConfigFieldType::Boolean,
			proto::ConfigFieldType::Array => ConfigFieldType::Array,
			proto::ConfigFieldType::String | proto::ConfigFieldType::Unspecified => {
				ConfigFieldType::String
			}
		}
	}
}

impl From<ConfigFieldType> for proto::ConfigFieldType {
	fn from(value: ConfigFieldType) -> Self {
		match value {
			ConfigFieldType::String => proto::ConfigFieldType::String,
			ConfigFieldType::Number => proto::ConfigFieldType::Number,
			ConfigFieldType::Boolean => proto::ConfigFieldType::Boolean,
			ConfigFieldType::Array => proto::ConfigFieldType::Array,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFieldSchema {
	pub field_type: ConfigFieldType,
	pub description: String,
	pub default_value: String,
	pub required: bool,
	pub min: Option<f64>,
	pub max: Option<f64>,
	pub pattern: Option<String>,
	pub array_element_type: Option<ConfigFieldType>,
}

impl From<proto::ConfigFieldSchema> for ConfigFieldSchema {
	fn from(value: proto::ConfigFieldSchema) -> Self {
		ConfigFieldSchema {
			field_type: proto::ConfigFieldType::try_from(value.field_type)
				.unwrap_or(proto::ConfigFieldType::String)
				.into(),
			description: value.description,
			default_value: value.default_value,
			required: value.required,
			min: value.min,
			max: value.max,
			pattern: value.pattern,
			array_element_type: {
				let raw = value.array_element_type;
				(raw != 0).then(|| {
					proto::ConfigFieldType::try_from(raw)
						.unwrap_or(proto::ConfigFieldType::String)
						.into()
				})
			},
		}
	}
}

impl From<ConfigFieldSchema> for proto::ConfigFieldSchema {
	fn from(value: ConfigFieldSchema) -> Self {
		proto::ConfigFieldSchema {
			field_type: proto::ConfigFieldType::from(value.field_type) as i32,
			description: value.description,
			default_value: value.default_value,
			required: value.required,
			min: value.min,
			max: value.max,
			pattern: value.pattern,
			array_element_type: value
				.array_element_type
				.map(|t| proto::ConfigFieldType::from(t) as i32)
				.unwrap_or(0),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn headers_round_trip_preserves_multi_value_order() {
		let mut map = http::HeaderMap::new();
		map.append("set-cookie", "session=abc123".parse().unwrap());
		map.append("set-cookie", "user=john".parse().unwrap());
		map.append("set-cookie", "theme=dark".parse().unwrap());

		let wire = WireHeaders::from_header_map(&map);
		let proto_headers: Vec<proto::HttpHeader> = (&wire).into();
		let round_tripped: WireHeaders = proto_headers.into();

		let cookie = round_tripped
			.0
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
			.expect("set-cookie header present");
		assert_eq!(
			cookie.1,
			vec![
				"session=abc123".to_owned(),
				"user=john".to_owned(),
				"theme=dark".to_owned(),
			]
		);
	}

	#[test]
	fn attribute_bundle_structured_round_trips() {
		let original = serde_json::json!({
			"score": 0.9,
			"tags": ["a", "b"],
			"nested": { "ok": true },
		});
		let wire = attribute_bundle_to_wire(&original);
		let back = attribute_bundle_from_wire(Some(wire));
		assert_eq!(back, original);
	}

	#[test]
	fn attribute_bundle_legacy_json_parse_failure_is_surfaced_not_dropped() {
		let bundle = proto::AttributeBundle {
			carrier: Some(proto::attribute_bundle::Carrier::Json("{not valid".to_owned())),
		};
		let value = attribute_bundle_from_wire(Some(bundle));
		let obj = value.as_object().expect("object");
		assert_eq!(obj.get(ATTRIBUTE_PARSE_ERROR_KEY), Some(&Value::Bool(true)));
		assert_eq!(
			obj.get(ATTRIBUTE_PARSE_JSON_KEY),
			Some(&Value::String("{not valid".to_owned()))
		);
	}

	#[test]
	fn filter_actors_list_wins_over_legacy_single_actor() {
		let wire = proto::AttestationFilter {
			actors: vec!["alice".to_owned(), "bob".to_owned()],
			actor: Some("carol".to_owned()),
			..Default::default()
		};
		let filter: AttestationFilter = wire.into();
		assert_eq!(filter.actors, vec!["alice".to_owned(), "bob".to_owned()]);
	}

	#[test]
	fn filter_legacy_single_actor_becomes_one_element_list() {
		let wire = proto::AttestationFilter {
			actor: Some("carol".to_owned()),
			..Default::default()
		};
		let filter: AttestationFilter = wire.into();
		assert_eq!(filter.actors, vec!["carol".to_owned()]);
	}
}
