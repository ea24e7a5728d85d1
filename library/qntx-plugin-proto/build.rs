// SPDX-License-Identifier: Apache-2.0

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let root = env!("CARGO_MANIFEST_DIR");
	let path = format!("{root}/proto/qntx/v1/plugin.proto");
	let include = format!("{root}/proto");

	tonic_build::configure()
		.type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
		.type_attribute(".", "#[serde(default)]")
		.compile_protos(&[path], &[include])?;

	Ok(())
}
