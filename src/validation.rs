//! SPIR-V validation and WGSL translation using the naga library.

use anyhow::{Context, Result, anyhow};

/// Parse and validate a SPIR-V module with naga.
///
/// Returns the parsed module and its validation info, or an error describing
/// the first problem naga found.
pub fn validate_spirv(words: &[u32]) -> Result<(naga::Module, naga::valid::ModuleInfo)> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let options = naga::front::spv::Options {
        adjust_coordinate_space: false,
        strict_capabilities: false,
        block_ctx_dump_prefix: None,
    };
    let module = naga::front::spv::parse_u8_slice(&bytes, &options)
        .map_err(|e| anyhow!("SPIR-V parse failed: {e:?}"))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("SPIR-V validation failed: {e:?}"))?;

    Ok((module, info))
}

/// Validate a SPIR-V module and name what produced it in the error.
pub fn validate_spirv_with_context(
    words: &[u32],
    context: &str,
) -> Result<(naga::Module, naga::valid::ModuleInfo)> {
    validate_spirv(words).with_context(|| format!("{context} generated invalid SPIR-V"))
}

/// Translate a SPIR-V module to WGSL, for reading generated shaders.
///
/// The WGSL is parsed back before it is returned.
pub fn spirv_to_wgsl(words: &[u32]) -> Result<String> {
    let (module, info) = validate_spirv(words)?;
    let wgsl = naga::back::wgsl::write_string(
        &module,
        &info,
        naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
    )
    .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))?;
    validate_wgsl(&wgsl)?;
    Ok(wgsl)
}

/// Validate WGSL source code using naga's parser.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL validation failed:\n{}", format_naga_error(source, &e)))
}

/// Format a naga parse error followed by the numbered source.
fn format_naga_error(source: &str, error: &naga::front::wgsl::ParseError) -> String {
    let mut output = String::new();
    output.push_str(&format!("  {}\n", error));

    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}
