use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use node_forge_spirv::{dsl, pipeline, validation};

#[derive(Debug, Default, Clone)]
struct Cli {
    pipeline_json: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    debug_names: bool,
    wgsl: bool,
    no_validate: bool,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--pipeline" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --pipeline"));
                };
                cli.pipeline_json = Some(PathBuf::from(v));
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --output-dir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--debug-names" => {
                cli.debug_names = true;
                i += 1;
            }
            "--wgsl" => {
                cli.wgsl = true;
                i += 1;
            }
            "--no-validate" => {
                cli.no_validate = true;
                i += 1;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --pipeline <pipeline.json>, --output-dir <dir>, --debug-names, --wgsl, --no-validate)"
                ));
            }
        }
    }
    if cli.pipeline_json.is_none() {
        return Err(anyhow!("--pipeline <pipeline.json> is required"));
    }
    Ok(cli)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pipeline")
        .to_string()
}

fn write_stage(
    output_dir: &Path,
    stem: &str,
    stage: &str,
    result: &node_forge_spirv::spirv::GenerateResult,
    cli: &Cli,
) -> Result<()> {
    if !cli.no_validate {
        validation::validate_spirv_with_context(&result.words, &format!("{stem} {stage} stage"))?;
    }

    let spv_path = output_dir.join(format!("{stem}.{stage}.spv"));
    std::fs::write(&spv_path, result.as_bytes())
        .with_context(|| format!("failed to write {}", spv_path.display()))?;
    println!("[spirv] saved: {}", spv_path.display());

    if cli.wgsl {
        let wgsl = validation::spirv_to_wgsl(&result.words)
            .with_context(|| format!("failed to translate {stem} {stage} stage to WGSL"))?;
        let wgsl_path = output_dir.join(format!("{stem}.{stage}.wgsl"));
        std::fs::write(&wgsl_path, wgsl)
            .with_context(|| format!("failed to write {}", wgsl_path.display()))?;
        println!("[spirv] saved: {}", wgsl_path.display());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let pipeline_path = cli
        .pipeline_json
        .as_deref()
        .ok_or_else(|| anyhow!("--pipeline <pipeline.json> is required"))?;
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    let pipeline_dsl = dsl::load_pipeline_from_path(pipeline_path)?;
    let (vertex, fragment) = dsl::build_scripts(&pipeline_dsl)?;
    let compiled = pipeline::compile_pipeline(&vertex, &fragment, cli.debug_names)?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;
    let stem = file_stem(pipeline_path);
    write_stage(&output_dir, &stem, "vert", &compiled.vertex, cli)?;
    write_stage(&output_dir, &stem, "frag", &compiled.fragment, cli)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_pipeline_outputdir_flags() {
        let args = vec![
            "--pipeline".to_string(),
            "pipeline.json".to_string(),
            "--output-dir".to_string(),
            "out".to_string(),
            "--debug-names".to_string(),
            "--wgsl".to_string(),
        ];
        let cli = parse_cli(&args).unwrap();
        assert_eq!(cli.pipeline_json.as_ref().unwrap(), &PathBuf::from("pipeline.json"));
        assert_eq!(cli.output_dir.as_ref().unwrap(), &PathBuf::from("out"));
        assert!(cli.debug_names);
        assert!(cli.wgsl);
        assert!(!cli.no_validate);
    }

    #[test]
    fn parse_cli_requires_pipeline() {
        let err = parse_cli(&["--wgsl".to_string()]).unwrap_err();
        assert!(err.to_string().contains("--pipeline"));
    }
}
