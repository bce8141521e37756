use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow};
use schema_forge::{
    BuildOptions, SchemaRegistry, ShaderPipeline,
    binding::{HeadlessContext, HeadlessDevice},
    compiler::{NagaCompiler, ShaderSourceSet},
    scene::{self, Camera, FrameParams},
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SCHEMA_FORGE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    shader_dir: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    jobs: Option<usize>,
    program: String,
    flags: Vec<String>,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            shader_dir: None,
            artifact_dir: None,
            jobs: None,
            program: "PathTrace".to_string(),
            flags: vec!["ACCUMULATE".to_string(), "USE_ENVIRONMENT".to_string()],
        }
    }
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let value = |name: &str| {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("missing value for {name}"))
        };
        match args[i].as_str() {
            "--shader-dir" => {
                cli.shader_dir = Some(PathBuf::from(value("--shader-dir")?));
            }
            "--artifact-dir" => {
                cli.artifact_dir = Some(PathBuf::from(value("--artifact-dir")?));
            }
            "--jobs" => {
                let raw = value("--jobs")?;
                let jobs: usize = raw
                    .parse()
                    .map_err(|_| anyhow!("--jobs expects a positive integer, got '{raw}'"))?;
                cli.jobs = Some(jobs.max(1));
            }
            "--program" => {
                cli.program = value("--program")?.clone();
            }
            "--flags" => {
                cli.flags = value("--flags")?
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --shader-dir <dir>, --artifact-dir <dir>, --jobs <n>, --program <name>, --flags <A,B,...>)"
                ));
            }
        }
        i += 2;
    }
    Ok(cli)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let started = Instant::now();
    let schema = Arc::new(SchemaRegistry::load_default().context("embedded schema is invalid")?);
    let sources = match &cli.shader_dir {
        Some(dir) => ShaderSourceSet::from_dir(dir)?,
        None => ShaderSourceSet::embedded(),
    };

    let mut options = BuildOptions::default();
    if let Some(dir) = &cli.artifact_dir {
        options = options.with_artifact_dir(dir);
    }
    if let Some(jobs) = cli.jobs {
        options = options.with_jobs(jobs);
    }

    let pipeline = ShaderPipeline::build_all_programs(schema, &sources, &NagaCompiler, &options)?;
    for table in pipeline.tables() {
        println!(
            "[build] {}: {} variant(s) over [{}]",
            table.program(),
            table.len(),
            table.branches().join(", ")
        );
    }

    let mut device = HeadlessDevice::new();
    let mut resources = pipeline.create_resources(&mut device)?;

    let buffers = scene::encode_scene(
        pipeline.layouts(),
        &Camera::default(),
        &scene::demo_spheres(),
        (320, 180),
        FrameParams {
            frame_index: 0,
            accumulated_samples: 0,
            max_bounces: 4,
        },
    )?;
    scene::upload_scene(&resources, &mut device, &buffers)?;

    let variant = pipeline.select_named(&cli.program, &cli.flags)?;
    let mut ctx = HeadlessContext::new();
    let report = pipeline.bind_for_draw(variant, &resources, &mut ctx)?;

    println!(
        "[bind] {} permutation {} [{}]",
        report.program, report.permutation, variant.symbols
    );
    for binding in &report.bindings {
        println!(
            "  {:<8} @group({}) @binding({}) <- {} ({:?})",
            binding.stage.to_string(),
            binding.slot.group,
            binding.slot.binding,
            binding.name,
            binding.handle
        );
    }

    resources
        .destroy(&mut device)
        .context("failed to release schema resources")?;
    println!("[done] in {:.1?}", started.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_defaults_to_path_trace() {
        let cli = parse_cli(&[]).unwrap();
        assert_eq!(cli, Cli::default());
        assert_eq!(cli.program, "PathTrace");
    }

    #[test]
    fn parse_cli_reads_every_flag() {
        let cli = parse_cli(&args(&[
            "--shader-dir",
            "shaders",
            "--artifact-dir",
            "out",
            "--jobs",
            "4",
            "--program",
            "Present",
            "--flags",
            "TONEMAP, GAMMA_CORRECT",
        ]))
        .unwrap();
        assert_eq!(cli.shader_dir, Some(PathBuf::from("shaders")));
        assert_eq!(cli.artifact_dir, Some(PathBuf::from("out")));
        assert_eq!(cli.jobs, Some(4));
        assert_eq!(cli.program, "Present");
        assert_eq!(cli.flags, vec!["TONEMAP", "GAMMA_CORRECT"]);
    }

    #[test]
    fn parse_cli_rejects_unknown_and_incomplete_arguments() {
        assert!(parse_cli(&args(&["--headless"])).is_err());
        assert!(parse_cli(&args(&["--jobs"])).is_err());
        assert!(parse_cli(&args(&["--jobs", "many"])).is_err());
    }

    #[test]
    fn empty_flag_list_selects_base_variant() {
        let cli = parse_cli(&args(&["--flags", ""])).unwrap();
        assert!(cli.flags.is_empty());
    }
}
