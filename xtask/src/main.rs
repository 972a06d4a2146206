use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use aurora_migration_core::constructs::lambda::LambdaAsset;
use aurora_migration_core::{asset_hash, synth_application, DeploymentConfig, Environment};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_CRATE: &str = "aurora_migration_lambda";
const LAMBDA_BINARIES: [(&str, &str); 2] = [
    ("migration_handler", "migration_handler.zip"),
    ("provider_framework", "provider_framework.zip"),
];

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the Aurora migration workspace",
    long_about = "Packages the Lambda handlers, synthesizes the cloud assembly\n\
                  and runs CI checks for the Aurora migration workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the three stacks into a cloud assembly directory
    Synth {
        /// Target account; the stacks are environment-agnostic when unset
        #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
        account: Option<String>,
        /// Target region; the stacks are environment-agnostic when unset
        #[arg(long, env = "CDK_DEFAULT_REGION")]
        region: Option<String>,
        /// Name of the network stack; the other stacks are prefixed with it
        #[arg(long, default_value = "ApplicationStack")]
        stack_name: String,
        /// Cloud assembly output directory
        #[arg(long, default_value = "cdk.out")]
        output: PathBuf,
        /// Directory holding the packaged Lambda zips
        #[arg(long, default_value = "dist")]
        dist_dir: PathBuf,
    },
    /// Run CI checks (fmt, clippy, tests, packaging + synth)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build and package the Rust Lambda handlers as bootstrap zips
    ServerlessPackage {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zips are written to
        #[arg(long, default_value = "dist")]
        dist_dir: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Package the handlers and synthesize the assembly
    Synth,
    /// Run check + synth
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_serverless_lambdas(target: &str, profile: BuildProfile, dist_dir: &Path) {
    ensure_rust_target_installed(target);

    step("Build Lambda handler binaries");
    let mut cargo_args = vec!["build", "-p", LAMBDA_CRATE, "--target", target];
    for (bin, _) in LAMBDA_BINARIES {
        cargo_args.extend(["--bin", bin]);
    }
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package Lambda zip artifacts");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(dist_dir).expect("failed to create lambda dist directory");

    eprintln!("\nPackaged artifacts:");
    for (bin, zip_name) in LAMBDA_BINARIES {
        let zip_path = dist_dir.join(zip_name);
        package_lambda_zip(&target_dir.join(bin), &zip_path);
        eprintln!("- {}", zip_path.display());
    }
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- serverless-package`"
        );
    }
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected lambda binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    // Fixed timestamp so identical binaries hash to the same asset.
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in lambda zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

fn load_asset(dist_dir: &Path, zip_name: &str) -> LambdaAsset {
    let path = dist_dir.join(zip_name);
    let bytes = fs::read(&path).unwrap_or_else(|error| {
        panic!(
            "failed to read '{}' ({error}); run `cargo run -p xtask -- serverless-package` first",
            path.display()
        )
    });
    let path = fs::canonicalize(&path).unwrap_or(path);
    LambdaAsset::new(path, asset_hash(&bytes))
}

fn synth(
    account: Option<String>,
    region: Option<String>,
    stack_name: String,
    output: &Path,
    dist_dir: &Path,
) {
    step("Synthesize cloud assembly");
    let mut config = DeploymentConfig::new(
        Environment { account, region },
        Utc::now(),
        load_asset(dist_dir, LAMBDA_BINARIES[0].1),
        load_asset(dist_dir, LAMBDA_BINARIES[1].1),
    );
    config.application_stack_name = stack_name;

    let written = match synth_application(&config).and_then(|assembly| assembly.write_to(output)) {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("error: synthesis failed: {error}");
            exit(1);
        }
    };

    eprintln!(
        "\nSynthesized {} files into {} (environment {}):",
        written.len(),
        output.display(),
        config.environment.manifest_string()
    );
    for path in written {
        eprintln!("- {}", path.display());
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test aurora_migration_core");
    run_cargo(&["test", "-p", "aurora_migration_core"]);

    step("Test aurora_migration_lambda");
    run_cargo(&["test", "-p", LAMBDA_CRATE]);
}

fn ci_synth() {
    let dist_dir = Path::new("dist");
    package_serverless_lambdas("x86_64-unknown-linux-gnu", BuildProfile::Release, dist_dir);
    synth(
        None,
        None,
        "ApplicationStack".to_string(),
        Path::new("cdk.out"),
        dist_dir,
    );
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth {
            account,
            region,
            stack_name,
            output,
            dist_dir,
        } => {
            synth(account, region, stack_name, &output, &dist_dir);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Synth => ci_synth(),
                CiJob::All => {
                    ci_check();
                    ci_synth();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::ServerlessPackage {
            target,
            profile,
            dist_dir,
        } => {
            package_serverless_lambdas(&target, profile, &dist_dir);
        }
    }
}
