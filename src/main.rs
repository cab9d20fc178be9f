//! Command-line driver: emit the built-in field kernel suite.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rayon::prelude::*;

use limbforge::codegen::Target;
use limbforge::diagnostic::render_diagnostics;
use limbforge::kernels::field::{emit_field_kernels, EmittedKernels, KERNEL_NAMES};
use limbforge::FieldParams;

// BN254 base field, the default demo target.
const DEFAULT_MODULUS: &str =
    "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47";

#[derive(Parser)]
#[command(name = "limbforge", version, about = "GPU kernel compiler for field arithmetic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit kernel source files for a field.
    Emit {
        /// JSON field description (name, modulus_hex, word_bits).
        #[arg(long)]
        params: Option<PathBuf>,
        /// Backend: cuda, wgsl, or all. The WGSL suite is always
        /// generated with 32-bit words.
        #[arg(long, default_value = "all")]
        target: String,
        /// Output directory.
        #[arg(long, default_value = "kernels-out")]
        out: PathBuf,
    },
    /// Show the derived field parameters and exported kernels.
    List {
        #[arg(long)]
        params: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Emit { params, target, out } => run_emit(params.as_deref(), &target, &out),
        Command::List { params } => run_list(params.as_deref()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_params(path: Option<&Path>) -> Result<FieldParams, String> {
    let fp = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str::<FieldParams>(&text)
                .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?
        }
        None => FieldParams {
            name: "bn254_fp".into(),
            modulus_hex: DEFAULT_MODULUS.into(),
            word_bits: 64,
        },
    };
    fp.validate().map_err(|e| e.to_string())?;
    Ok(fp)
}

fn parse_targets(target: &str) -> Result<Vec<Target>, String> {
    match target {
        "all" => Ok(Target::all().to_vec()),
        other => Ok(vec![other.parse()?]),
    }
}

fn run_emit(params: Option<&Path>, target: &str, out: &Path) -> Result<(), String> {
    let fp = load_params(params)?;
    let targets = parse_targets(target)?;
    let emitted = emit_suites(&fp, &targets)?;
    std::fs::create_dir_all(out).map_err(|e| format!("cannot create {}: {}", out.display(), e))?;
    for kernels in &emitted {
        let path = write_kernels(out, kernels)?;
        render_diagnostics(&kernels.warnings);
        println!("{}  {}  {}", kernels.hash, kernels.target, path.display());
    }
    Ok(())
}

/// Compile the suite for every requested target. Each compilation gets
/// its own context, so the fan-out is safe to run in parallel.
fn emit_suites(fp: &FieldParams, targets: &[Target]) -> Result<Vec<EmittedKernels>, String> {
    targets
        .par_iter()
        .map(|&target| {
            let fp = if target == Target::Wgsl {
                fp.with_word_bits(32)
            } else {
                fp.clone()
            };
            emit_field_kernels(&fp, target).map_err(|e| format!("{}: {}", target, e))
        })
        .collect()
}

fn write_kernels(out: &Path, kernels: &EmittedKernels) -> Result<PathBuf, String> {
    let ext = match kernels.target {
        Target::Cuda => ".cu",
        Target::Wgsl => ".wgsl",
    };
    let path = out.join(format!("{}{}", kernels.field, ext));
    std::fs::write(&path, &kernels.source)
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    Ok(path)
}

fn run_list(params: Option<&Path>) -> Result<(), String> {
    let fp = load_params(params)?;
    println!("field:      {}", fp.name);
    println!("modulus:    {}", fp.modulus_hex);
    println!("word bits:  {}", fp.word_bits);
    println!("words:      {}", fp.num_words());
    println!("bit length: {}", fp.bit_length());
    println!("spare bits: {}", fp.spare_bits());
    println!("m0ninv:     {:#x}", fp.m0ninv());
    println!("kernels:");
    for name in KERNEL_NAMES {
        println!("  {}", name);
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_writes_one_file_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let fp = load_params(None).unwrap();
        let emitted = emit_suites(&fp, &Target::all()).unwrap();
        for kernels in &emitted {
            write_kernels(dir.path(), kernels).unwrap();
        }
        assert!(dir.path().join("bn254_fp.cu").exists());
        assert!(dir.path().join("bn254_fp.wgsl").exists());
    }

    #[test]
    fn params_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.json");
        std::fs::write(
            &path,
            r#"{"name":"tiny","modulus_hex":"0x3037","word_bits":32}"#,
        )
        .unwrap();
        let fp = load_params(Some(&path)).unwrap();
        assert_eq!(fp.name, "tiny");
        assert_eq!(fp.num_words(), 1);
    }

    #[test]
    fn unknown_target_is_rejected() {
        assert!(parse_targets("metal").is_err());
        assert_eq!(parse_targets("all").unwrap().len(), 2);
    }
}
