//! Inferir CLI - GGUF model inspector and single-block step runner

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Inferir - GGUF inference scaffold
#[derive(Parser)]
#[command(name = "inferir")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header, metadata, dtype histogram, and the tensor directory
    Inspect {
        /// Path to the GGUF model file
        model: PathBuf,
    },
    /// Load one layer and print per-tensor sample statistics
    SmokeLoad {
        /// Path to the GGUF model file
        model: PathBuf,

        /// Layer index to load
        #[arg(long, default_value = "0")]
        layer: u32,

        /// Also load output_norm.weight and output.weight
        #[arg(long)]
        lm_head: bool,
    },
    /// Run one layer-0 forward step for a single token
    LayerStep {
        /// Path to the GGUF model file
        model: PathBuf,

        /// Token id to embed
        #[arg(long)]
        token: u32,

        /// Sequence position (only 0 is supported)
        #[arg(long, default_value = "0")]
        pos: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Inspect { model } => inferir::cli::run_inspect(&model),
        Commands::SmokeLoad {
            model,
            layer,
            lm_head,
        } => inferir::cli::run_smoke_load(&model, layer, lm_head),
        Commands::LayerStep { model, token, pos } => {
            inferir::cli::run_layer_step(&model, token, pos)
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_inspect() {
        let cli = Cli::parse_from(["inferir", "inspect", "model.gguf"]);
        match cli.command {
            Commands::Inspect { model } => assert_eq!(model, PathBuf::from("model.gguf")),
            _ => panic!("expected Inspect"),
        }
    }

    #[test]
    fn test_cli_parsing_smoke_load_defaults() {
        let cli = Cli::parse_from(["inferir", "smoke-load", "m.gguf"]);
        match cli.command {
            Commands::SmokeLoad {
                layer, lm_head, ..
            } => {
                assert_eq!(layer, 0);
                assert!(!lm_head);
            },
            _ => panic!("expected SmokeLoad"),
        }
    }

    #[test]
    fn test_cli_parsing_smoke_load_flags() {
        let cli = Cli::parse_from(["inferir", "smoke-load", "m.gguf", "--layer", "3", "--lm-head"]);
        match cli.command {
            Commands::SmokeLoad {
                layer, lm_head, ..
            } => {
                assert_eq!(layer, 3);
                assert!(lm_head);
            },
            _ => panic!("expected SmokeLoad"),
        }
    }

    #[test]
    fn test_cli_parsing_layer_step() {
        let cli = Cli::parse_from(["inferir", "layer-step", "m.gguf", "--token", "1"]);
        match cli.command {
            Commands::LayerStep { token, pos, .. } => {
                assert_eq!(token, 1);
                assert_eq!(pos, 0);
            },
            _ => panic!("expected LayerStep"),
        }
    }

    #[test]
    fn test_cli_layer_step_requires_token() {
        assert!(Cli::try_parse_from(["inferir", "layer-step", "m.gguf"]).is_err());
    }
}
