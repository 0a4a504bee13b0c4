//! georeg CLI — register a raster image against a reference basemap.

use clap::Parser;
use std::path::PathBuf;

use georeg::{
    register_scaled, register_with_artifacts, ArtifactSink, ExtractionMode, RegistrationConfig,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "georeg")]
#[command(
    about = "Estimate the projective transform aligning an image to a reference basemap image"
)]
#[command(version)]
#[derive(Debug)]
struct Cli {
    /// Path to the reference basemap image.
    reference: PathBuf,

    /// Path to the image to register against the reference.
    match_image: PathBuf,

    /// Path to write the plain-text registration report.
    output: PathBuf,

    /// Write per-stage debug imagery next to the output (y/n or 1/0).
    #[arg(default_value = "n")]
    debug: String,

    /// Use the slower, more accurate feature backend (y/n or 1/0).
    #[arg(default_value = "n")]
    accurate: String,

    /// Resolution ratio bringing match-image pixels to reference scale.
    #[arg(long, default_value_t = 1.0)]
    scale: f64,
}

fn parse_error_exit_code(kind: clap::error::ErrorKind) -> i32 {
    match kind {
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
        _ => -1,
    }
}

fn parse_flag(name: &str, value: &str) -> CliResult<bool> {
    match value {
        "y" | "1" => Ok(true),
        "n" | "0" => Ok(false),
        other => Err(format!("{} must be one of y/n/1/0, got {:?}", name, other).into()),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Keep clap's message; help and version are not failures.
            let _ = e.print();
            std::process::exit(parse_error_exit_code(e.kind()));
        }
    };

    if let Err(e) = run(&cli) {
        tracing::error!("{}", e);
        std::process::exit(-1);
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let debug = parse_flag("debug", &cli.debug)?;
    let mode = if parse_flag("accurate", &cli.accurate)? {
        ExtractionMode::Accurate
    } else {
        ExtractionMode::Fast
    };

    tracing::info!("Loading reference image: {}", cli.reference.display());
    let reference = image::open(&cli.reference).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", cli.reference.display(), e).into()
    })?;
    tracing::info!("Loading match image: {}", cli.match_image.display());
    let matched = image::open(&cli.match_image).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", cli.match_image.display(), e).into()
    })?;

    let config = RegistrationConfig::default();
    let result = if debug {
        let artifact_dir = cli
            .output
            .parent()
            .map(|p| p.join("georeg_debug"))
            .unwrap_or_else(|| PathBuf::from("georeg_debug"));
        let sink = ArtifactSink::new(artifact_dir);
        if (cli.scale - 1.0).abs() >= config.scale_tolerance {
            tracing::warn!("--scale is ignored when debug artifacts are enabled");
        }
        register_with_artifacts(&reference, &matched, mode, &config, &sink)?
    } else {
        register_scaled(&reference, &matched, mode, &config, cli.scale)?
    };

    tracing::info!(
        "{} with {} inliers at {} px threshold",
        result.confidence,
        result.inliers.len(),
        result.threshold_px
    );
    georeg::report::write_report(&cli.output, &result)?;
    tracing::info!("Report written to {}", cli.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_both_spellings() {
        assert_eq!(parse_flag("debug", "y").unwrap(), true);
        assert_eq!(parse_flag("debug", "1").unwrap(), true);
        assert_eq!(parse_flag("debug", "n").unwrap(), false);
        assert_eq!(parse_flag("debug", "0").unwrap(), false);
        assert!(parse_flag("debug", "yes").is_err());
    }

    #[test]
    fn cli_accepts_positional_layout() {
        let cli = Cli::try_parse_from(["georeg", "ref.png", "new.png", "out.txt", "y", "1"])
            .unwrap();
        assert_eq!(cli.reference, PathBuf::from("ref.png"));
        assert_eq!(cli.debug, "y");
        assert_eq!(cli.accurate, "1");
        assert_eq!(cli.scale, 1.0);
    }

    #[test]
    fn cli_defaults_optional_flags_off() {
        let cli = Cli::try_parse_from(["georeg", "ref.png", "new.png", "out.txt"]).unwrap();
        assert_eq!(cli.debug, "n");
        assert_eq!(cli.accurate, "n");
    }

    #[test]
    fn cli_rejects_missing_arguments() {
        let err = Cli::try_parse_from(["georeg", "ref.png"]).unwrap_err();
        assert_eq!(parse_error_exit_code(err.kind()), -1);
    }

    #[test]
    fn help_and_version_exit_zero() {
        let help = Cli::try_parse_from(["georeg", "--help"]).unwrap_err();
        assert_eq!(parse_error_exit_code(help.kind()), 0);
        let version = Cli::try_parse_from(["georeg", "--version"]).unwrap_err();
        assert_eq!(parse_error_exit_code(version.kind()), 0);
    }
}
