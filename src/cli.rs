//! Argument and start-up helpers shared by the binaries.
//!
//! Flags accept both `--name value` and `--name=value`.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;

pub fn args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

pub fn value_arg(args: &[String], name: &str) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

pub fn parse_arg<T: FromStr>(args: &[String], name: &str) -> Option<T> {
    value_arg(args, name).and_then(|v| v.parse::<T>().ok())
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

/// Values after `name` up to the next flag, or a comma list after `name=`.
pub fn list_arg(args: &[String], name: &str) -> Vec<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            return raw
                .split([',', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if arg == name {
            return args[idx + 1..]
                .iter()
                .take_while(|a| !a.starts_with("--"))
                .flat_map(|a| a.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
    Vec::new()
}

/// `RUST_LOG` filter, `info` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, `--config` JSON, `.env` and `RACE_*` variables, then flags.
pub fn load_config(args: &[String]) -> Result<PipelineConfig> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let path = value_arg(args, "--config").map(PathBuf::from);
    let mut cfg = PipelineConfig::load(path.as_deref())?;

    if let Some(dir) = value_arg(args, "--data-dir") {
        cfg.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = value_arg(args, "--output-dir") {
        cfg.output_dir = PathBuf::from(dir);
    }
    if let Some(n) = parse_arg::<usize>(args, "--simulations") {
        cfg.monte_carlo.simulations = n;
    }
    if let Some(n) = parse_arg::<usize>(args, "--races") {
        cfg.monte_carlo.races = n;
    }
    if let Some(seed) = parse_arg::<u64>(args, "--seed") {
        cfg.monte_carlo.seed = Some(seed);
    }
    if let Some(scale) = parse_arg::<f64>(args, "--init-scale") {
        cfg.estimator.init_scale = scale;
    }
    if has_flag(args, "--skip-unpriced") {
        cfg.ingest.skip_unpriced = true;
    }
    if has_flag(args, "--sequential") {
        cfg.monte_carlo.parallel = false;
    }
    cfg.validate().context("invalid command-line overrides")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn both_flag_forms() {
        let a = argv("--seed 7 --races=3");
        assert_eq!(parse_arg::<u64>(&a, "--seed"), Some(7));
        assert_eq!(parse_arg::<usize>(&a, "--races"), Some(3));
        assert_eq!(parse_arg::<usize>(&a, "--simulations"), None);
    }

    #[test]
    fn stage_lists() {
        assert_eq!(list_arg(&argv("--stages 1 2 4 --xlsx out.xlsx"), "--stages"), vec!["1", "2", "4"]);
        assert_eq!(list_arg(&argv("--stages=3,5"), "--stages"), vec!["3", "5"]);
        assert!(list_arg(&argv("--xlsx a"), "--stages").is_empty());
    }

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let a = vec![
            "--output-dir".to_string(),
            dir.path().display().to_string(),
            "--simulations=12".to_string(),
            "--sequential".to_string(),
        ];
        let cfg = load_config(&a).unwrap();
        assert_eq!(cfg.output_dir, dir.path());
        assert_eq!(cfg.monte_carlo.simulations, 12);
        assert!(!cfg.monte_carlo.parallel);
    }
}
