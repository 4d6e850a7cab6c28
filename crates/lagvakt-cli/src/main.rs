use anyhow::Context;
use clap::{Parser, Subcommand};
use lagvakt_core::{AnswerValidator, CitationPolicy, EvidenceRecord, Mode, SourceTier, TierRegistry, ValidationOutcome};
use lagvakt_runtime::RuntimeConfig;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lagvakt", version, about = "Evidence-gated answer checks")]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity (-v debug, -vv trace)")]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a raw answer payload. Exits 1 when the answer is rejected.
    Validate {
        payload: PathBuf,
        #[arg(long, default_value = "evidence", help = "evidence or assist")]
        mode: Mode,
        #[arg(long, help = "JSON array of retrieved evidence records")]
        evidence: Option<PathBuf>,
        #[arg(long, default_value_t = false, help = "Require citations to match retrieved evidence")]
        strict_citations: bool,
    },
    /// Rank evidence records by source tier.
    Rank {
        records: PathBuf,
        #[arg(long, help = "Tier registry YAML (defaults to the built-in legal registry)")]
        registry: Option<PathBuf>,
    },
    /// Load and validate a runtime configuration file.
    CheckConfig { config: PathBuf },
}

#[derive(Serialize)]
struct JsonOut<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct RankedRecord {
    tier: SourceTier,
    source_id: String,
    doc_id: String,
    chunk_id: String,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            payload,
            mode,
            evidence,
            strict_citations,
        } => {
            let raw = fs::read_to_string(&payload)
                .with_context(|| format!("failed to read payload {}", payload.display()))?;
            let records = match evidence {
                Some(path) => load_records(&path)?,
                None => Vec::new(),
            };
            let policy = if strict_citations {
                CitationPolicy::Strict
            } else {
                CitationPolicy::Off
            };

            let outcome = validate(&raw, mode, &records, policy);
            if cli.json {
                print_json(outcome.is_valid, &outcome)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            if !outcome.is_valid {
                tracing::info!(mode = %mode, errors = ?outcome.errors, "Payload rejected");
            }

            Ok(if outcome.is_valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Rank { records, registry } => {
            let registry = match registry {
                Some(path) => TierRegistry::from_yaml_file(&path)
                    .with_context(|| format!("failed to load registry {}", path.display()))?,
                None => TierRegistry::legal_default(),
            };
            let ranked = rank(load_records(&records)?, &registry);

            if cli.json {
                print_json(true, &ranked)?;
            } else {
                for (i, record) in ranked.iter().enumerate() {
                    println!(
                        "{:>3}. [{}] {} {} {}",
                        i + 1,
                        record.tier,
                        record.source_id,
                        record.doc_id,
                        record.chunk_id
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { config } => {
            let loaded = RuntimeConfig::from_file(&config)
                .with_context(|| format!("invalid config {}", config.display()))?;

            if cli.json {
                print_json(true, &loaded)?;
            } else {
                println!("ok: {}", config.display());
                println!("  max_attempts: {}", loaded.retry.max_attempts);
                println!("  idle_timeout: {:?}", loaded.relay.idle_timeout);
                println!("  citation_policy: {:?}", loaded.citation_policy);
                println!("  model: {}", loaded.completion.model);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_records(path: &Path) -> anyhow::Result<Vec<EvidenceRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read records {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid evidence records in {}", path.display()))
}

/// Parse then validate. Malformed output is an ordinary rejection.
fn validate(raw: &str, mode: Mode, evidence: &[EvidenceRecord], policy: CitationPolicy) -> ValidationOutcome {
    let validator = AnswerValidator::new().with_citation_policy(policy);
    match validator.parse(raw) {
        Ok(payload) => validator.validate_against(&payload, mode, evidence),
        Err(e) => {
            tracing::debug!(error = %e, "Payload is malformed");
            ValidationOutcome::malformed(&e)
        }
    }
}

fn rank(records: Vec<EvidenceRecord>, registry: &TierRegistry) -> Vec<RankedRecord> {
    registry
        .rank(records)
        .into_iter()
        .map(|record| RankedRecord {
            tier: registry.tier_of(&record.source_id),
            source_id: record.source_id,
            doc_id: record.doc_id,
            chunk_id: record.chunk_id,
        })
        .collect()
}

fn print_json<T: Serialize>(ok: bool, data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&JsonOut { ok, data })?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE_LEAK: &str = r#"{
        "mode": "ASSIST", "missing_grounds": false,
        "answer_text": "Svar. INTERN-ANTECKNING",
        "sources": [], "unsourced_facts": [], "internal_note": "INTERN-ANTECKNING"
    }"#;

    #[test]
    fn test_cli_parses_validate() {
        let cli = Cli::try_parse_from([
            "lagvakt",
            "validate",
            "answer.json",
            "--mode",
            "assist",
            "--strict-citations",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Validate {
                mode, strict_citations, ..
            } => {
                assert_eq!(mode, Mode::Assist);
                assert!(strict_citations);
            }
            other => panic!("Expected Validate, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["lagvakt", "validate", "a.json", "--mode", "creative"]).is_err());
    }

    #[test]
    fn test_cli_parses_check_config() {
        let cli = Cli::try_parse_from(["lagvakt", "check-config", "lagvakt.yaml", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::CheckConfig { config } => assert_eq!(config, PathBuf::from("lagvakt.yaml")),
            other => panic!("Expected CheckConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_output_never_contains_note() {
        let outcome = validate(NOTE_LEAK, Mode::Assist, &[], CitationPolicy::Off);
        assert!(outcome.is_valid);

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("INTERN-ANTECKNING"));
    }

    #[test]
    fn test_validate_malformed_is_rejection() {
        let outcome = validate("Here is the answer: {", Mode::Evidence, &[], CitationPolicy::Off);
        assert!(!outcome.is_valid);
        assert!(outcome.sanitized_payload.is_none());
    }

    #[test]
    fn test_rank_orders_by_tier() {
        let records = vec![
            EvidenceRecord::new("doktrin", "Holmberg 2012", "c1", "..."),
            EvidenceRecord::new("okand_blogg", "post-1", "c1", "..."),
            EvidenceRecord::new("sfs", "SFS 1974:152", "c1", "..."),
            EvidenceRecord::new("proposition", "prop. 1973:90", "c1", "..."),
        ];
        let ranked = rank(records, &TierRegistry::legal_default());

        let tiers: Vec<SourceTier> = ranked.iter().map(|r| r.tier).collect();
        assert_eq!(tiers, vec![SourceTier::A, SourceTier::B, SourceTier::C, SourceTier::C]);
        // Stable among equals.
        assert_eq!(ranked[2].source_id, "doktrin");
        assert_eq!(ranked[3].source_id, "okand_blogg");
    }
}
