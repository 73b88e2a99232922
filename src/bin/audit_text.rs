use anyhow::{bail, Context};
use std::time::Duration;
use tesis_forensics::services::config_store::ConfigStore;
use tesis_forensics::services::detection::{
    detect_ai_content, detect_ai_content_batch_with_cancel, BatchOptions, LlmJudge,
};
use tesis_forensics::services::providers::{parse_provider, ProviderClient, ProviderKind, ProviderStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--chunk-size",
    "--delay-ms",
    "--provider",
    "--out",
    "--set-key",
    "--delete-key",
    "--set-url",
];

/// First argument that is neither a flag nor a flag's value.
fn positional_arg(args: &[String]) -> Option<String> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(arg.clone());
    }
    None
}

/// `provider=value`, with the provider name validated.
fn parse_assignment(raw: &str) -> anyhow::Result<(ProviderKind, String)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected <provider>=<value>, got {}", raw);
    };
    let Some(kind) = ProviderKind::parse(name) else {
        bail!("unknown provider: {}", name);
    };
    let value = value.trim();
    if value.is_empty() {
        bail!("empty value for provider {}", kind.name());
    }
    Ok((kind, value.to_string()))
}

/// Handle the config-editing flags. Returns true when one was given.
fn run_config_command(args: &[String]) -> anyhow::Result<bool> {
    let set_key = parse_arg_value(args, "--set-key");
    let delete_key = parse_arg_value(args, "--delete-key");
    let set_url = parse_arg_value(args, "--set-url");
    if set_key.is_none() && delete_key.is_none() && set_url.is_none() {
        return Ok(false);
    }

    let Some(store) = ConfigStore::default_store() else {
        bail!("no platform config directory available");
    };

    if let Some(raw) = set_key {
        let (kind, key) = parse_assignment(&raw)?;
        store.set_api_key(kind.name(), &key).context("could not store API key")?;
        eprintln!("Stored API key for {}", kind.name());
    }
    if let Some(name) = delete_key {
        let Some(kind) = ProviderKind::parse(&name) else {
            bail!("unknown provider: {}", name);
        };
        store.delete_api_key(kind.name()).context("could not delete API key")?;
        eprintln!("Deleted API key for {}", kind.name());
    }
    if let Some(raw) = set_url {
        let (kind, url) = parse_assignment(&raw)?;
        store.set_provider_url(kind.name(), &url).context("could not store provider URL")?;
        eprintln!("Base URL for {} set to {}", kind.name(), url);
    }
    eprintln!("Config: {}", store.config_file().display());
    Ok(true)
}

const USAGE: &str = "Usage:\n  audit_text <file.txt> [--single] [--chunk-size <chars>] [--delay-ms <ms>] [--provider <name[:model]>] [--no-fallback] [--out <json_path>]\n  audit_text [--set-key <provider>=<key>] [--delete-key <provider>] [--set-url <provider>=<url>]\n\nNotes:\n  - API keys come from GEMINI_API_KEY / GROQ_API_KEY or the config file.\n  - `--single` judges only the head of the text in one call.\n  - Progress goes to stderr; the JSON report goes to stdout unless --out is given.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || has_flag(&args, "--help") {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    tesis_forensics::init_logging();

    if run_config_command(&args)? {
        return Ok(());
    }

    let Some(path) = positional_arg(&args) else {
        eprintln!("{}", USAGE);
        bail!("missing input file");
    };
    let single = has_flag(&args, "--single");
    let out_path = parse_arg_value(&args, "--out");

    let text = std::fs::read_to_string(&path).with_context(|| format!("read file failed: {}", path))?;

    let store = ConfigStore::default_store();
    let config = match store.as_ref() {
        Some(s) => s.load().context("could not load configuration")?,
        None => Default::default(),
    };

    let mut options = BatchOptions::from(&config.detection);
    if let Some(n) = parse_arg_value(&args, "--chunk-size").and_then(|s| s.parse().ok()) {
        options = options.with_chunk_size(n);
    }
    if let Some(ms) = parse_arg_value(&args, "--delay-ms").and_then(|s| s.parse().ok()) {
        options = options.with_delay(Duration::from_millis(ms));
    }

    let mut strategy = ProviderStrategy::from_config(&config, store.as_ref());
    if let Some(provider_arg) = parse_arg_value(&args, "--provider") {
        let Some((kind, model)) = parse_provider(&provider_arg) else {
            bail!("unknown provider: {}", provider_arg);
        };
        let Some(mut route) = strategy.routes().iter().find(|r| r.kind == kind).cloned() else {
            bail!("provider {} is disabled in the configuration", kind.name());
        };
        if let Some(model) = model {
            route = route.with_model(model);
        }
        strategy = ProviderStrategy::single(route);
    }
    if has_flag(&args, "--no-fallback") {
        strategy = strategy.with_fallback(false);
    }

    let client = ProviderClient::from_config(&config).context("could not build HTTP client")?;
    let judge = LlmJudge::new(client, strategy).with_temperature(config.detection.temperature);

    eprintln!("File: {}", path);
    eprintln!("Chars: {}", text.chars().count());
    eprintln!("Mode: {}", if single { "single" } else { "batch" });
    eprintln!(
        "Providers: {}",
        judge
            .strategy()
            .routes()
            .iter()
            .map(|r| r.label())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let result = if single {
        detect_ai_content(&text, &judge, &options).await?
    } else {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current chunk");
                ctrl_c.cancel();
            }
        });
        detect_ai_content_batch_with_cancel(&text, &judge, &options, Some(&cancel), |p, msg| {
            eprintln!("[{:>3}%] {}", p, msg);
        })
        .await?
    };

    info!(
        score = result.score,
        category = %result.category,
        risk = result.metrics.ai_risk_score,
        "audit.finished"
    );

    let json = serde_json::to_string_pretty(&result)?;
    match out_path {
        Some(out) => {
            std::fs::write(&out, json).with_context(|| format!("write output failed: {}", out))?;
            eprintln!("Saved: {}", out);
        }
        None => println!("{}", json),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_positional_after_flags() {
        let args = argv(&["audit_text", "--single", "essay.txt"]);
        assert_eq!(positional_arg(&args).as_deref(), Some("essay.txt"));

        let args = argv(&["audit_text", "--provider", "groq", "--out", "r.json", "tesis.txt"]);
        assert_eq!(positional_arg(&args).as_deref(), Some("tesis.txt"));

        let args = argv(&["audit_text", "tesis.txt", "--chunk-size", "8000"]);
        assert_eq!(positional_arg(&args).as_deref(), Some("tesis.txt"));
    }

    #[test]
    fn test_flags_only_have_no_positional() {
        let args = argv(&["audit_text", "--single", "--delay-ms", "0"]);
        assert!(positional_arg(&args).is_none());
    }

    #[test]
    fn test_parse_assignment() {
        let (kind, key) = parse_assignment("groq=gsk_abc").unwrap();
        assert_eq!(kind, ProviderKind::Groq);
        assert_eq!(key, "gsk_abc");

        let (kind, url) = parse_assignment("gemini=http://localhost:8080/v1").unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
        assert_eq!(url, "http://localhost:8080/v1");

        assert!(parse_assignment("openai=sk").is_err());
        assert!(parse_assignment("groq").is_err());
        assert!(parse_assignment("groq=  ").is_err());
    }
}
