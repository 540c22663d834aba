use std::env;
use std::fmt::Write as FmtWrite;

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use vastlens_core::analyzer::ParameterVerdict;
use vastlens_core::fetch::{FetchCache, VastResponse};
use vastlens_core::{
    AnalyzerOptions, ImplementationType, Inspection, TagType, catalog, example_url, inspect,
};

const APP_NAME: &str = "vastlens";
const VERSION: &str = env!("CARGO_PKG_VERSION");

struct CliOptions {
    url: String,
    implementation: ImplementationType,
    tag_type: Option<TagType>,
    ip_via_http_header: bool,
    json: bool,
    fetch_response: bool,
    force_refresh: bool,
}

enum CliCommand {
    Run(CliOptions),
    Help,
    Version,
}

fn parse_arguments(args: &[String]) -> Result<CliCommand> {
    if args.is_empty() {
        return Ok(CliCommand::Help);
    }

    let mut url: Option<String> = None;
    let mut implementation = ImplementationType::Web;
    let mut tag_type: Option<TagType> = None;
    let mut ip_via_http_header = false;
    let mut json = false;
    let mut fetch_response = false;
    let mut force_refresh = false;
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        if matches!(arg.as_str(), "-h" | "--help") {
            return Ok(CliCommand::Help);
        }

        if matches!(arg.as_str(), "-v" | "--version") {
            return Ok(CliCommand::Version);
        }

        if matches!(arg.as_str(), "-i" | "--implementation") {
            let value = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--implementation requires a value"))?;
            implementation = ImplementationType::from_label(value).ok_or_else(|| {
                anyhow!("unknown implementation `{value}` (web, mobileApp, connectedTV, audio, digitalOutOfHome)")
            })?;
            i += 2;
            continue;
        }

        if matches!(arg.as_str(), "-t" | "--tag-type") {
            let value = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--tag-type requires a value"))?;
            tag_type = Some(TagType::from_label(value).ok_or_else(|| {
                anyhow!("unknown tag type `{value}` (standard, pal, pal-legacy, pai, pai-pal, ima-sdk)")
            })?);
            i += 2;
            continue;
        }

        if matches!(arg.as_str(), "-e" | "--example") {
            let value = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--example requires a tag type"))?;
            let example_type = TagType::from_label(value)
                .ok_or_else(|| anyhow!("unknown tag type `{value}`"))?;
            let example = example_url(example_type)
                .ok_or_else(|| anyhow!("no example tag available for `{example_type}`"))?;
            if url.is_some() {
                return Err(anyhow!("both a URL and --example supplied"));
            }
            url = Some(example.to_string());
            i += 2;
            continue;
        }

        if arg == "--ip-via-http-header" {
            ip_via_http_header = true;
            i += 1;
            continue;
        }

        if matches!(arg.as_str(), "-j" | "--json") {
            json = true;
            i += 1;
            continue;
        }

        if matches!(arg.as_str(), "-f" | "--fetch") {
            fetch_response = true;
            i += 1;
            continue;
        }

        if arg == "--force-refresh" {
            fetch_response = true;
            force_refresh = true;
            i += 1;
            continue;
        }

        if arg.starts_with('-') {
            return Err(anyhow!("unknown option `{arg}`"));
        }

        if url.is_some() {
            return Err(anyhow!("multiple URLs supplied"));
        }
        url = Some(arg.clone());
        i += 1;
    }

    let url = url.ok_or_else(|| anyhow!("no VAST tag URL supplied"))?;

    Ok(CliCommand::Run(CliOptions {
        url,
        implementation,
        tag_type,
        ip_via_http_header,
        json,
        fetch_response,
        force_refresh,
    }))
}

fn print_help() {
    println!("{APP_NAME} — VAST redirect signal inspector");
    println!("Usage: {APP_NAME} [OPTIONS] <TAG_URL>\n");
    println!("Options:");
    println!("  -i, --implementation <CTX>  Implementation context (default: web)");
    println!("  -t, --tag-type <TYPE>       Override the detected tag type");
    println!("  -e, --example <TYPE>        Inspect a built-in example tag instead of a URL");
    println!("      --ip-via-http-header    The viewer IP is sent via HTTP header, not `ip`");
    println!("  -f, --fetch                 Fetch and attach the VAST response body");
    println!("      --force-refresh         Fetch, bypassing the response cache");
    println!("  -j, --json                  Emit the full inspection as JSON");
    println!("  -v, --version               Show version information");
    println!("  -h, --help                  Show this help message");
}

fn print_version() {
    println!("{APP_NAME} {VERSION} (rules {})", vastlens_core::CATALOG_VERSION);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let raw_args = env::args().skip(1).collect::<Vec<_>>();
    match parse_arguments(&raw_args)? {
        CliCommand::Help => print_help(),
        CliCommand::Version => print_version(),
        CliCommand::Run(options) => run(options).await?,
    }
    Ok(())
}

async fn run(options: CliOptions) -> Result<()> {
    let analyzer_options = AnalyzerOptions {
        ip_via_http_header: options.ip_via_http_header,
    };
    let inspection = inspect(
        &options.url,
        options.implementation,
        options.tag_type,
        &analyzer_options,
    )?;

    let response = if options.fetch_response {
        FetchCache::new()
            .fetch(&options.url, options.force_refresh)
            .await
    } else {
        None
    };

    if options.json {
        let mut value = serde_json::to_value(&inspection)?;
        if let Some(response) = &response {
            value["response"] = serde_json::json!({
                "status": response.status,
                "content_type": response.content_type,
                "body": response.body,
            });
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print!("{}", render_report(&inspection, response.as_ref()));
    Ok(())
}

const DIVIDER: &str = "─────────────────────────────────────────────────────────────";
const LABEL_WIDTH: usize = 16;

fn push_section_header(buf: &mut String, icon: &str, title: &str) {
    let _ = writeln!(buf, "{DIVIDER}");
    let _ = writeln!(buf, "{icon} {title}");
    let _ = writeln!(buf, "{DIVIDER}");
}

fn push_key_value(buf: &mut String, label: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let _ = writeln!(buf, "• {:<width$} : {}", label, value, width = LABEL_WIDTH);
}

fn render_report(inspection: &Inspection, response: Option<&VastResponse>) -> String {
    let mut output = String::new();

    push_section_header(&mut output, "📡", "VAST Tag");
    push_key_value(&mut output, "URL", &inspection.url);
    push_key_value(&mut output, "Tag type", &inspection.tag_type.to_string());
    push_key_value(
        &mut output,
        "Implementation",
        &inspection.implementation.to_string(),
    );
    output.push('\n');

    if !inspection.warnings.is_empty() || !inspection.structured_errors().is_empty() {
        push_section_header(&mut output, "⚠️", "Findings");
        for warning in &inspection.warnings {
            let _ = writeln!(output, "• {warning}");
        }
        for error in inspection.structured_errors() {
            let _ = writeln!(output, "• {error}");
        }
        output.push('\n');
    }

    push_section_header(&mut output, "🔎", "Parameters");
    push_bucket(&mut output, "Required", &inspection.analysis.required);
    push_bucket(
        &mut output,
        "Programmatic required",
        &inspection.analysis.programmatic_required,
    );
    push_bucket(
        &mut output,
        "Programmatic recommended",
        &inspection.analysis.programmatic_recommended,
    );
    push_bucket(&mut output, "Other", &inspection.analysis.other);

    push_section_header(&mut output, "🧮", "Score");
    push_key_value(
        &mut output,
        "Weighted",
        &format!("{}%", inspection.score.weighted),
    );
    push_key_value(
        &mut output,
        "Required",
        &format!("{}%", inspection.score.required.completion),
    );
    push_key_value(
        &mut output,
        "Prog. required",
        &format!("{}%", inspection.score.programmatic_required.completion),
    );
    push_key_value(
        &mut output,
        "Prog. recommended",
        &format!("{}%", inspection.score.programmatic_recommended.completion),
    );

    if let Some(response) = response {
        output.push('\n');
        push_section_header(&mut output, "📦", "VAST Response");
        push_key_value(&mut output, "Status", &response.status.to_string());
        if let Some(content_type) = &response.content_type {
            push_key_value(&mut output, "Content type", content_type);
        }
        output.push('\n');
        output.push_str(&response.body);
        if !response.body.ends_with('\n') {
            output.push('\n');
        }
    }

    output
}

fn push_bucket(
    buf: &mut String,
    title: &str,
    bucket: &std::collections::BTreeMap<String, ParameterVerdict>,
) {
    if bucket.is_empty() {
        return;
    }
    let _ = writeln!(buf, "{title}:");
    for verdict in bucket.values() {
        let marker = if verdict.valid {
            "✓"
        } else if verdict.exists {
            "✗"
        } else {
            "∅"
        };
        let value = verdict.value.as_deref().unwrap_or("<missing>");
        let mut notes = Vec::new();
        if let Some(alias) = &verdict.alias {
            notes.push(format!("via {alias}"));
        }
        if verdict.overridden {
            notes.push("override".to_string());
        }
        if verdict.sdk_managed {
            notes.push("sdk-managed".to_string());
        }
        if verdict.accepted {
            notes.push("accepted".to_string());
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", "))
        };
        let _ = writeln!(
            buf,
            "  {marker} {:<24} {value} ({:+.1}){notes}",
            verdict.name, verdict.score
        );
        if let Some(warning) = &verdict.warning {
            let _ = writeln!(buf, "      ⚠ {warning}");
        }
        if verdict.sdk_managed {
            if let Some(info) = catalog().sdk_handling_info(&verdict.name) {
                let _ = writeln!(buf, "      ℹ {info}");
            }
        }
        if !verdict.valid {
            if let Some(help) = catalog().help(&verdict.name) {
                let _ = writeln!(buf, "      ↪ {help}");
            }
        }
    }
    buf.push('\n');
}
