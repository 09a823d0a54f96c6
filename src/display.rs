use std::path::Path;

use colored::Colorize;
use serde_json::{json, Value};

use crate::broker::{AuthMode, BrokerProfile};
use crate::config::PreviousArgs;

// Headings bold cyan, labels bold, aliases bright cyan, secondary text dimmed.
// The previous-args switch shows green when on and yellow when off.

/// Print a section heading.
pub fn heading(text: &str) {
    println!("{}", text.bold().cyan());
}

/// Print a blank separator line.
pub fn separator() {
    println!();
}

/// Format a label: value line (indented).
pub fn kv(label: &str, value: &str) {
    println!("  {} {}", format!("{}:", label).bold(), value);
}

/// Format a label: value line where the value is dimmed.
pub fn kv_dim(label: &str, value: &str) {
    println!("  {} {}", format!("{}:", label).bold(), value.dimmed());
}

/// Print a hint/footer line.
pub fn hint(text: &str) {
    println!("{}", text.dimmed());
}

/// Print a count summary line.
pub fn summary(count: usize, noun: &str) {
    let plural = if count == 1 { "" } else { "s" };
    println!("{}", format!("{} {}{}", count, noun, plural).dimmed());
}

// ── Brokers ──────────────────────────────────────────────────────────────────

pub fn auth_label(auth: &AuthMode) -> &'static str {
    match auth {
        AuthMode::Bearer { .. } => "bearer",
        AuthMode::Basic { .. } => "basic",
        AuthMode::Header { .. } => "header",
    }
}

/// Machine-readable profile. Credentials are reduced to their kind.
pub fn broker_json(profile: &BrokerProfile) -> Value {
    json!({
        "alias": profile.alias,
        "url": profile.url.as_str(),
        "ngsiType": profile.dialect.as_str(),
        "context": profile.context,
        "tenant": profile.tenant,
        "scope": profile.scope,
        "auth": profile.auth.as_ref().map(auth_label),
        "inherit": profile.inherit,
    })
}

pub fn print_broker(profile: &BrokerProfile) {
    println!("  {}", profile.alias.bright_cyan());
    kv("    URL", profile.url.as_str());
    kv("    NGSI type", profile.dialect.as_str());
    if let Some(ref context) = profile.context {
        kv("    Context", context);
    }
    if let Some(ref tenant) = profile.tenant {
        kv("    Tenant", tenant);
    }
    if let Some(ref scope) = profile.scope {
        kv("    Scope", scope);
    }
    if let Some(ref auth) = profile.auth {
        kv_dim("    Auth", auth_label(auth));
    }
    if let Some(ref inherit) = profile.inherit {
        kv_dim("    Inherits", inherit);
    }
}

pub fn print_broker_list(brokers: &[&BrokerProfile]) {
    if brokers.is_empty() {
        println!("{}", "No brokers found.".dimmed());
        return;
    }

    heading("Brokers");
    for (i, profile) in brokers.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_broker(profile);
    }
    separator();
    summary(brokers.len(), "broker");
    hint("Use --json for machine-readable output.");
}

// ── Contexts ─────────────────────────────────────────────────────────────────

pub fn print_context_list(contexts: &[(&str, &str)]) {
    if contexts.is_empty() {
        println!("{}", "No contexts found.".dimmed());
        return;
    }

    heading("Contexts");
    for (alias, uri) in contexts {
        println!("  {} {} {}", alias.bright_cyan(), "->".dimmed(), uri);
    }
    separator();
    summary(contexts.len(), "context");
}

// ── Settings ─────────────────────────────────────────────────────────────────

pub fn print_settings(args: &PreviousArgs, path: Option<&Path>) {
    heading("Previous arguments");
    let state = if args.use_previous_args {
        "on".green().to_string()
    } else {
        "off".yellow().to_string()
    };
    kv("Reuse", &state);
    for (label, value) in [
        ("Host", &args.host),
        ("Tenant", &args.tenant),
        ("Scope", &args.scope),
        ("Stderr", &args.stderr),
        ("Syslog", &args.syslog),
    ] {
        if let Some(value) = value {
            kv(label, value);
        }
    }

    separator();
    heading("Paths");
    match path {
        Some(path) => kv_dim("Config", &path.display().to_string()),
        None => kv_dim("Config", "in memory"),
    }
}
