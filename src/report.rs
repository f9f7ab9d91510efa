//! Terminal rendering of reconciliation reports.

use colored::Colorize;
use reconcile::Report;

/// Print one report: sectioned comment log, changes, final result.
pub fn display_report(report: &Report) {
    println!();
    println!("{}", report.name.bold());

    for line in report.comment.lines() {
        if line.starts_with("======") {
            println!("  {}", line.bold());
        } else if line.starts_with("[SKIP]") {
            println!("  {}", line.dimmed());
        } else {
            println!("  {line}");
        }
    }

    if !report.changes.is_empty() {
        println!();
        println!("  {}", "Changes:".bold());
        for (step, entries) in &report.changes {
            for (key, change) in entries {
                println!(
                    "  {} {}.{}: {} {} {}",
                    "~".yellow(),
                    step,
                    key,
                    format_value(&change.old).dimmed(),
                    "->".dimmed(),
                    format_value(&change.new)
                );
            }
        }
    }

    let verdict = match report.result {
        Some(true) => "ok".green().to_string(),
        Some(false) => "failed".red().to_string(),
        None => "unknown (dry run)".yellow().to_string(),
    };
    println!();
    println!("  Result: {verdict}");
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "none".to_string(),
        other => other.to_string(),
    }
}
