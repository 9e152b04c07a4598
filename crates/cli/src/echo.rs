use owo_colors::OwoColorize;
use studydeck_core::{BatchReport, ImportReport};

use crate::VERSION;

/// Print a styled banner for verbose mode
pub fn print_banner() {
    eprintln!("\n{} {} {}", "studydeck".bold().bright_blue(), "v".dimmed(), VERSION.dimmed());
    eprintln!("{}", "Lesson pages to annotated flashcards\n".dimmed());
}

/// Print a styled step message
pub fn print_step(step: usize, total: usize, message: &str) {
    eprintln!("{} {}", format!("[{}/{}]", step, total).dimmed(), message.bright_cyan());
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message.bright_green());
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message.bright_blue());
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.bright_yellow());
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.bright_red());
}

/// Print the outcome counts of a stage and every failed id
pub fn print_report(stage: &str, report: &BatchReport) {
    eprintln!("\n{}", "═".repeat(60).dimmed());
    eprintln!("{}", stage.bold().cyan());
    eprintln!("{}", "═".repeat(60).dimmed());
    eprintln!("  {} {}", "Committed:".dimmed(), report.committed.len().to_string().bright_white());
    eprintln!("  {} {}", "Skipped:".dimmed(), report.skipped.len().to_string().bright_white());

    if report.is_success() {
        eprintln!("  {} {}\n", "Failed:".dimmed(), "0".bright_white());
        return;
    }

    eprintln!("  {} {}", "Failed:".dimmed(), report.failed.len().to_string().bright_red());
    for (id, reason) in &report.failed {
        eprintln!("    {} {}", id.bright_red(), reason.dimmed());
    }
    eprintln!();
}

/// Print note counts on top of the item report
pub fn print_import_report(report: &ImportReport) {
    print_report("Import", &report.items);
    eprintln!("  {} {}", "Notes added:".dimmed(), report.notes_added.to_string().bright_white());
    eprintln!("  {} {}\n", "Already present:".dimmed(), report.duplicates.to_string().bright_white());
}
