pub mod types;

pub use types::{CategoryCounts, ListReport};

use crate::orchestrator::Aggregate;
use crate::pr::{Comment, CommentSide, Diff, LineKind, Mergeability, PrCategory, PullRequest};
use crate::review::{CleanupStatus, ReviewError, Submitted};
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build the list view from an aggregated listing.
pub fn build(aggregate: Aggregate) -> ListReport {
    let mut counts = CategoryCounts::default();
    for pr in &aggregate.pull_requests {
        counts.add(pr.category);
    }

    ListReport {
        total: aggregate.pull_requests.len(),
        counts,
        groups: aggregate.groups,
        failures: aggregate.failures,
    }
}

/// Output the list to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(total = report.total, failures = report.failures.len()))]
pub fn output(report: &ListReport, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing list to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing list to file");
            write_markdown_report(report, path)
        }
    }
}

fn print_terminal_report(report: &ListReport) {
    println!();
    println!(
        "{} open pull request(s) | {} authored | {} assigned | {} other",
        report.total, report.counts.authored, report.counts.assigned, report.counts.other
    );
    println!();

    for group in &report.groups {
        let primary = if group.primary { " (primary)" } else { "" };
        println!(
            "═══ {} [{}] as {}{} ═══",
            group.credential_name.bold(),
            group.provider,
            group.username,
            primary
        );
        if group.pull_requests.is_empty() {
            println!("  No open pull requests.");
        }
        for pr in &group.pull_requests {
            println!(
                "  {} {} {}",
                colorize_category(pr.category),
                pr.id.to_string().cyan(),
                pr.title
            );
            println!("      by {} | updated {}", pr.author, pr.updated_at.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }

    if !report.failures.is_empty() {
        println!("{}", "═══ Unavailable credentials ═══".red().bold());
        for failure in &report.failures {
            println!("  • {}: {}", failure.credential_name, failure.error);
        }
        println!();
    }
}

fn write_markdown_report(report: &ListReport, path: &Path) -> Result<(), ReportError> {
    std::fs::write(path, render_markdown(report))?;
    Ok(())
}

fn render_markdown(report: &ListReport) -> String {
    let mut md = String::new();
    md.push_str("# Open pull requests\n\n");
    md.push_str(&format!(
        "**Total:** {} | **Authored:** {} | **Assigned:** {} | **Other:** {}\n\n",
        report.total, report.counts.authored, report.counts.assigned, report.counts.other
    ));

    for group in &report.groups {
        let primary = if group.primary { " (primary)" } else { "" };
        md.push_str(&format!(
            "## {} ({} as `{}`){}\n\n",
            group.credential_name, group.provider, group.username, primary
        ));
        if group.pull_requests.is_empty() {
            md.push_str("No open pull requests.\n\n");
            continue;
        }
        for pr in &group.pull_requests {
            md.push_str(&format!(
                "- **[{}]** [{}]({}) {} by {}\n",
                category_label(pr.category),
                pr.id,
                pr.url,
                pr.title,
                pr.author
            ));
        }
        md.push('\n');
    }

    if !report.failures.is_empty() {
        md.push_str("## Unavailable credentials\n\n");
        for failure in &report.failures {
            md.push_str(&format!("- **{}:** {}\n", failure.credential_name, failure.error));
        }
    }

    md
}

/// Print a single pull request's metadata.
pub fn print_pull_request(pr: &PullRequest) {
    println!();
    println!("{}: \"{}\"", pr.id.to_string().cyan(), pr.title.bold());
    println!(
        "Author: {} | {} → {} | Status: {} | {}",
        pr.author,
        pr.source_branch,
        pr.target_branch,
        pr.status,
        colorize_mergeability(pr.mergeable)
    );
    if let Some(name) = &pr.credential_name {
        println!("Fetched with: {}", name);
    }
    println!("{}", pr.url);
    if !pr.description.trim().is_empty() {
        println!();
        println!("{}", pr.description.trim());
    }
    println!();
}

/// Print a parsed diff with per-file stats and colored lines.
pub fn print_diff(diff: &Diff) {
    if diff.is_empty() {
        println!("No changes.");
        return;
    }

    for file in &diff.files {
        let marker = if file.is_new {
            " (new)"
        } else if file.is_deleted {
            " (deleted)"
        } else {
            ""
        };
        println!(
            "═══ {}{} {} {} ═══",
            file.path().bold(),
            marker,
            format!("+{}", file.additions()).green(),
            format!("-{}", file.deletions()).red()
        );
        for hunk in &file.hunks {
            println!("{}", hunk.header.cyan());
            for line in &hunk.lines {
                match line.kind {
                    LineKind::Add => println!("{}", format!("+{}", line.content).green()),
                    LineKind::Delete => println!("{}", format!("-{}", line.content).red()),
                    LineKind::Context => println!(" {}", line.content),
                }
            }
        }
        println!();
    }
}

/// Print the comments on a pull request, general ones first.
pub fn print_comments(comments: &[Comment]) {
    if comments.is_empty() {
        println!("No comments.");
        return;
    }

    let (general, inline): (Vec<&Comment>, Vec<&Comment>) =
        comments.iter().partition(|c| c.path.is_none());
    for comment in general.into_iter().chain(inline) {
        println!(
            "{} {}{}",
            comment.author.bold(),
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment_location(comment)
        );
        for line in comment.body.lines() {
            println!("  {}", line);
        }
        println!();
    }
}

fn comment_location(comment: &Comment) -> String {
    match (&comment.path, comment.line) {
        (Some(path), Some(line)) => {
            let side = match comment.side {
                CommentSide::Left => " (old)",
                CommentSide::Right => "",
            };
            format!(" on {}:{}{}", path, line, side)
        }
        (Some(path), None) => format!(" on {}", path),
        _ => String::new(),
    }
}

/// Print the outcome of a successful review submission.
pub fn print_submission(submitted: &Submitted) {
    if submitted.downgraded {
        println!(
            "{} You authored this pull request, so the review was posted as a comment.",
            "note:".yellow().bold()
        );
    }
    println!("{} Review submitted ({}).", "✓".green().bold(), submitted.action);
}

/// Print a failed review submission, making clear what was left behind.
pub fn print_review_failure(error: &ReviewError) {
    eprintln!("{} {}", "error:".red().bold(), error);
    if !error.needs_manual_cleanup() {
        return;
    }
    if let ReviewError::PartiallyApplied {
        cleanup: CleanupStatus::Failed { remaining, errors, .. },
        ..
    } = error
    {
        eprintln!(
            "{} {} comment thread(s) remain on the pull request:",
            "warning:".yellow().bold(),
            remaining
        );
        for error in errors {
            eprintln!("  • {}", error);
        }
    }
}

fn category_label(category: PrCategory) -> &'static str {
    match category {
        PrCategory::Authored => "AUTHORED",
        PrCategory::Assigned => "ASSIGNED",
        PrCategory::Other => "OTHER",
    }
}

fn colorize_category(category: PrCategory) -> colored::ColoredString {
    match category {
        PrCategory::Authored => category_label(category).blue().bold(),
        PrCategory::Assigned => category_label(category).yellow().bold(),
        PrCategory::Other => category_label(category).dimmed(),
    }
}

fn colorize_mergeability(mergeable: Mergeability) -> colored::ColoredString {
    match mergeable {
        Mergeability::Mergeable => "mergeable".green(),
        Mergeability::Conflicting => "conflicts".red().bold(),
        Mergeability::Unknown => "mergeability unknown".dimmed(),
    }
}
