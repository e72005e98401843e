use crate::cache::CacheStats;
use crate::rendering::DocumentResult;
use crate::transform::TransformStats;
use anyhow::Result;
use chrono::Local;
use std::time::Duration;

/// Formats a message with mdBook-style timestamp, level and prefix.
fn format_line(level: &str, message: &str) -> String {
    format!(
        "{} [{}] (mdbook_pytabs): {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        message
    )
}

/// Reports fragments that stopped the build to stderr with mdBook-style
/// formatting.
///
/// # Errors
///
/// Returns an error after printing all failures (to stop the build).
pub fn report_failures(failed_results: &[&DocumentResult]) -> Result<()> {
    for result in failed_results {
        let Some(error) = result.error() else {
            continue;
        };
        eprintln!("{}", format_line("ERROR", "Upgrade failed"));
        eprintln!(
            "{}",
            format_line("ERROR", &format!("File: {}", result.path().display()))
        );
        for line in error.to_string().lines() {
            eprintln!("{}", format_line("ERROR", line));
        }
        eprintln!("{}", format_line("ERROR", ""));
    }

    eprintln!(
        "{}",
        format_line("ERROR", "Failed to upgrade code in the following files:")
    );
    for result in failed_results {
        eprintln!(
            "{}",
            format_line("ERROR", &format!("  {}", result.path().display()))
        );
    }

    anyhow::bail!(
        "Upgrading code failed in {} file(s); set on_upgrade_failure = \"warn\" to keep the original blocks",
        failed_results.len()
    );
}

/// Prints fragment-level warnings collected while transforming.
pub fn report_diagnostics(results: &[DocumentResult]) {
    for result in results {
        let Some(transformed) = result.transformed() else {
            continue;
        };
        for diagnostic in &transformed.diagnostics {
            eprintln!(
                "{}",
                format_line(
                    "WARN",
                    &format!("{}:{}", result.path().display(), diagnostic)
                )
            );
        }
    }
}

/// Prints the build summary to stderr.
///
/// Shows:
/// - Fragments seen and how many became tab sets
/// - Cache hits and oracle invocations
/// - Total time and the slowest documents (RUST_LOG=debug)
pub fn print_summary(
    stats: &TransformStats,
    cache: Option<CacheStats>,
    results: &[DocumentResult],
    parallel_duration: Duration,
) {
    if stats.fragments == 0 {
        eprintln!("{}", format_line("INFO", "No Python code blocks found to upgrade"));
        return;
    }

    eprintln!(
        "{}",
        format_line(
            "INFO",
            &format!(
                "Processed {} code block(s) in {} document(s): {} rendered, {} tabbed, {} failed",
                stats.fragments,
                results.len(),
                stats.rendered,
                stats.tabbed,
                stats.failed
            )
        )
    );

    let cache_str = match cache {
        Some(cache) => format!(
            "{} cache hit(s), {} cached block(s)",
            cache.hits, cache.entries
        ),
        None => "cache disabled".to_string(),
    };
    eprintln!(
        "{}",
        format_line(
            "INFO",
            &format!(
                "Preprocessor finished in {}ms ({} upgrader call(s), {})",
                parallel_duration.as_millis(),
                stats.oracle_calls,
                cache_str
            )
        )
    );

    log::debug!("Individual document timings:");
    for result in results {
        log::debug!(
            "[PYTABS_TIME] {}: {}ms",
            result.path().display(),
            result.duration().as_millis()
        );
    }
}
