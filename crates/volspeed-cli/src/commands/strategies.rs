//! Strategies command - lists the read strategies and which one `auto` picks

use anyhow::Result;
use console::style;
use serde::Serialize;
use volspeed_core::StrategyKind;
use volspeed_platform::has_elevated_privileges;

/// One row of the strategy listing
#[derive(Debug, Serialize)]
struct StrategyInfo {
    name: &'static str,
    description: &'static str,
    available: bool,
    selected: bool,
}

#[derive(Debug, Serialize)]
struct StrategyReport {
    selected: StrategyKind,
    elevated: bool,
    strategies: Vec<StrategyInfo>,
}

/// Execute the strategies command
pub fn execute(json: bool, silent: bool) -> Result<()> {
    let report = collect();

    if json {
        let json_output = serde_json::to_string_pretty(&report)?;
        println!("{}", json_output);
        return Ok(());
    }

    println_if!(silent, "{}", style("Read strategies").bold());
    println_if!(silent);

    for info in &report.strategies {
        let marker = if info.selected {
            style("▶").cyan().to_string()
        } else if info.available {
            style("✓").green().to_string()
        } else {
            style("✗").dim().to_string()
        };
        let name = format!("{:<9}", info.name);
        let name = if info.available {
            style(name).bold().to_string()
        } else {
            style(name).dim().to_string()
        };
        println_if!(silent, "  {} {} {}", marker, name, info.description);
    }

    println_if!(silent);
    println_if!(
        silent,
        "  {} {}",
        style("auto selects:").dim(),
        style(report.selected).cyan()
    );

    if report.selected == StrategyKind::NoCache && !report.elevated {
        println_if!(
            silent,
            "  {} {}",
            style("⚠").yellow(),
            style("Not elevated: the system cache purge will fail and reads may be approximate")
                .yellow()
        );
    }

    Ok(())
}

fn collect() -> StrategyReport {
    let selected = StrategyKind::detect();
    let strategies = StrategyKind::ALL
        .into_iter()
        .map(|kind| StrategyInfo {
            name: kind.as_str(),
            description: kind.description(),
            available: kind.is_available(),
            selected: kind == selected,
        })
        .collect();

    StrategyReport {
        selected,
        elevated: has_elevated_privileges(),
        strategies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_lists_every_strategy() {
        let report = collect();
        assert_eq!(report.strategies.len(), StrategyKind::ALL.len());
        assert_eq!(report.strategies.iter().filter(|s| s.selected).count(), 1);
    }

    #[test]
    fn test_selected_is_available() {
        let report = collect();
        let selected = report
            .strategies
            .iter()
            .find(|s| s.selected)
            .unwrap();
        assert!(selected.available);
        assert_eq!(selected.name, report.selected.as_str());
    }

    #[test]
    fn test_buffered_always_available() {
        let report = collect();
        let buffered = report
            .strategies
            .iter()
            .find(|s| s.name == "buffered")
            .unwrap();
        assert!(buffered.available);
    }

    #[test]
    fn test_execute_silent() {
        execute(false, true).unwrap();
    }
}
