//! Table rendering of worker statistics.
//!
//! Renders one [`WorkerStats`] per worker as a formatted ASCII table using
//! the `tabled` crate - handy for controller dashboards and load-test
//! drivers watching a fleet of slices converge.
//!
//! # Feature Flag
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! sommatori = { version = "0.2", features = ["table"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sommatori::report::{StatsReport, TableStyle};
//!
//! let report = StatsReport::new().with_style(TableStyle::Rounded);
//! println!("{}", report.render([("w0", &stats0), ("w1", &stats1)].into_iter()));
//! // ╭────────┬────────────┬────────┬────────┬────────╮
//! // │ Worker │ Aggregated │ Rounds │ Capped │ Splits │
//! // ├────────┼────────────┼────────┼────────┼────────┤
//! // │ w0     │ 1200       │ 12     │ 3      │ 11     │
//! // │ w1     │ 880        │ 9      │ 0      │ 8      │
//! // ╰────────┴────────────┴────────┴────────┴────────╯
//! ```

use tabled::{builder::Builder, settings::Style, Table};

use crate::stats::WorkerStats;

/// Available table styles for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// GitHub-flavored Markdown table
    Markdown,
    /// No borders, just spacing
    Blank,
}

/// Renders per-worker statistics as a table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsReport {
    style: TableStyle,
}

impl StatsReport {
    /// Creates a report with the default [`TableStyle::Rounded`] style.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.style = style;
        self
    }

    /// Renders one row per `(worker name, stats)` pair.
    pub fn render<'a>(&self, stats: impl Iterator<Item = (&'a str, &'a WorkerStats)>) -> String {
        let mut builder = Builder::default();
        builder.push_record(["Worker", "Aggregated", "Rounds", "Capped", "Splits"]);
        for (name, stats) in stats {
            builder.push_record([
                name.to_string(),
                stats.shards_aggregated.to_string(),
                stats.rounds.to_string(),
                stats.rounds_capped.to_string(),
                stats.splits.len().to_string(),
            ]);
        }

        let mut table = builder.build();
        self.apply_style(&mut table);
        table.to_string()
    }

    fn apply_style(&self, table: &mut Table) {
        match self.style {
            TableStyle::Ascii => {
                table.with(Style::ascii());
            }
            TableStyle::Rounded => {
                table.with(Style::rounded());
            }
            TableStyle::Sharp => {
                table.with(Style::sharp());
            }
            TableStyle::Markdown => {
                table.with(Style::markdown());
            }
            TableStyle::Blank => {
                table.with(Style::blank());
            }
        }
    }
}
