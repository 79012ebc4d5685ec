use crate::error::Result;
use crate::records::AverageRecord;
use crate::storage_utils::{DatasetStore, PipelineConfig};
use crate::timestamp::ExecutionTimestamp;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};

const HEADING: &str = "Displaying average difference between the 24 hour percent change of each coin \nand the 24 hour percent change of Bitcoin, across all executions.";

fn diff_color(diff: f64) -> Color {
    if diff >= 0.0 { Color::Green } else { Color::Red }
}

pub fn render_averages(averages: &[AverageRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("AvgBitcoinVsCurrency24hPercentChangeDiff")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    for average in averages {
        let symbol_cell = Cell::new(&average.symbol).fg(Color::Cyan);
        let diff_cell = match average.avg_bitcoin_vs_currency24h_percent_change_diff {
            Some(diff) => Cell::new(format!("{:.6}", diff)).fg(diff_color(diff)),
            None => Cell::new("N/A").fg(Color::DarkGrey),
        }
        .set_alignment(CellAlignment::Right);

        table.add_row(vec![symbol_cell, diff_cell]);
    }

    table
}

/// Prints this run's Average-Difference dataset.
pub async fn run(config: &PipelineConfig, timestamp: &ExecutionTimestamp) -> Result<()> {
    let averages: Vec<AverageRecord> = DatasetStore::new()
        .load(&config.avg_bitcoin_diff_path(timestamp))
        .await?;

    if averages.is_empty() {
        println!("No data found.");
        return Ok(());
    }

    println!("\n{}\n\n{}", HEADING, render_averages(&averages));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_row_per_symbol() {
        let averages = vec![
            AverageRecord {
                symbol: "XRP".into(),
                avg_bitcoin_vs_currency24h_percent_change_diff: Some(-3.0),
            },
            AverageRecord {
                symbol: "NEW".into(),
                avg_bitcoin_vs_currency24h_percent_change_diff: None,
            },
        ];

        let table = render_averages(&averages);

        assert_eq!(table.row_iter().count(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("XRP"));
        assert!(rendered.contains("-3.000000"));
        assert!(rendered.contains("N/A"));
    }
}
