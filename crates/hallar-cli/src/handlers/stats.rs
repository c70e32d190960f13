//! Stats command handler

use hallar::RecognitionStatistics;

use crate::commands::{StatsArgs, StatsSubcommand};
use crate::error::CliResult;
use crate::output::{render_stats, Printer};

/// Execute the stats command
pub fn execute_stats(args: &StatsArgs, printer: Printer) -> CliResult<()> {
    match &args.command {
        StatsSubcommand::Show { file, json } => {
            let stats = RecognitionStatistics::load(file)?;
            if *json {
                printer.data(&serde_json::to_string_pretty(&stats)?);
            } else {
                printer.data(render_stats(&stats).trim_end());
            }
        }
        StatsSubcommand::Reset { file } => {
            let mut stats = RecognitionStatistics::load_or_default(file)?;
            stats.reset();
            stats.save(file)?;
            printer.success(&format!("statistics reset: {}", file.display()));
        }
    }
    Ok(())
}
