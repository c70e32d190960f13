//! Config command handler

use hallar::HallarConfig;

use super::session::load_config;
use crate::commands::{ConfigArgs, ConfigSubcommand};
use crate::error::{CliError, CliResult};
use crate::output::Printer;

/// Execute the config command
pub fn execute_config(args: &ConfigArgs, printer: Printer) -> CliResult<()> {
    match &args.command {
        ConfigSubcommand::Init { output, force } => {
            let yaml = HallarConfig::default().to_yaml()?;
            match output {
                Some(path) => {
                    if path.exists() && !force {
                        return Err(CliError::invalid_argument(format!(
                            "{} already exists (use --force to overwrite)",
                            path.display()
                        )));
                    }
                    std::fs::write(path, yaml)?;
                    printer.success(&format!("wrote {}", path.display()));
                }
                None => printer.data(yaml.trim_end()),
            }
        }
        ConfigSubcommand::Show { config } => {
            let config = load_config(config.as_deref())?;
            printer.data(config.to_yaml()?.trim_end());
        }
    }
    Ok(())
}
