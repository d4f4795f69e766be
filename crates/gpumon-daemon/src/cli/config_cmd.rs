use super::commands::{ConfigAction, OutputFormat};
use super::utils::{is_json, print_json};
use gpumon_daemon::DaemonConfig;
use gpumon_types::{GpumonError, GpumonResult};
use std::path::Path;

pub fn handle_config(
    config_path: &Path,
    action: Option<ConfigAction>,
    format: &OutputFormat,
) -> GpumonResult<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let config = DaemonConfig::load(config_path)?;
            if is_json(format) {
                print_json(&config)?;
            } else {
                println!("# {}", config_path.display());
                print!("{}", config.to_toml()?);
            }
        }
        Some(ConfigAction::Validate) => {
            if !config_path.exists() {
                println!("No configuration file found at {:?} (defaults apply)", config_path);
            }
            match DaemonConfig::load(config_path) {
                Ok(_) => println!("[+] Configuration is valid"),
                Err(e) => {
                    println!("[-] {}", e);
                    return Err(e);
                }
            }
        }
        Some(ConfigAction::Init { force }) => {
            if config_path.exists() && !force {
                return Err(GpumonError::Config(format!(
                    "{:?} already exists (use --force to overwrite)",
                    config_path
                )));
            }
            DaemonConfig::default().save(config_path)?;
            println!("[+] Wrote default configuration to {:?}", config_path);
        }
        Some(ConfigAction::Path) => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
