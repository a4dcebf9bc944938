use crate::cli::ExportConfigArgs;
use crate::config::{self, ConfigYaml};
use crate::exit_codes::ExitCode;
use crate::run_error::RunError;

pub async fn export_config(args: ExportConfigArgs) -> Result<ExitCode, RunError> {
    let mut cfg = config::load_config(args.config.as_deref())
        .await
        .map_err(RunError::InvalidInput)?;
    if let Some(base_url) = args.base_url {
        cfg.base_url = base_url;
    }

    config::write_yaml_file(&args.out, &ConfigYaml::from_resolved(&cfg))
        .await
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::Success)
}
