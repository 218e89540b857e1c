//! 配置校验命令

use anyhow::{Context, Result};
use clap::Args;
use station_sdk::tools::{AcquisitionConfig, StationConfig};
use std::path::PathBuf;

/// 配置校验命令参数
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: PathBuf,
}

impl CheckCommand {
    pub fn execute(&self) -> Result<()> {
        let config = StationConfig::load_from_file(&self.config)
            .with_context(|| format!("invalid station config: {}", self.config.display()))?;

        println!("✅ {} is valid", self.config.display());
        println!("{}", summarize(&config));
        Ok(())
    }
}

/// 配置摘要（每个控制器一行）
pub fn summarize(config: &StationConfig) -> String {
    let mut lines = vec![format!(
        "station `{}`: {} controller(s), {} signal(s), {} pseudo channel(s)",
        config.name,
        config.controllers.len(),
        config.signals.len(),
        config.pseudo_channels.len()
    )];

    for controller in &config.controllers {
        let acquisition = match &controller.acquisition {
            AcquisitionConfig::Fixed { rate_hz } => format!("fixed {} Hz", rate_hz),
            AcquisitionConfig::Adaptive {
                min_rate_hz,
                max_rate_hz,
                ..
            } => format!("adaptive {}..{} Hz", min_rate_hz, max_rate_hz),
            AcquisitionConfig::Trigger { .. } => "trigger".to_string(),
        };
        lines.push(format!(
            "  - {}: {}, {} processor(s), {} signal(s)",
            controller.id,
            acquisition,
            controller.processors.len(),
            config.signals_for(&controller.id).count()
        ));
    }

    if let Some(publisher) = &config.publisher {
        lines.push(format!(
            "  publisher: {} ({} records)",
            publisher.path.display(),
            publisher.capacity
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[controllers]]
id = "ctrl-1"
acquisition = {{ kind = "fixed", rate_hz = 100.0 }}
"#
        )
        .unwrap();

        let cmd = CheckCommand {
            config: file.path().to_path_buf(),
        };
        cmd.execute().unwrap();

        let config = StationConfig::load_from_file(file.path()).unwrap();
        let summary = summarize(&config);
        assert!(summary.contains("1 controller(s)"));
        assert!(summary.contains("ctrl-1: fixed 100 Hz"));
    }

    #[test]
    fn test_check_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[signals]]
id = "LOAD"
controller_id = "missing"
channel_index = 0
"#
        )
        .unwrap();

        let cmd = CheckCommand {
            config: file.path().to_path_buf(),
        };
        let err = cmd.execute().unwrap_err();
        assert!(format!("{:#}", err).contains("unknown controller"));
    }
}
