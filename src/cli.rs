//! 命令行定义

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "flowbee")]
#[command(version)]
#[command(about = "工作流编排内核的离线工具")]
pub struct Cli {
    /// 配置文件路径（默认只读取 config/default.toml 与 FLOWBEE__* 环境变量）
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// 按迁移关系排序状态机 JSON 中的 states 并输出
    OrderStates {
        /// 状态机定义文件
        file: PathBuf,
    },
    /// 按 [dispatcher] config_root 构建处理器配置并输出
    BuildConfig {
        /// 处理器名，如 AgentProcessor.chat_assistant
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["flowbee", "order-states", "fsm.json"]).unwrap();
        assert_eq!(
            cli.command,
            Command::OrderStates {
                file: PathBuf::from("fsm.json")
            }
        );
        assert!(cli.config.is_none());

        let cli = Cli::try_parse_from([
            "flowbee",
            "build-config",
            "MessageProcessor.welcome",
            "--config",
            "local.toml",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::BuildConfig {
                name: "MessageProcessor.welcome".to_string()
            }
        );
        assert_eq!(cli.config, Some(PathBuf::from("local.toml")));
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let err = Cli::try_parse_from(["flowbee", "order-states"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(err.to_string().contains("<FILE>"));
    }

    #[test]
    fn test_help_and_version() {
        let err = Cli::try_parse_from(["flowbee", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(err.to_string().contains("order-states"));

        let err = Cli::try_parse_from(["flowbee", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
