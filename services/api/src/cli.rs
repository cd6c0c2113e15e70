use crate::commands::{
    run_alerts, run_batch, run_certificate_add, run_certificate_expiring, run_certificate_list,
    run_history, run_purge, run_reconcile, run_rejections, run_status, run_verify, AlertsArgs,
    BatchArgs, CertificateAddArgs, CertificateExpiringArgs, CertificateListArgs, HistoryArgs,
    PurgeArgs, RejectionsArgs, StatusArgs, VerifyArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use impediment_monitor::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Impediment Monitor",
    about = "Check supplier tax identifiers against public restriction registries",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Verify one identifier against every enabled source
    Verify(VerifyArgs),
    /// Verify every identifier listed in a CSV file
    Batch(BatchArgs),
    /// Show the current status of a registered company
    Status(StatusArgs),
    /// List stored verification results of a company
    History(HistoryArgs),
    /// List companies with irregular sources in a recent window
    Alerts(AlertsArgs),
    /// List verification runs refused for an invalid identifier
    Rejections(RejectionsArgs),
    /// Record and review clearance certificates
    Certificates {
        #[command(subcommand)]
        command: CertificateCommand,
    },
    /// Delete stored companies and verification results
    Purge(PurgeArgs),
    /// Replace placeholder company names with names from public registries
    Reconcile,
}

#[derive(Subcommand, Debug)]
enum CertificateCommand {
    /// Record a certificate held by a company
    Add(CertificateAddArgs),
    /// List certificates grouped by company
    List(CertificateListArgs),
    /// List certificates that lapse within a window
    Expiring(CertificateExpiringArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Verify(args) => run_verify(args).await,
        Command::Batch(args) => run_batch(args).await,
        Command::Status(args) => run_status(args).await,
        Command::History(args) => run_history(args).await,
        Command::Alerts(args) => run_alerts(args).await,
        Command::Rejections(args) => run_rejections(args).await,
        Command::Certificates { command } => match command {
            CertificateCommand::Add(args) => run_certificate_add(args).await,
            CertificateCommand::List(args) => run_certificate_list(args).await,
            CertificateCommand::Expiring(args) => run_certificate_expiring(args).await,
        },
        Command::Purge(args) => run_purge(args).await,
        Command::Reconcile => run_reconcile().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use impediment_monitor::monitoring::{CertificateKind, SourceKind};

    #[test]
    fn command_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["impediment-monitor-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn history_accepts_source_and_date_filters() {
        let cli = Cli::try_parse_from([
            "impediment-monitor-api",
            "history",
            "11.222.333/0001-81",
            "--source",
            "cadin",
            "--since",
            "2025-01-31",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::History(args)) => {
                assert_eq!(args.identifier, "11.222.333/0001-81");
                assert_eq!(args.source, Some(SourceKind::Cadin));
                assert!(args.since.is_some());
            }
            other => panic!("expected history command, got {other:?}"),
        }
    }

    #[test]
    fn unknown_source_is_rejected() {
        let parsed = Cli::try_parse_from([
            "impediment-monitor-api",
            "history",
            "11222333000181",
            "--source",
            "serasa",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn purge_requires_explicit_confirmation_flag() {
        let cli = Cli::try_parse_from(["impediment-monitor-api", "purge"]).expect("parses");
        match cli.command {
            Some(Command::Purge(args)) => assert!(!args.yes),
            other => panic!("expected purge command, got {other:?}"),
        }
    }

    #[test]
    fn certificate_add_parses_kind_and_dates() {
        let cli = Cli::try_parse_from([
            "impediment-monitor-api",
            "certificates",
            "add",
            "11.222.333/0001-81",
            "--kind",
            "trabalhista",
            "--number",
            "2025/77",
            "--issued-on",
            "2025-01-10",
            "--valid-until",
            "2025-07-09",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Certificates {
                command: CertificateCommand::Add(args),
            }) => {
                assert_eq!(args.kind, CertificateKind::Labor);
                assert_eq!(args.valid_until.to_string(), "2025-07-09");
                assert!(args.name.is_none());
            }
            other => panic!("expected certificate add, got {other:?}"),
        }
    }

    #[test]
    fn certificate_listing_by_company_excludes_status_filters() {
        let parsed = Cli::try_parse_from([
            "impediment-monitor-api",
            "certificates",
            "list",
            "--company",
            "11222333000181",
            "--status",
            "expired",
        ]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from(["impediment-monitor-api", "certificates", "expiring"])
            .expect("parses");
        match cli.command {
            Some(Command::Certificates {
                command: CertificateCommand::Expiring(args),
            }) => assert_eq!(args.days, 30),
            other => panic!("expected certificate expiring, got {other:?}"),
        }
    }
}
