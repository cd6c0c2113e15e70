use crate::infra::{
    build_service, parse_certificate_kind, parse_date, parse_source_kind, start_of_day,
    SharedService,
};
use chrono::{Duration, NaiveDate, Utc};
use clap::Args;
use impediment_monitor::config::AppConfig;
use impediment_monitor::error::AppError;
use impediment_monitor::monitoring::orchestrator::INVALID_IDENTIFIER_DETAIL;
use impediment_monitor::monitoring::router::DEFAULT_ALERT_WINDOW_DAYS;
use impediment_monitor::monitoring::{
    BatchInput, BatchOutcome, CertificateFilter, CertificateKind, CertificateRequest,
    CertificateStatus, CertificateView, CheckerBuildError, CompanyCertificates, CompanyStatus,
    ExpiringCertificate, ImpededCompany, PublicRegistryLookup, ResultFilter, SourceKind,
    StatusFilter, VerificationReport, VerificationResult, VerificationState,
    DEFAULT_EXPIRY_WINDOW_DAYS,
};
use impediment_monitor::telemetry;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args, Debug, Default)]
pub(crate) struct OutputArgs {
    /// Print machine-readable JSON instead of the text summary
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct VerifyArgs {
    /// Tax identifier, punctuation allowed
    pub(crate) identifier: String,
    /// Company name to record when the identifier is not registered yet
    #[arg(long)]
    pub(crate) name: Option<String>,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct BatchArgs {
    /// CSV file with an identifier column and an optional name column
    #[arg(long)]
    pub(crate) file: PathBuf,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct StatusArgs {
    pub(crate) identifier: String,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct HistoryArgs {
    pub(crate) identifier: String,
    /// Only results from this source (e.g. CEIS, CADIN)
    #[arg(long, value_parser = parse_source_kind)]
    pub(crate) source: Option<SourceKind>,
    /// Only results checked on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) since: Option<NaiveDate>,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct AlertsArgs {
    /// Window, in days, of checks considered
    #[arg(long, default_value_t = DEFAULT_ALERT_WINDOW_DAYS)]
    pub(crate) days: u32,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct RejectionsArgs {
    /// Window, in days, of rejected runs listed
    #[arg(long, default_value_t = DEFAULT_ALERT_WINDOW_DAYS)]
    pub(crate) days: u32,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct CertificateAddArgs {
    /// Tax identifier of the holder, punctuation allowed
    pub(crate) identifier: String,
    /// FGTS, FEDERAL, STATE, MUNICIPAL or LABOR
    #[arg(long, value_parser = parse_certificate_kind)]
    pub(crate) kind: CertificateKind,
    /// Number printed on the certificate
    #[arg(long)]
    pub(crate) number: String,
    /// Issue date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) issued_on: NaiveDate,
    /// Last day the certificate is valid (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) valid_until: NaiveDate,
    /// Company name to record when the identifier is not registered yet
    #[arg(long)]
    pub(crate) name: Option<String>,
    /// Where the issued document is kept
    #[arg(long)]
    pub(crate) document: Option<String>,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct CertificateListArgs {
    /// Only certificates of this company
    #[arg(long, conflicts_with_all = ["status", "kind"])]
    pub(crate) company: Option<String>,
    /// expired, valid or expiring
    #[arg(long)]
    pub(crate) status: Option<String>,
    #[arg(long, value_parser = parse_certificate_kind)]
    pub(crate) kind: Option<CertificateKind>,
    /// Window, in days, used by the expiring status
    #[arg(long, default_value_t = DEFAULT_EXPIRY_WINDOW_DAYS)]
    pub(crate) days: u32,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct CertificateExpiringArgs {
    /// Alert window in days
    #[arg(long, default_value_t = DEFAULT_EXPIRY_WINDOW_DAYS)]
    pub(crate) days: u32,
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

#[derive(Args, Debug)]
pub(crate) struct PurgeArgs {
    /// Confirm the purge; without it nothing is deleted
    #[arg(long)]
    pub(crate) yes: bool,
}

fn prepare() -> Result<(AppConfig, SharedService), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let service = build_service(&config)?;
    Ok((config, service))
}

pub(crate) async fn run_verify(args: VerifyArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let report = service
        .orchestrator
        .verify(&args.identifier, args.name.as_deref())
        .await?;

    if args.output.json {
        print_json(&report);
    } else {
        render_report(&report);
    }
    Ok(())
}

pub(crate) async fn run_batch(args: BatchArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let file = File::open(&args.file)?;
    let input = BatchInput::from_reader(BufReader::new(file))?;
    println!("Verifying {} identifier(s) from {}", input.len(), args.file.display());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; identifiers not yet started will be skipped");
                cancel.cancel();
            }
        })
    };
    let outcomes = service
        .orchestrator
        .verify_batch(input.items, &cancel)
        .await;
    interrupt.abort();

    if args.output.json {
        print_json(&outcomes);
        return Ok(());
    }

    let mut regular = 0;
    let mut impeded = 0;
    let mut unfinished = 0;
    for outcome in &outcomes {
        match outcome {
            BatchOutcome::Completed { report } => {
                if report.regular {
                    regular += 1;
                } else {
                    impeded += 1;
                }
                render_report(report);
            }
            BatchOutcome::Failed { identifier, error } => {
                unfinished += 1;
                println!("{identifier} -> FAILED: {error}");
            }
            BatchOutcome::Skipped { identifier } => {
                unfinished += 1;
                println!("{identifier} -> skipped");
            }
        }
    }
    println!("\n{regular} regular | {impeded} impeded or unverified | {unfinished} not completed");
    Ok(())
}

pub(crate) async fn run_status(args: StatusArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let status = service.queries.current_status(&args.identifier).await?;

    if args.output.json {
        print_json(&status);
    } else {
        render_status(&status);
    }
    Ok(())
}

pub(crate) async fn run_history(args: HistoryArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let filter = ResultFilter {
        source_kind: args.source,
        since: args.since.map(start_of_day),
    };
    let history = service.queries.history(&args.identifier, filter).await?;

    if args.output.json {
        print_json(&history);
        return Ok(());
    }
    if history.is_empty() {
        println!("No stored results match");
    }
    for result in &history {
        render_result(result);
    }
    Ok(())
}

pub(crate) async fn run_alerts(args: AlertsArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let since = Utc::now() - Duration::days(i64::from(args.days));
    let companies = service.queries.impeded_companies(since).await?;

    if args.output.json {
        print_json(&companies);
        return Ok(());
    }

    println!(
        "Companies with restrictions in the last {} day(s): {}",
        args.days,
        companies.len()
    );
    for company in &companies {
        render_impeded(company);
    }
    Ok(())
}

pub(crate) async fn run_rejections(args: RejectionsArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let since = Utc::now() - Duration::days(i64::from(args.days));
    let rejections = service.queries.rejected_since(since).await?;

    if args.output.json {
        print_json(&rejections);
        return Ok(());
    }
    println!(
        "Rejected verification runs in the last {} day(s): {}",
        args.days,
        rejections.len()
    );
    for rejection in &rejections {
        println!(
            "  - {} '{}' {}: {}",
            rejection.checked_at.format("%Y-%m-%d %H:%M:%S"),
            rejection.raw_identifier,
            rejection.source_kind,
            rejection.reason
        );
    }
    Ok(())
}

pub(crate) async fn run_certificate_add(args: CertificateAddArgs) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let request = CertificateRequest {
        identifier: args.identifier,
        company_name: args.name,
        kind: args.kind,
        number: args.number,
        issued_on: args.issued_on,
        valid_until: args.valid_until,
        document_ref: args.document,
    };
    let view = service
        .certificates
        .add(request, Utc::now().date_naive())
        .await?;

    if args.output.json {
        print_json(&view);
    } else {
        render_certificate(&view);
    }
    Ok(())
}

pub(crate) async fn run_certificate_list(args: CertificateListArgs) -> Result<(), AppError> {
    let status = args
        .status
        .as_deref()
        .map(|status| StatusFilter::parse(status, args.days))
        .transpose()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let (_, service) = prepare()?;
    let today = Utc::now().date_naive();

    let groups = match &args.company {
        Some(identifier) => vec![service.certificates.for_company(identifier, today).await?],
        None => {
            let filter = CertificateFilter {
                status,
                kind: args.kind,
            };
            service.certificates.list(filter, today).await?
        }
    };

    if args.output.json {
        print_json(&groups);
        return Ok(());
    }
    if groups.is_empty() {
        println!("No certificates match");
    }
    for group in &groups {
        render_company_certificates(group);
    }
    Ok(())
}

pub(crate) async fn run_certificate_expiring(
    args: CertificateExpiringArgs,
) -> Result<(), AppError> {
    let (_, service) = prepare()?;
    let expiring = service
        .certificates
        .expiring(args.days, Utc::now().date_naive())
        .await?;

    if args.output.json {
        print_json(&expiring);
        return Ok(());
    }
    println!(
        "Certificates expiring in the next {} day(s): {}",
        args.days,
        expiring.len()
    );
    for entry in &expiring {
        render_expiring(entry);
    }
    Ok(())
}

pub(crate) async fn run_purge(args: PurgeArgs) -> Result<(), AppError> {
    if !args.yes {
        println!(
            "This deletes every stored company, verification result and rejected run \
             created until now, and every lapsed certificate."
        );
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    let (_, service) = prepare()?;
    let request = service.purge.request_purge();
    let summary = service.purge.confirm_purge(request.token).await?;
    println!(
        "Purged {} company(ies), {} verification result(s) and {} rejected run(s) recorded \
         up to {}, and {} certificate(s) lapsed before that day",
        summary.companies_removed,
        summary.results_removed,
        summary.rejections_removed,
        request.requested_at.to_rfc3339(),
        summary.certificates_removed
    );
    Ok(())
}

pub(crate) async fn run_reconcile() -> Result<(), AppError> {
    let (config, service) = prepare()?;
    let lookup = PublicRegistryLookup::new(config.sources.request_timeout)
        .map_err(CheckerBuildError::from)?;
    let renamed = service
        .orchestrator
        .registry()
        .reconcile_placeholders(&lookup)
        .await?;
    println!("Renamed {renamed} placeholder company(ies)");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("JSON output unavailable: {err}"),
    }
}

fn verdict_label(regular: bool) -> &'static str {
    if regular {
        "REGULAR"
    } else {
        "IMPEDED"
    }
}

fn print_detail(detail: &str) {
    for line in detail.lines().filter(|line| !line.trim().is_empty()) {
        println!("      {line}");
    }
}

fn render_report(report: &VerificationReport) {
    if report.state == VerificationState::IdentifierInvalid {
        println!(
            "{} -> {}: {}",
            report.identifier,
            INVALID_IDENTIFIER_DETAIL,
            report.invalid_reason.as_deref().unwrap_or("-")
        );
        return;
    }

    match &report.company {
        Some(company) => println!(
            "{} ({}) -> {}",
            company.identifier.formatted(),
            company.display_name,
            verdict_label(report.regular)
        ),
        None => println!("{} -> {}", report.identifier, verdict_label(report.regular)),
    }
    for source in &report.sources {
        let stored = if source.persisted { "" } else { " [not stored]" };
        match source.failure {
            Some(reason) => println!("  - {}: not verified ({reason}){stored}", source.source_kind),
            None => println!(
                "  - {}: {}{stored}",
                source.source_kind,
                verdict_label(source.regular)
            ),
        }
        print_detail(&source.detail);
    }
}

fn render_status(status: &CompanyStatus) {
    println!(
        "{} ({}) -> {}",
        status.company.identifier.formatted(),
        status.company.display_name,
        verdict_label(status.regular)
    );
    match status.last_checked_at {
        Some(at) => println!("  last checked {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  never checked"),
    }
    for result in &status.sources {
        render_result(result);
    }
}

fn render_result(result: &VerificationResult) {
    println!(
        "  - {} {} [{}]",
        result.checked_at.format("%Y-%m-%d %H:%M:%S"),
        result.source_kind,
        verdict_label(result.regular)
    );
    print_detail(&result.detail);
}

fn render_impeded(entry: &ImpededCompany) {
    println!(
        "{} ({}) last checked {}",
        entry.company.identifier.formatted(),
        entry.company.display_name,
        entry.last_checked_at.format("%Y-%m-%d %H:%M")
    );
    for result in &entry.irregular_sources {
        println!("  - {}: {}", result.source_kind, result.source_kind.label());
        print_detail(&result.detail);
    }
}

fn certificate_status_label(status: CertificateStatus) -> &'static str {
    match status {
        CertificateStatus::Valid => "VALID",
        CertificateStatus::Expired => "EXPIRED",
    }
}

fn render_certificate(view: &CertificateView) {
    let certificate = &view.certificate;
    println!(
        "  - {} #{} issued {} valid until {} [{}, {} day(s)]",
        certificate.kind,
        certificate.number,
        certificate.issued_on,
        certificate.valid_until,
        certificate_status_label(view.status),
        view.days_remaining
    );
}

fn render_company_certificates(group: &CompanyCertificates) {
    println!(
        "{} ({})",
        group.company.identifier.formatted(),
        group.company.display_name
    );
    for view in &group.certificates {
        render_certificate(view);
    }
}

fn render_expiring(entry: &ExpiringCertificate) {
    println!(
        "{} ({}) {} expires {} ({} day(s) left)",
        entry.company.identifier.formatted(),
        entry.company.display_name,
        entry.certificate.kind.label(),
        entry.certificate.valid_until,
        entry.days_remaining
    );
}
