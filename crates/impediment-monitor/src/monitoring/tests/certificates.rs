use std::sync::Arc;

use chrono::NaiveDate;

use super::common::*;
use crate::monitoring::certificates::{
    CertificateError, CertificateFilter, CertificateKind, CertificateRequest, CertificateStatus,
    CertificateTracker, StatusFilter,
};
use crate::monitoring::memory::InMemoryMonitoringStore;
use crate::monitoring::store::StoreError;

fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
}

fn today() -> NaiveDate {
    date("2025-03-10")
}

fn request(identifier: &str, kind: CertificateKind, valid_until: &str) -> CertificateRequest {
    CertificateRequest {
        identifier: identifier.to_string(),
        company_name: None,
        kind,
        number: format!("{kind}-{valid_until}"),
        issued_on: date("2024-09-01"),
        valid_until: date(valid_until),
        document_ref: None,
    }
}

async fn seeded() -> CertificateTracker<InMemoryMonitoringStore> {
    let tracker = CertificateTracker::new(Arc::new(InMemoryMonitoringStore::default()));
    for request in [
        request(ACME, CertificateKind::Fgts, "2025-03-01"),
        request(ACME, CertificateKind::Federal, "2025-03-20"),
        request(ACME, CertificateKind::Labor, "2025-09-30"),
        request(GLOBEX, CertificateKind::Federal, "2025-04-09"),
        request(GLOBEX, CertificateKind::Municipal, "2025-03-10"),
    ] {
        tracker.add(request, today()).await.expect("certificate added");
    }
    tracker
}

#[tokio::test]
async fn adding_registers_unknown_company_and_derives_status() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let tracker = CertificateTracker::new(Arc::clone(&store));
    let mut request = request("11.222.333/0001-81", CertificateKind::State, "2025-03-09");
    request.company_name = Some("ACME LTDA".to_string());
    request.number = "  123/2025 ".to_string();

    let view = tracker.add(request, today()).await.expect("added");

    assert_eq!(view.status, CertificateStatus::Expired);
    assert_eq!(view.days_remaining, -1);
    assert_eq!(view.certificate.number, "123/2025");
    assert_eq!(store.company_count(), 1);
    let listed = tracker.for_company(ACME, today()).await.expect("listed");
    assert_eq!(listed.company.display_name, "ACME LTDA");
    assert_eq!(listed.certificates.len(), 1);
}

#[tokio::test]
async fn malformed_certificates_are_refused() {
    let tracker = CertificateTracker::new(Arc::new(InMemoryMonitoringStore::default()));

    let mut blank = request(ACME, CertificateKind::Fgts, "2025-06-01");
    blank.number = "   ".to_string();
    assert!(matches!(
        tracker.add(blank, today()).await,
        Err(CertificateError::MissingNumber)
    ));

    let mut backwards = request(ACME, CertificateKind::Fgts, "2024-06-01");
    backwards.issued_on = date("2024-07-01");
    assert!(matches!(
        tracker.add(backwards, today()).await,
        Err(CertificateError::InvalidValidity { .. })
    ));

    assert!(matches!(
        tracker
            .add(request("123", CertificateKind::Fgts, "2025-06-01"), today())
            .await,
        Err(CertificateError::InvalidIdentifier(_))
    ));
}

#[tokio::test]
async fn listing_groups_by_company_latest_validity_first() {
    let tracker = seeded().await;

    let groups = tracker
        .list(CertificateFilter::default(), today())
        .await
        .expect("listed");

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].company.identifier.as_str(), ACME);
    let acme: Vec<&str> = groups[0]
        .certificates
        .iter()
        .map(|view| view.certificate.kind.tag())
        .collect();
    assert_eq!(acme, vec!["LABOR", "FEDERAL", "FGTS"]);
    assert_eq!(groups[1].company.identifier.as_str(), GLOBEX);
    assert_eq!(groups[1].certificates.len(), 2);
}

#[tokio::test]
async fn status_filters_split_expired_valid_and_expiring() {
    let tracker = seeded().await;

    let expired = tracker
        .list(
            CertificateFilter {
                status: Some(StatusFilter::Expired),
                kind: None,
            },
            today(),
        )
        .await
        .expect("expired");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].certificates.len(), 1);
    assert_eq!(expired[0].certificates[0].certificate.kind, CertificateKind::Fgts);
    assert_eq!(expired[0].certificates[0].status, CertificateStatus::Expired);

    let valid = tracker
        .list(
            CertificateFilter {
                status: Some(StatusFilter::Valid),
                kind: None,
            },
            today(),
        )
        .await
        .expect("valid");
    let valid_count: usize = valid.iter().map(|group| group.certificates.len()).sum();
    assert_eq!(valid_count, 4);

    let expiring_federal = tracker
        .list(
            CertificateFilter {
                status: Some(StatusFilter::ExpiringWithin(30)),
                kind: Some(CertificateKind::Federal),
            },
            today(),
        )
        .await
        .expect("expiring");
    let numbers: Vec<&str> = expiring_federal
        .iter()
        .flat_map(|group| group.certificates.iter())
        .map(|view| view.certificate.number.as_str())
        .collect();
    assert_eq!(numbers, vec!["FEDERAL-2025-04-09", "FEDERAL-2025-03-20"]);
}

#[tokio::test]
async fn expiry_alert_reports_days_remaining_soonest_first() {
    let tracker = seeded().await;

    let expiring = tracker.expiring(30, today()).await.expect("alert");

    let summary: Vec<(&str, CertificateKind, i64)> = expiring
        .iter()
        .map(|entry| {
            (
                entry.company.identifier.as_str(),
                entry.certificate.kind,
                entry.days_remaining,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (GLOBEX, CertificateKind::Municipal, 0),
            (ACME, CertificateKind::Federal, 10),
            (GLOBEX, CertificateKind::Federal, 30),
        ]
    );

    let narrow = tracker.expiring(5, today()).await.expect("alert");
    assert_eq!(narrow.len(), 1);
}

#[tokio::test]
async fn unknown_company_has_no_certificate_listing() {
    let tracker = CertificateTracker::new(Arc::new(InMemoryMonitoringStore::default()));
    assert!(matches!(
        tracker.for_company(GLOBEX, today()).await,
        Err(CertificateError::UnknownCompany(_))
    ));
}

#[tokio::test]
async fn unreachable_store_surfaces_as_store_error() {
    let tracker = CertificateTracker::new(Arc::new(UnreachableStore));
    assert!(matches!(
        tracker.expiring(30, today()).await,
        Err(CertificateError::Store(StoreError::Unavailable(_)))
    ));
}
