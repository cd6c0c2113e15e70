use std::sync::Arc;

use super::common::*;
use crate::monitoring::checkers::FailureReason;
use crate::monitoring::domain::PENDING_LOOKUP_NAME;
use crate::monitoring::memory::InMemoryMonitoringStore;
use crate::monitoring::registry::{CompanyRegistry, RegistryError};
use crate::monitoring::store::{MonitoringStore, StoreError};

#[tokio::test]
async fn unseen_identifier_gets_placeholder_name() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));

    let company = registry
        .resolve_or_create(&tax_id(ACME), None)
        .await
        .expect("company created");

    assert_eq!(company.display_name, PENDING_LOOKUP_NAME);
    assert_eq!(company.identifier.as_str(), ACME);
    assert_eq!(store.company_count(), 1);
}

#[tokio::test]
async fn known_name_replaces_placeholder_once() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));
    let id = tax_id(ACME);

    registry.resolve_or_create(&id, None).await.expect("placeholder");
    let named = registry
        .resolve_or_create(&id, Some("  ACME LTDA "))
        .await
        .expect("named");
    assert_eq!(named.display_name, "ACME LTDA");

    let unchanged = registry
        .resolve_or_create(&id, Some("ACME Holdings"))
        .await
        .expect("resolved");
    assert_eq!(unchanged.display_name, "ACME LTDA");
    assert_eq!(unchanged.id, named.id);
    assert_eq!(store.company_count(), 1);
}

#[tokio::test]
async fn blank_or_placeholder_names_are_ignored() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));
    let id = tax_id(ACME);

    let company = registry
        .resolve_or_create(&id, Some("   "))
        .await
        .expect("created");
    assert!(company.has_placeholder_name());

    let company = registry
        .resolve_or_create(&id, Some(PENDING_LOOKUP_NAME))
        .await
        .expect("resolved");
    assert!(company.has_placeholder_name());
}

#[tokio::test]
async fn concurrent_first_resolutions_create_one_company() {
    let store = Arc::new(BlindReadStore::new(8));
    let registry = CompanyRegistry::new(Arc::clone(&store));
    let id = tax_id(ACME);

    let attempts = (0..8).map(|_| registry.resolve_or_create(&id, None));
    let companies = futures::future::join_all(attempts).await;

    let first = companies[0].as_ref().expect("resolved").id;
    for company in &companies {
        assert_eq!(company.as_ref().expect("resolved").id, first);
    }
    assert_eq!(store.inner.company_count(), 1);
}

#[tokio::test]
async fn concurrent_spawned_resolutions_create_one_company() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));

    let handles: Vec<_> = (0..16)
        .map(|index| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let name = format!("ACME {index}");
                registry
                    .resolve_or_create(&tax_id(ACME), Some(name.as_str()))
                    .await
            })
        })
        .collect();

    let mut names = Vec::new();
    for handle in handles {
        let company = handle.await.expect("task joins").expect("resolved");
        names.push(company.display_name);
    }

    assert_eq!(store.company_count(), 1);
    let stored = store
        .find_company_by_identifier(&tax_id(ACME))
        .await
        .expect("read")
        .expect("exists");
    assert!(stored.display_name.starts_with("ACME "));
    assert!(names.iter().all(|name| *name == stored.display_name));
}

#[tokio::test]
async fn register_keeps_contract_reference() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));

    let company = registry
        .register(&tax_id(GLOBEX), "Globex SA", Some(" Contract 12/2024 "))
        .await
        .expect("registered");
    assert_eq!(company.contract_reference.as_deref(), Some("Contract 12/2024"));

    let again = registry
        .register(&tax_id(GLOBEX), "Globex Renamed", None)
        .await
        .expect("re-registered");
    assert_eq!(again.id, company.id);
    assert_eq!(again.display_name, "Globex SA");
}

#[tokio::test]
async fn reconcile_renames_only_placeholders() {
    let store = Arc::new(InMemoryMonitoringStore::default());
    let registry = CompanyRegistry::new(Arc::clone(&store));
    registry
        .resolve_or_create(&tax_id(ACME), None)
        .await
        .expect("placeholder");
    registry
        .resolve_or_create(&tax_id(GLOBEX), Some("Globex SA"))
        .await
        .expect("named");
    registry
        .resolve_or_create(&tax_id("00000000000191"), None)
        .await
        .expect("placeholder");

    let lookup = TableLookup(vec![
        (ACME, Ok(Some("ACME LTDA"))),
        (GLOBEX, Ok(Some("Should Not Apply"))),
        ("00000000000191", Err(FailureReason::Timeout)),
    ]);
    let renamed = registry
        .reconcile_placeholders(&lookup)
        .await
        .expect("reconciled");
    assert_eq!(renamed, 1);

    let companies = store.list_companies().await.expect("list");
    let names: Vec<&str> = companies
        .iter()
        .map(|company| company.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["ACME LTDA", "Globex SA", PENDING_LOOKUP_NAME]);
}

#[tokio::test]
async fn unreachable_store_surfaces_store_error() {
    let registry = CompanyRegistry::new(Arc::new(UnreachableStore));
    match registry.resolve_or_create(&tax_id(ACME), None).await {
        Err(RegistryError::Store(StoreError::Unavailable(_))) => {}
        other => panic!("expected store failure, got {other:?}"),
    }
}
