//! Page agent installation.

mod common;

use std::sync::Arc;

use pagescope_browser::PageContext;
use pagescope_engine::agent::AgentOptions;
use pagescope_engine::{ImmediateInstall, InstrumentationRegistry, IntrospectError, Introspector};

use common::{config, react_probe, FakePage};

fn registry(page: &Arc<FakePage>) -> InstrumentationRegistry {
    let page: Arc<dyn PageContext> = page.clone();
    InstrumentationRegistry::new(
        page,
        AgentOptions {
            binding: common::BINDING.into(),
            max_body_bytes: 1024,
        },
    )
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let page = FakePage::new();
    let registry = registry(&page);

    let first = registry.install().await.unwrap();
    let second = registry.install().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.immediate, ImmediateInstall::Fresh);
    assert!(registry.is_installed());
    assert_eq!(page.bindings(), [common::BINDING]);
    assert_eq!(page.init_scripts(), 1);
    assert_eq!(page.agent_evaluations(), 1);
}

#[tokio::test]
async fn test_concurrent_installs_share_one_attempt() {
    let page = FakePage::new();
    let registry = registry(&page);

    let (a, b) = tokio::join!(registry.install(), registry.install());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(page.bindings().len(), 1);
}

#[tokio::test]
async fn test_reevaluation_reports_existing_agent() {
    let page = FakePage::new();
    let registry = registry(&page);
    registry.install().await.unwrap();

    let again = registry.install_current_document().await.unwrap();
    assert_eq!(again, ImmediateInstall::AlreadyPresent);
    assert_eq!(page.init_scripts(), 1);
}

#[tokio::test]
async fn test_failed_install_is_fatal_and_not_remembered() {
    let page = FakePage::new();
    page.reject_bindings(Some("Binding registration blocked"));
    let registry = registry(&page);

    let err = registry.install().await.unwrap_err();
    assert!(matches!(err, IntrospectError::Fatal(_)), "{err:?}");
    assert!(!registry.is_installed());

    page.reject_bindings(None);
    let report = registry.install().await.unwrap();
    assert_eq!(report.immediate, ImmediateInstall::Fresh);
}

#[tokio::test]
async fn test_queries_install_on_first_use() {
    let page = FakePage::new();
    page.reply("probe", react_probe());
    let introspector = Introspector::new(page.clone(), config());
    assert!(page.bindings().is_empty());

    introspector.detect_frameworks().await.unwrap();
    introspector.detect_frameworks().await.unwrap();

    assert_eq!(page.bindings().len(), 1);
    assert_eq!(page.agent_evaluations(), 1);
    assert_eq!(page.calls_to("probe"), 2);
}

#[tokio::test]
async fn test_fatal_install_fails_queries() {
    let page = FakePage::new();
    page.reject_bindings(Some("Binding registration blocked"));
    let introspector = Introspector::new(page.clone(), config());

    let err = introspector.detect_frameworks().await.unwrap_err();
    assert!(matches!(err, IntrospectError::Fatal(_)));
    assert_eq!(page.calls_to("probe"), 0);
}
