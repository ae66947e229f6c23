use driver::BlockingExecutor;
use model::query::QueryStatus;
use model::settings::RegistrySettings;
use proptest::prelude::*;
use registry::QueryRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{numbered_columns, numbered_rows, MockProvider};

/// Helper to run async property tests on a fresh current-thread runtime.
/// Panics are treated as test failures.
fn test_prop<F, Fut>(f: F)
where
    F: FnOnce(MockProvider, QueryRegistry) -> Fut,
    Fut: Future<Output = ()>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    rt.block_on(async {
        let provider = MockProvider::new();
        let executor = Arc::new(BlockingExecutor::new(2));
        let settings = RegistrySettings {
            default_poll_interval: Duration::from_millis(1),
            ..RegistrySettings::default()
        };
        let registry = QueryRegistry::new(Arc::new(provider.clone()), executor, settings);
        f(provider, registry).await;
    });
}

async fn succeeded_query(
    provider: &MockProvider,
    registry: &QueryRegistry,
    row_count: usize,
) -> String {
    provider.succeed_next_submit(numbered_rows(row_count), numbered_columns());
    let query_id = registry.execute_query("SELECT N", None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = registry.get_snapshot(&query_id).unwrap().status;
            if status == QueryStatus::Succeeded {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("query should succeed");
    query_id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// An unbounded fetch returns the full inline result.
    #[test]
    fn unbounded_fetch_returns_everything(row_count in 0..50usize) {
        test_prop(|provider, registry| async move {
            let query_id = succeeded_query(&provider, &registry, row_count).await;

            let page = registry.fetch_result(&query_id, 0, None).unwrap();
            assert_eq!(page.rows.len(), page.total_rows);
            assert_eq!(page.total_rows, row_count);
            assert!(!page.has_more);
        });
    }

    /// Every window is the exact slice `[offset, offset + limit)` of the
    /// inline rows, and `has_more` is set iff rows remain past the window.
    #[test]
    fn windows_slice_exactly(
        row_count in 0..50usize,
        offset in 0..60usize,
        limit in 0..60usize,
    ) {
        test_prop(|provider, registry| async move {
            let query_id = succeeded_query(&provider, &registry, row_count).await;

            let page = registry.fetch_result(&query_id, offset, Some(limit)).unwrap();
            let start = offset.min(row_count);
            let end = (offset + limit).min(row_count);

            assert_eq!(page.rows.len(), end - start);
            assert_eq!(page.total_rows, row_count);
            assert_eq!(page.offset, offset);
            assert_eq!(page.limit, limit);
            assert_eq!(page.has_more, offset + limit < row_count);

            let expected = &numbered_rows(row_count)[start..end];
            assert_eq!(page.rows.as_slice(), expected);
        });
    }
}
