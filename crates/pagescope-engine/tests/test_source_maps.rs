//! Source location resolution against bundles served over HTTP.

mod common;

use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

use pagescope_engine::SourceLocationResolver;
use pagescope_types::ResolverConfig;

use common::{bundle_with_inline_map, single_mapping};

async fn serve(server: &MockServer, path: &str, body: String) {
    Mock::given(matchers::method("GET"))
        .and(matchers::path(path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_inline_map_resolves_to_original_position() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/static/main.js",
        bundle_with_inline_map(&single_mapping("src/App.tsx", 1830, 42, 7)),
    )
    .await;

    let resolver = SourceLocationResolver::new(&ResolverConfig::default());
    let bundle = format!("{}/static/main.js", server.uri());
    let loc = resolver.resolve(&bundle, 1, 1830).await;

    assert!(loc.resolved, "{:?}", loc.note);
    assert_eq!(loc.file, "src/App.tsx");
    assert_eq!((loc.line, loc.column), (42, 7));
}

#[tokio::test]
async fn test_reverse_lookup_returns_generated_position() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/static/main.js",
        bundle_with_inline_map(&single_mapping("src/App.tsx", 1830, 42, 7)),
    )
    .await;

    let resolver = SourceLocationResolver::new(&ResolverConfig::default());
    let bundle = format!("{}/static/main.js", server.uri());
    let loc = resolver.resolve(&bundle, 1, 1830).await;
    let generated = resolver
        .generated_position(&bundle, &loc.file, loc.line, loc.column)
        .await;
    assert_eq!(generated, Some((1, 1830)));
}

#[tokio::test]
async fn test_sibling_map_fetched_from_bundle_origin() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/assets/app.js",
        "boot();\n//# sourceMappingURL=app.js.map\n".to_string(),
    )
    .await;
    serve(&server, "/assets/app.js.map", single_mapping("src/boot.ts", 3, 10, 2)).await;

    let resolver = SourceLocationResolver::new(&ResolverConfig::default());
    let loc = resolver
        .resolve(&format!("{}/assets/app.js", server.uri()), 1, 3)
        .await;
    assert!(loc.resolved, "{:?}", loc.note);
    assert_eq!(loc.file, "src/boot.ts");
    assert_eq!((loc.line, loc.column), (10, 2));
}

#[tokio::test]
async fn test_unreachable_bundle_degrades() {
    let server = MockServer::start().await;
    let resolver = SourceLocationResolver::new(&ResolverConfig::default());
    let bundle = format!("{}/gone.js", server.uri());
    let loc = resolver.resolve(&bundle, 3, 14).await;

    assert!(!loc.resolved);
    assert_eq!(loc.file, bundle);
    assert_eq!((loc.line, loc.column), (3, 14));
    assert!(loc.note.is_some());
}

#[tokio::test]
async fn test_cache_never_exceeds_capacity() {
    let server = MockServer::start().await;
    for i in 0..4 {
        serve(
            &server,
            &format!("/chunk{i}.js"),
            bundle_with_inline_map(&single_mapping(&format!("src/chunk{i}.ts"), 1, 1, 1)),
        )
        .await;
    }

    let config = ResolverConfig {
        cache_capacity: 2,
        ..ResolverConfig::default()
    };
    let resolver = SourceLocationResolver::new(&config);
    for i in 0..4 {
        let loc = resolver
            .resolve(&format!("{}/chunk{i}.js", server.uri()), 1, 1)
            .await;
        assert!(loc.resolved);
        assert!(resolver.cache().len() <= 2);
    }
    // Least recently used entries went first.
    assert!(resolver.cache().contains(&format!("{}/chunk3.js", server.uri())));
    assert!(!resolver.cache().contains(&format!("{}/chunk0.js", server.uri())));
}

#[tokio::test]
async fn test_stack_trace_mixes_resolved_and_unresolved_frames() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/static/main.js",
        bundle_with_inline_map(&single_mapping("src/App.tsx", 1830, 42, 7)),
    )
    .await;

    let resolver = SourceLocationResolver::new(&ResolverConfig::default());
    let stack = format!(
        "TypeError: x is undefined\n    at render ({uri}/static/main.js:1:1830)\n    at {uri}/vendor.js:1:99\n    at <anonymous>",
        uri = server.uri()
    );
    let trace = resolver.trace_stack(&stack).await;

    assert_eq!(trace.frames.len(), 3);
    assert_eq!(trace.resolved_count, 1);
    let first = trace.frames[0].location.as_ref().unwrap();
    assert_eq!((first.file.as_str(), first.line), ("src/App.tsx", 42));
    assert!(trace.frames[2].frame.is_none());
}
