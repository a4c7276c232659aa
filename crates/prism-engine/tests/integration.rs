use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use prism_core::{Blob, ErrorKind, ImageError, Loader, Params, RequestContext};
use prism_engine::{Engine, EngineBuilder, EngineConfig, WriteMode};
use prism_path::{PathCodec, ResultPathStyle, Signer, parse};
use prism_telemetry::{CacheOutcome, Metrics};
use prism_test_support::{CountingProcessor, FailingStorage, MemoryLoader, MemoryStorage};

type TestResult = Result<(), Box<dyn Error>>;

const PATH: &str = "/unsafe/100x50/a.png";

fn codec() -> PathCodec {
    PathCodec::new(Some(Signer::sha1("secret")), true)
}

fn builder() -> EngineBuilder {
    Engine::builder(codec())
}

fn result_key(path: &str) -> Result<String, Box<dyn Error>> {
    Ok(ResultPathStyle::Original.hash(&parse(path)?))
}

async fn body(blob: &Blob) -> Result<String, Box<dyn Error>> {
    Ok(String::from_utf8(blob.read_all().await?.to_vec())?)
}

fn kind(result: Result<Blob, ImageError>) -> Option<ErrorKind> {
    result.err().map(|err| err.kind())
}

#[tokio::test]
async fn miss_then_hit_reuses_the_stored_result() -> TestResult {
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));
    let processor = Arc::new(CountingProcessor::new("p"));
    let results = Arc::new(MemoryStorage::new("results"));
    let metrics = Metrics::new()?;
    let engine = builder()
        .loader(loader.clone())
        .processor(processor.clone())
        .result_storage(results.clone())
        .metrics(metrics.clone())
        .build();
    let ctx = RequestContext::background();

    let first = engine.serve(&ctx, PATH).await?;
    assert_eq!(body(&first).await?, "p:100x50:src");
    assert!(results.contains(&result_key(PATH)?));

    let second = engine.serve(&ctx, PATH).await?;
    assert_eq!(body(&second).await?, "p:100x50:src");
    assert_eq!(loader.calls(), 1);
    assert_eq!(processor.calls(), 1);
    assert_eq!(metrics.cache_lookups(CacheOutcome::Miss), 1);
    assert_eq!(metrics.cache_lookups(CacheOutcome::Hit), 1);
    assert_eq!(engine.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_paths_do_no_work() -> TestResult {
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));
    let engine = builder().loader(loader.clone()).build();
    let ctx = RequestContext::background();

    let params = parse(PATH)?;
    let signed = engine.codec().generate(&params);
    assert!(engine.serve(&ctx, &signed).await.is_ok());

    let tampered = signed.replacen("100x50", "100x51", 1);
    assert_eq!(
        kind(engine.serve(&ctx, &tampered).await),
        Some(ErrorKind::SignatureMismatch)
    );
    assert_eq!(
        kind(engine.serve(&ctx, "/unsafe/").await),
        Some(ErrorKind::Invalid)
    );
    assert_eq!(loader.calls(), 1);
    assert_eq!(engine.in_flight(), 0);

    let strict = Engine::builder(PathCodec::new(Some(Signer::sha1("secret")), false))
        .loader(loader.clone())
        .build();
    assert_eq!(
        kind(strict.serve(&ctx, PATH).await),
        Some(ErrorKind::SignatureMismatch)
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_execution() -> TestResult {
    let loader = Arc::new(
        MemoryLoader::new("memory")
            .with_image("a.png", b"src")
            .with_latency(Duration::from_millis(50)),
    );
    let processor = Arc::new(CountingProcessor::new("p"));
    let metrics = Metrics::new()?;
    let engine = builder()
        .loader(loader.clone())
        .processor(processor.clone())
        .metrics(metrics.clone())
        .build();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.serve(&RequestContext::background(), PATH).await
        }));
    }
    for task in tasks {
        let blob = task.await??;
        assert_eq!(body(&blob).await?, "p:100x50:src");
    }
    assert_eq!(loader.calls(), 1);
    assert_eq!(processor.calls(), 1);
    assert_eq!(metrics.singleflight_shared(), 7);
    assert_eq!(engine.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn expired_results_are_recomputed() -> TestResult {
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));
    let processor = Arc::new(CountingProcessor::new("p"));
    let results = Arc::new(MemoryStorage::new("results").with_expiration(Duration::from_millis(20)));
    let metrics = Metrics::new()?;
    let engine = builder()
        .loader(loader)
        .processor(processor.clone())
        .result_storage(results.clone())
        .metrics(metrics.clone())
        .build();
    let ctx = RequestContext::background();

    engine.serve(&ctx, PATH).await?;
    tokio::time::sleep(Duration::from_millis(40)).await;
    let direct = results.get(&ctx, &result_key(PATH)?).await;
    assert_eq!(kind(direct), Some(ErrorKind::Expired));

    let again = engine.serve(&ctx, PATH).await?;
    assert_eq!(body(&again).await?, "p:100x50:src");
    assert_eq!(processor.calls(), 2);
    assert_eq!(metrics.cache_lookups(CacheOutcome::Expired), 1);
    assert_eq!(metrics.cache_lookups(CacheOutcome::Miss), 1);
    Ok(())
}

#[tokio::test]
async fn loader_chain_falls_through_and_reports_the_most_specific_error() -> TestResult {
    let ctx = RequestContext::background();
    let empty = Arc::new(MemoryLoader::new("empty"));
    let second = Arc::new(MemoryLoader::new("second").with_image("a.png", b"two"));
    let engine = builder().loader(empty.clone()).loader(second.clone()).build();
    assert_eq!(body(&engine.serve(&ctx, PATH).await?).await?, "two");
    assert_eq!((empty.calls(), second.calls()), (1, 1));

    let scoped = Arc::new(MemoryLoader::new("scoped").with_scope("photos/"));
    let engine = builder()
        .loader(Arc::new(MemoryLoader::new("empty")))
        .loader(scoped)
        .build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::Invalid));

    let engine = builder()
        .loader(Arc::new(MemoryLoader::failing("declines", ImageError::Pass)))
        .loader(Arc::new(MemoryLoader::failing(
            "down",
            ImageError::Upstream { status: 503 },
        )))
        .loader(Arc::new(MemoryLoader::new("empty")))
        .build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::Upstream));

    let engine = builder()
        .loader(Arc::new(MemoryLoader::failing("declines", ImageError::Pass)))
        .build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::NotFound));

    let engine = builder().build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::NotFound));
    Ok(())
}

#[tokio::test]
async fn storages_serve_originals_before_loaders_and_receive_copies() -> TestResult {
    let ctx = RequestContext::background();
    let storage = Arc::new(MemoryStorage::new("originals"));
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));
    let engine = builder()
        .storage(storage.clone())
        .loader(loader.clone())
        .build();

    engine.serve(&ctx, PATH).await?;
    assert!(storage.contains("a.png"));
    assert_eq!(loader.calls(), 1);

    engine.serve(&ctx, "/unsafe/20x20/a.png").await?;
    assert_eq!(loader.calls(), 1);
    assert_eq!(storage.gets(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_side_effects_never_fail_the_request() -> TestResult {
    let ctx = RequestContext::background();
    let originals = Arc::new(FailingStorage::new("originals"));
    let results = Arc::new(FailingStorage::new("results"));
    let metrics = Metrics::new()?;
    let engine = builder()
        .storage(originals.clone())
        .result_storage(results.clone())
        .loader(Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src")))
        .processor(Arc::new(CountingProcessor::new("p")))
        .metrics(metrics.clone())
        .build();

    let blob = engine.serve(&ctx, PATH).await?;
    assert_eq!(body(&blob).await?, "p:100x50:src");
    assert_eq!((originals.puts(), results.puts()), (1, 1));
    assert_eq!(metrics.side_effect_failures("storage_put"), 1);
    assert_eq!(metrics.side_effect_failures("result_put"), 1);
    Ok(())
}

#[tokio::test]
async fn processor_chain_passes_retries_and_gives_up() -> TestResult {
    let ctx = RequestContext::background();
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));

    let skipping = Arc::new(CountingProcessor::passing("skip"));
    let handling = Arc::new(CountingProcessor::new("p"));
    let engine = builder()
        .loader(loader.clone())
        .processor(skipping.clone())
        .processor(handling.clone())
        .build();
    assert_eq!(body(&engine.serve(&ctx, PATH).await?).await?, "p:100x50:src");
    assert_eq!((skipping.calls(), handling.calls()), (1, 1));

    let engine = builder()
        .loader(loader.clone())
        .processor(Arc::new(CountingProcessor::passing("skip")))
        .build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::Unsupported));

    let flaky = Arc::new(CountingProcessor::new("flaky"));
    flaky.fail_next(ImageError::Timeout { stage: "process" });
    let engine = builder()
        .loader(loader.clone())
        .processor(flaky.clone())
        .build();
    assert!(engine.serve(&ctx, PATH).await.is_ok());
    assert_eq!(flaky.calls(), 2);

    let stubborn = Arc::new(CountingProcessor::new("stubborn"));
    stubborn.fail_next(ImageError::Timeout { stage: "process" });
    let engine = builder()
        .config(EngineConfig {
            process_retry_limit: 0,
            ..EngineConfig::default()
        })
        .loader(loader.clone())
        .processor(stubborn.clone())
        .build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::Timeout));
    assert_eq!(stubborn.calls(), 1);

    let broken = Arc::new(CountingProcessor::new("broken"));
    broken.fail_next(ImageError::invalid("filter_argument_invalid", "blur(x)"));
    let engine = builder().loader(loader).processor(broken.clone()).build();
    assert_eq!(kind(engine.serve(&ctx, PATH).await), Some(ErrorKind::Invalid));
    assert_eq!(broken.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn canceling_one_request_leaves_other_keys_alone() -> TestResult {
    let fast = Arc::new(MemoryLoader::new("fast").with_image("b.png", b"bee"));
    let slow = Arc::new(
        MemoryLoader::new("slow")
            .with_image("a.png", b"src")
            .with_latency(Duration::from_secs(5)),
    );
    let engine = builder().loader(fast).loader(slow).build();

    let canceled = RequestContext::background();
    let pending = {
        let engine = engine.clone();
        let ctx = canceled.clone();
        tokio::spawn(async move { engine.serve(&ctx, PATH).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    canceled.cancel();

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        engine.serve(&RequestContext::background(), "/unsafe/b.png"),
    )
    .await??;
    assert_eq!(body(&other).await?, "bee");

    let outcome = tokio::time::timeout(Duration::from_secs(1), pending).await??;
    assert_eq!(kind(outcome), Some(ErrorKind::Timeout));
    Ok(())
}

#[tokio::test]
async fn canceled_leader_fails_its_followers() -> TestResult {
    let slow = Arc::new(
        MemoryLoader::new("slow")
            .with_image("a.png", b"src")
            .with_latency(Duration::from_secs(5)),
    );
    let engine = builder().loader(slow.clone()).build();

    let leader_ctx = RequestContext::background();
    let leader = {
        let engine = engine.clone();
        let ctx = leader_ctx.clone();
        tokio::spawn(async move { engine.serve(&ctx, PATH).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let follower = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.serve(&RequestContext::background(), PATH).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    leader_ctx.cancel();

    let leader = tokio::time::timeout(Duration::from_secs(1), leader).await??;
    let follower = tokio::time::timeout(Duration::from_secs(1), follower).await??;
    assert_eq!(kind(leader), Some(ErrorKind::Timeout));
    assert_eq!(kind(follower), Some(ErrorKind::Timeout));
    assert_eq!(slow.calls(), 1);
    assert_eq!(engine.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn request_deadline_yields_timeout() -> TestResult {
    let slow = Arc::new(
        MemoryLoader::new("slow")
            .with_image("a.png", b"src")
            .with_latency(Duration::from_secs(5)),
    );
    let engine = builder()
        .config(EngineConfig {
            request_timeout: Some(Duration::from_millis(30)),
            ..EngineConfig::default()
        })
        .loader(slow)
        .build();
    let outcome = engine.serve(&RequestContext::background(), PATH).await;
    assert_eq!(kind(outcome), Some(ErrorKind::Timeout));
    Ok(())
}

#[tokio::test]
async fn modified_time_check_discards_stale_results() -> TestResult {
    let ctx = RequestContext::background();
    let key = result_key(PATH)?;
    let stale = Utc::now() - TimeDelta::hours(1);
    let loader = Arc::new(MemoryLoader::new("memory").with_modified("a.png", b"src", Utc::now()));

    let results = Arc::new(MemoryStorage::new("results"));
    results.insert_modified(key.clone(), b"old", stale);
    let engine = builder()
        .config(EngineConfig {
            modified_time_check: true,
            ..EngineConfig::default()
        })
        .loader(loader.clone())
        .processor(Arc::new(CountingProcessor::new("p")))
        .result_storage(results.clone())
        .build();
    assert_eq!(body(&engine.serve(&ctx, PATH).await?).await?, "p:100x50:src");

    let unchecked_results = Arc::new(MemoryStorage::new("results"));
    unchecked_results.insert_modified(key, b"old", stale);
    let engine = builder()
        .loader(loader)
        .processor(Arc::new(CountingProcessor::new("p")))
        .result_storage(unchecked_results)
        .build();
    assert_eq!(body(&engine.serve(&ctx, PATH).await?).await?, "old");
    Ok(())
}

#[tokio::test]
async fn passthrough_meta_and_background_writes() -> TestResult {
    let ctx = RequestContext::background();
    let loader = Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"));

    let bare = builder().loader(loader.clone()).build();
    assert_eq!(body(&bare.serve(&ctx, PATH).await?).await?, "src");

    let results = Arc::new(MemoryStorage::new("results"));
    let engine = builder()
        .config(EngineConfig {
            result_write_mode: WriteMode::Background,
            ..EngineConfig::default()
        })
        .loader(loader)
        .processor(Arc::new(CountingProcessor::new("p")))
        .result_storage(results.clone())
        .build();
    engine.serve(&ctx, "/unsafe/meta/a.png").await?;
    engine.serve(&ctx, PATH).await?;
    let key = result_key(PATH)?;
    for _ in 0..50 {
        if results.contains(&key) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(results.keys(), vec![key]);
    Ok(())
}

#[tokio::test]
async fn serve_blob_and_processor_lifecycle() -> TestResult {
    let processor = Arc::new(CountingProcessor::new("p"));
    let loader = Arc::new(MemoryLoader::new("memory"));
    let engine = builder()
        .loader(loader.clone())
        .processor(processor.clone())
        .build();

    engine.startup().await?;
    let mut params = Params::for_image("inline.png");
    params.width = 7;
    let blob = engine
        .serve_blob(
            &RequestContext::background(),
            Blob::from_bytes(b"raw".to_vec()),
            &params,
        )
        .await?;
    assert_eq!(body(&blob).await?, "p:7x0:raw");
    assert_eq!(loader.calls(), 0);
    engine.shutdown().await?;
    assert_eq!((processor.startups(), processor.shutdowns()), (1, 1));
    Ok(())
}

#[tokio::test]
async fn process_concurrency_limit_still_serves_every_key() -> TestResult {
    let processor = Arc::new(CountingProcessor::new("p").with_latency(Duration::from_millis(20)));
    let mut loader = MemoryLoader::new("memory");
    for index in 0..4 {
        loader = loader.with_image(format!("{index}.png"), b"src");
    }
    let engine = builder()
        .config(EngineConfig {
            process_concurrency: Some(1),
            ..EngineConfig::default()
        })
        .loader(Arc::new(loader))
        .processor(processor.clone())
        .build();

    let mut tasks = Vec::new();
    for index in 0..4 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .serve(&RequestContext::background(), &format!("/unsafe/{index}.png"))
                .await
        }));
    }
    for task in tasks {
        task.await??;
    }
    assert_eq!(processor.calls(), 4);
    Ok(())
}
