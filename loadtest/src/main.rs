use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the imgcache transformation proxy.
///
/// Traffic mix:
/// - repeated transformations of a small set of variants (cache hits)
/// - unique transformations (cache misses, full fetch+transform+store)
/// - revalidation with `If-None-Match` (304 without touching the origin)
/// - greeting and health probes
///
/// # Usage
/// ```bash
/// cd loadtest
/// SOURCE_URL=https://picsum.photos/id/10/2000/2000 \
///   cargo run --release -- --host http://localhost:3000 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// Watch `/stats` on the proxy during the run for hit rate and coalescing.

const DEFAULT_SOURCE: &str = "https://picsum.photos/id/10/2000/2000";

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("Transformation")
                .register_transaction(transaction!(fresh_image).set_weight(5)?)
                .register_transaction(transaction!(greeting).set_weight(1)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("CachePerformance")
                .register_transaction(transaction!(cached_image).set_weight(15)?)
                .register_transaction(transaction!(revalidate).set_weight(5)?),
        )
        .execute()
        .await?;

    Ok(())
}

fn source() -> String {
    std::env::var("SOURCE_URL").unwrap_or_else(|_| DEFAULT_SOURCE.to_string())
}

/// One of a handful of fixed variants, so every user shares cache entries.
fn popular_variant() -> String {
    let (w, h, output) = {
        let mut rng = rand::thread_rng();
        let variants = [(200, 200, "jpeg"), (400, 300, "jpeg"), (800, 0, "png")];
        variants[rng.gen_range(0..variants.len())]
    };
    let h = if h == 0 { String::new() } else { h.to_string() };
    format!("/?url={}&w={}&h={}&quality=80&output={}", source(), w, h, output)
}

/// Steady-state latency once the popular variants are stored.
async fn cached_image(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get(&popular_variant()).await?;
    Ok(())
}

/// Worst case: a key nobody asked for before.
async fn fresh_image(user: &mut GooseUser) -> TransactionResult {
    // Generate parameters before await to satisfy Send bounds
    let path = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(100..2000);
        let quality = rng.gen_range(40..100);
        // The source URL is part of the key; a throwaway query on it
        // guarantees a miss.
        format!(
            "/?url={}%3Fv%3D{}&w={}&quality={}",
            source(),
            chrono::Utc::now().timestamp_micros(),
            width,
            quality
        )
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Fetches a popular variant, then replays its ETag and expects a 304.
async fn revalidate(user: &mut GooseUser) -> TransactionResult {
    let path = popular_variant();
    let first = user.get(&path).await?;

    let etag = match &first.response {
        Ok(resp) => resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        Err(_) => None,
    };
    let Some(etag) = etag else {
        return Ok(());
    };

    let builder = user
        .get_request_builder(&GooseMethod::Get, &path)?
        .header("If-None-Match", etag);
    let request = GooseRequest::builder()
        .set_request_builder(builder)
        .expect_status_code(304)
        .build();
    let _goose = user.request(request).await?;

    Ok(())
}

/// No `url`: the cheapest path through the service.
async fn greeting(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/").await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
