mod common;

use std::sync::Arc;
use std::time::Duration;

use chartroom_client_core::tiles::{TileAddress, TileCache, TileCacheConfig, TileError, TileLookup};
use common::{ScriptedFetcher, eventually, tile_color};

fn address(col: u32, row: u32) -> TileAddress {
    TileAddress::new("harbour", 2, col, row)
}

fn cache(fetcher: &Arc<ScriptedFetcher>, concurrency: usize, capacity: usize) -> TileCache {
    TileCache::new(
        fetcher.clone(),
        TileCacheConfig {
            concurrency,
            capacity,
        },
    )
}

#[tokio::test]
async fn concurrent_requests_share_one_download() {
    let fetcher = Arc::new(ScriptedFetcher::gated((8, 8)));
    let cache = Arc::new(cache(&fetcher, 3, 16));
    let tile = address(1, 1);

    assert!(matches!(cache.get_tile(&tile), TileLookup::Pending));
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let tile = tile.clone();
            tokio::spawn(async move { cache.fetch(&tile).await })
        })
        .collect();
    eventually(|| fetcher.calls().len() == 1).await;
    assert!(matches!(cache.get_tile(&tile), TileLookup::Pending));
    assert!(cache.is_in_flight(&tile));

    fetcher.release(1);
    let mut rasters = Vec::new();
    for waiter in waiters {
        rasters.push(waiter.await.unwrap().unwrap());
    }
    assert!(rasters.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(rasters[0].get_pixel(3, 3).0, tile_color(1, 1));

    let ready = cache.get_tile(&tile).ready().expect("tile cached");
    assert!(Arc::ptr_eq(&ready, &rasters[0]));
    assert_eq!(fetcher.calls().len(), 1);
    let stats = cache.stats();
    assert_eq!((stats.downloads, stats.in_flight, stats.ready), (1, 0, 1));
}

#[tokio::test]
async fn failed_download_is_retried_on_next_request() {
    let fetcher = Arc::new(ScriptedFetcher::open((4, 4)));
    let cache = cache(&fetcher, 2, 16);
    let tile = address(0, 3);
    fetcher.fail_once(tile.clone());

    let err = cache.fetch(&tile).await.unwrap_err();
    assert!(matches!(err, TileError::Status { status: 503, .. }));
    assert!(!cache.is_in_flight(&tile));
    assert!(!cache.contains(&tile));

    cache.fetch(&tile).await.expect("second attempt succeeds");
    assert!(cache.contains(&tile));
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(cache.stats().failures, 1);
}

#[tokio::test]
async fn undecodable_tiles_fail_without_being_cached() {
    let fetcher = Arc::new(ScriptedFetcher::open((4, 4)));
    let cache = cache(&fetcher, 1, 16);
    let tile = address(2, 2);
    fetcher.serve_garbage(tile.clone());

    let err = cache.fetch(&tile).await.unwrap_err();
    assert!(matches!(err, TileError::Decode { .. }));
    assert!(!cache.contains(&tile));
}

#[tokio::test]
async fn capacity_evicts_least_recently_used() {
    let fetcher = Arc::new(ScriptedFetcher::open((4, 4)));
    let cache = cache(&fetcher, 1, 2);
    let (a, b, c) = (address(0, 0), address(1, 0), address(2, 0));

    cache.fetch(&a).await.unwrap();
    cache.fetch(&b).await.unwrap();
    assert!(cache.get_tile(&a).ready().is_some());
    cache.fetch(&c).await.unwrap();

    assert!(cache.contains(&a));
    assert!(!cache.contains(&b));
    assert!(cache.contains(&c));
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.stats().ready, 2);
}

#[tokio::test]
async fn downloads_start_in_submission_order() {
    let fetcher = Arc::new(ScriptedFetcher::gated((4, 4)));
    let cache = cache(&fetcher, 1, 16);
    let order: Vec<_> = [(2, 2), (0, 1), (3, 0), (1, 1)]
        .into_iter()
        .map(|(col, row)| address(col, row))
        .collect();
    for tile in &order {
        cache.get_tile(tile);
    }

    fetcher.release(order.len());
    for tile in &order {
        cache.fetch(tile).await.unwrap();
    }
    assert_eq!(fetcher.calls(), order);
    assert_eq!(fetcher.max_active(), 1);
}

#[tokio::test]
async fn concurrency_bounds_running_downloads() {
    let fetcher = Arc::new(ScriptedFetcher::gated((4, 4)));
    let cache = cache(&fetcher, 2, 16);
    let tiles: Vec<_> = (0..5).map(|col| address(col, 0)).collect();
    for tile in &tiles {
        cache.get_tile(tile);
    }

    eventually(|| fetcher.calls().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(cache.stats().in_flight, 5);

    fetcher.release(tiles.len());
    for tile in &tiles {
        cache.fetch(tile).await.unwrap();
    }
    assert_eq!(fetcher.calls().len(), 5);
    assert_eq!(fetcher.max_active(), 2);
}

#[tokio::test]
async fn release_all_abandons_waiters_and_drops_late_results() {
    let fetcher = Arc::new(ScriptedFetcher::gated((4, 4)));
    let cache = Arc::new(cache(&fetcher, 1, 16));
    let tile = address(4, 4);

    let waiter = {
        let cache = cache.clone();
        let tile = tile.clone();
        tokio::spawn(async move { cache.fetch(&tile).await })
    };
    eventually(|| fetcher.calls().len() == 1).await;
    cache.release_all();
    assert_eq!(waiter.await.unwrap().unwrap_err(), TileError::Abandoned);

    fetcher.release(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!cache.contains(&tile));
    assert_eq!(cache.stats().ready, 0);
}
