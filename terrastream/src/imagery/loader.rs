//! Driving imagery tiles through their loading states.
//!
//! [`ImageryLoader`] advances one imagery tile at a time, once per frame:
//!
//! 1. `Transitioning`: poll the in-flight request
//! 2. `Unloaded`: submit a request through the [`RequestScheduler`]
//! 3. `Received`: decode the payload and apply the discard policy
//! 4. `TextureLoaded`: mark the tile ready
//!
//! A tile can move through several states in a single call. Failures are
//! routed through the layer's [`ErrorReporter`]; a listener asking for a
//! retry puts the tile back to `Unloaded`.
//!
//! [`ImageryLoader::process_overlay`] runs the same machine for the imagery
//! of a [`TileOverlay`] and falls back to the nearest ready ancestor while the
//! tile itself is not ready.
//!
//! # Example
//!
//! ```ignore
//! let mut loader = ImageryLoader::new(&mut layer, &mut scheduler).with_priority(distance);
//! let done = loader.process_overlays(&mut tile.overlays, &tile_rectangle, false);
//! ```

use std::sync::Arc;

use tracing::{debug, trace};

use super::cache::{ImageryCache, ImageryHandle};
use super::entry::{Imagery, ImageryState};
use super::error::{ErrorReporter, ImageryError};
use super::layer::ImageryLayer;
use super::overlay::{texture_translation_and_scale, TextureTransform, TileOverlay};
use crate::request::{FetchRequest, HandleStatus, RequestOutcome, RequestScheduler, Submission};
use crate::tiling::{Rectangle, TilingScheme};
use crate::transport::ResponseType;

/// Loads the imagery of one layer for the current frame.
pub struct ImageryLoader<'a> {
    layer: &'a mut ImageryLayer,
    scheduler: &'a mut RequestScheduler,
    priority: f64,
}

impl<'a> ImageryLoader<'a> {
    pub fn new(layer: &'a mut ImageryLayer, scheduler: &'a mut RequestScheduler) -> Self {
        Self {
            layer,
            scheduler,
            priority: 0.0,
        }
    }

    /// Priority of requests issued by this loader; lower is more urgent.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Advances the imagery tile behind `handle`.
    ///
    /// With `skip_loading` set, no new request is issued this frame. Returns
    /// the tile's state afterwards, or `None` for a stale handle.
    pub fn process_imagery(&mut self, handle: ImageryHandle, skip_loading: bool) -> Option<ImageryState> {
        let (provider, cache, reporter) = self.layer.parts_mut();
        let imagery = cache.get_mut(handle)?;

        if imagery.state == ImageryState::Transitioning {
            let status = match imagery.request.as_mut() {
                Some(request) => request.poll_outcome(),
                None => HandleStatus::Closed,
            };

            match status {
                HandleStatus::Pending => {}
                HandleStatus::Ready(RequestOutcome { result: Ok(bytes), .. }) => {
                    imagery.request = None;
                    imagery.payload = Some(bytes);
                    imagery.state = ImageryState::Received;
                    ErrorReporter::report_success(imagery.error.as_mut());
                    trace!(tile = %imagery.key, "Imagery received");
                }
                HandleStatus::Ready(RequestOutcome { result: Err(error), .. }) if error.is_cancelled() => {
                    imagery.request = None;
                    imagery.state = ImageryState::Unloaded;
                }
                HandleStatus::Ready(RequestOutcome { result: Err(error), .. }) => {
                    imagery.request = None;
                    imagery.state = ImageryState::Failed;
                    report_failure(reporter, imagery, &error);
                }
                HandleStatus::Closed => {
                    imagery.request = None;
                    imagery.state = ImageryState::Unloaded;
                }
            }
        }

        if imagery.state == ImageryState::Unloaded && !skip_loading {
            let request = FetchRequest::new(provider.tile_url(imagery.key))
                .with_throttle_by_server(true)
                .with_priority(self.priority)
                .with_response_type(ResponseType::Image);

            match self.scheduler.request(request) {
                Ok(Submission::Issued(request)) => {
                    imagery.request = Some(request);
                    imagery.state = ImageryState::Transitioning;
                }
                Ok(Submission::Deferred(_)) => {
                    trace!(tile = %imagery.key, "Imagery request deferred");
                }
                Err(error) => {
                    imagery.state = ImageryState::Failed;
                    report_failure(reporter, imagery, &error);
                }
            }
        }

        if imagery.state == ImageryState::Received {
            let policy = provider.tile_discard_policy();
            // Wait for the policy before decoding
            if policy.map_or(true, |policy| policy.is_ready()) {
                let decoded = imagery
                    .payload
                    .take()
                    .map(|payload| image::load_from_memory(&payload).map(|image| image.to_rgba8()));

                match decoded {
                    None => imagery.state = ImageryState::Unloaded,
                    Some(Err(error)) => {
                        imagery.state = ImageryState::Failed;
                        report_failure(reporter, imagery, &ImageryError::Decode(error));
                    }
                    Some(Ok(image)) if policy.is_some_and(|policy| policy.should_discard(&image)) => {
                        debug!(tile = %imagery.key, "Imagery discarded by policy");
                        imagery.state = ImageryState::Invalid;
                    }
                    Some(Ok(image)) => {
                        imagery.image = Some(image);
                        imagery.state = ImageryState::TextureLoaded;
                    }
                }
            }
        }

        if imagery.state == ImageryState::TextureLoaded {
            imagery.state = ImageryState::Ready;
            trace!(tile = %imagery.key, "Imagery ready");
        }

        Some(imagery.state)
    }

    /// Advances the imagery of `overlay`, which drapes a terrain tile
    /// covering `terrain_rectangle`.
    ///
    /// Returns true once the overlay is done: its imagery is ready, or it
    /// failed and the best available ancestor is in place.
    pub fn process_overlay(
        &mut self,
        overlay: &mut TileOverlay,
        terrain_rectangle: &Rectangle,
        skip_loading: bool,
    ) -> bool {
        let Some(loading) = overlay.loading else {
            return true;
        };

        let state = self
            .process_imagery(loading, skip_loading)
            .unwrap_or(ImageryState::Invalid);
        let scheme = Arc::clone(self.layer.provider().tiling_scheme());
        let cache = self.layer.cache_mut();

        if state == ImageryState::Ready {
            if let Some(previous) = overlay.ready.replace(loading) {
                cache.release(previous);
            }
            overlay.loading = None;
            overlay.transform = transform_for(cache, scheme.as_ref(), loading, terrain_rectangle, overlay.mercator_native);
            return true;
        }

        // Nearest ready ancestor to draw meanwhile
        let mut ancestor = cache.get(loading).and_then(Imagery::parent);
        let mut closest_loading = None;
        while let Some(handle) = ancestor {
            let Some(imagery) = cache.get(handle) else {
                ancestor = None;
                break;
            };
            if imagery.is_ready() {
                break;
            }
            if !imagery.state().is_terminal() && closest_loading.is_none() {
                closest_loading = Some(handle);
            }
            ancestor = imagery.parent();
        }

        if overlay.ready != ancestor {
            if let Some(handle) = ancestor {
                cache.add_reference(handle);
            }
            if let Some(previous) = std::mem::replace(&mut overlay.ready, ancestor) {
                cache.release(previous);
            }
            overlay.transform = ancestor.and_then(|handle| {
                transform_for(cache, scheme.as_ref(), handle, terrain_rectangle, overlay.mercator_native)
            });
        }

        if state.is_terminal() {
            // Ancestors not attached to any terrain tile only load from here
            if let Some(handle) = closest_loading {
                self.process_imagery(handle, skip_loading);
                return false;
            }
            return true;
        }

        false
    }

    /// Advances every overlay of a terrain tile. Returns true when all are
    /// done.
    pub fn process_overlays(
        &mut self,
        overlays: &mut [TileOverlay],
        terrain_rectangle: &Rectangle,
        skip_loading: bool,
    ) -> bool {
        let mut done = true;
        for overlay in overlays.iter_mut() {
            done &= self.process_overlay(overlay, terrain_rectangle, skip_loading);
        }
        done
    }
}

fn transform_for(
    cache: &ImageryCache,
    scheme: &dyn TilingScheme,
    handle: ImageryHandle,
    terrain_rectangle: &Rectangle,
    mercator_native: bool,
) -> Option<TextureTransform> {
    cache
        .get(handle)
        .map(|imagery| texture_translation_and_scale(scheme, terrain_rectangle, imagery.rectangle(), mercator_native))
}

/// Reports a failed tile; a granted retry puts it back to `Unloaded`.
fn report_failure(reporter: &mut ErrorReporter, imagery: &mut Imagery, error: &dyn std::error::Error) {
    let key = imagery.key;
    let message = format!(
        "Failed to obtain image tile X: {} Y: {} Level: {}.",
        key.x, key.y, key.level
    );

    let mut retry_requested = false;
    let mut retry = || retry_requested = true;
    let record = reporter.report(imagery.error.take(), message, key, Some(&mut retry), Some(error));
    imagery.error = Some(record);

    if retry_requested {
        debug!(tile = %key, "Retrying imagery");
        imagery.state = ImageryState::Unloaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::imagery::{DiscardMissingTilePolicy, TextureRectangle, TileOverlayMapper, UrlTemplateProvider};
    use crate::quadtree::TileKey;
    use crate::transport::{MockResponse, MockTransport, TransportError};
    use bytes::Bytes;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use tokio::runtime::Handle;

    const TEMPLATE: &str = "https://tiles.example.com/{z}/{x}/{y}.png";

    fn png(color: Rgba<u8>) -> Bytes {
        let mut encoded = Vec::new();
        RgbaImage::from_pixel(4, 4, color)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();
        Bytes::from(encoded)
    }

    fn layer() -> ImageryLayer {
        ImageryLayer::new(Arc::new(UrlTemplateProvider::new(TEMPLATE).unwrap()))
    }

    fn scheduler(transport: Arc<MockTransport>) -> RequestScheduler {
        RequestScheduler::new(&SchedulerConfig::default(), transport, Handle::current())
    }

    /// Admits queued requests, lets them run and resolves their handles.
    async fn pump(scheduler: &mut RequestScheduler) {
        scheduler.tick();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        scheduler.tick();
    }

    fn state(layer: &ImageryLayer, handle: ImageryHandle) -> ImageryState {
        layer.cache().get(handle).map(Imagery::state).unwrap()
    }

    #[tokio::test]
    async fn test_loads_to_ready() {
        let transport = Arc::new(MockTransport::new(MockResponse::Ok(png(Rgba([0, 90, 200, 255])))));
        let mut scheduler = scheduler(Arc::clone(&transport));
        let mut layer = layer();
        let handle = layer.imagery_from_cache(TileKey::new(1, 1, 1));

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert_eq!(loader.process_imagery(handle, false), Some(ImageryState::Transitioning));
        drop(loader);

        pump(&mut scheduler).await;

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert_eq!(loader.process_imagery(handle, false), Some(ImageryState::Ready));

        let imagery = layer.cache().get(handle).unwrap();
        assert!(imagery.payload().is_none());
        assert_eq!(imagery.image().map(|image| image.dimensions()), Some((4, 4)));
        assert_eq!(transport.calls(), vec!["https://tiles.example.com/1/1/1.png".to_string()]);
    }

    #[tokio::test]
    async fn test_skip_loading_issues_nothing() {
        let transport = Arc::new(MockTransport::ok(&[]));
        let mut scheduler = scheduler(Arc::clone(&transport));
        let mut layer = layer();
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert_eq!(loader.process_imagery(handle, true), Some(ImageryState::Unloaded));
        assert_eq!(scheduler.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let transport = Arc::new(MockTransport::new(MockResponse::Err(TransportError::status(
            404,
            "Not Found",
        ))));
        let mut scheduler = scheduler(transport);
        let mut layer = layer();
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        pump(&mut scheduler).await;
        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);

        assert_eq!(state(&layer, handle), ImageryState::Failed);
        let error = layer.cache().get(handle).and_then(Imagery::error).unwrap();
        assert_eq!(error.message, "Failed to obtain image tile X: 0 Y: 0 Level: 0.");
        assert_eq!(error.times_retried, Some(0));
        assert!(error.error.as_deref().unwrap_or_default().contains("404"));
    }

    #[tokio::test]
    async fn test_listener_retry_resets_to_unloaded() {
        let transport = Arc::new(MockTransport::new(MockResponse::Err(TransportError::network(
            "connection reset",
        ))));
        let mut scheduler = scheduler(Arc::clone(&transport));
        let mut layer = layer();
        layer.error_reporter_mut().set_retry_limit(1);
        layer
            .error_reporter_mut()
            .error_event_mut()
            .add_listener(|record| record.retry = true);
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        pump(&mut scheduler).await;

        // Retried once: the failure re-issues the request in the same call
        let state = ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        assert_eq!(state, Some(ImageryState::Transitioning));

        pump(&mut scheduler).await;

        // The limit is reached
        let state = ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        assert_eq!(state, Some(ImageryState::Failed));
        assert_eq!(transport.calls().len(), 2);
        let error = layer.cache().get(handle).and_then(Imagery::error).unwrap();
        assert_eq!(error.times_retried, Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_to_unloaded() {
        let transport = Arc::new(MockTransport::ok(&[]).gated());
        let mut scheduler = scheduler(Arc::clone(&transport));
        let mut layer = layer();
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        scheduler.tick();
        assert_eq!(scheduler.active_count(), 1);

        let imagery = layer.cache().get(handle).unwrap();
        imagery.request.as_ref().unwrap().cancel();
        scheduler.tick();
        assert_eq!(scheduler.active_count(), 0);

        let state = ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, true);
        assert_eq!(state, Some(ImageryState::Unloaded));
        assert!(layer.cache().get(handle).and_then(Imagery::error).is_none());
    }

    #[tokio::test]
    async fn test_decode_failure_fails_tile() {
        let transport = Arc::new(MockTransport::ok(b"definitely not a png"));
        let mut scheduler = scheduler(transport);
        let mut layer = layer();
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        pump(&mut scheduler).await;
        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);

        assert_eq!(state(&layer, handle), ImageryState::Failed);
        assert!(layer.cache().get(handle).unwrap().payload().is_none());
    }

    #[tokio::test]
    async fn test_discard_policy_marks_invalid() {
        let magenta = Rgba([255, 0, 255, 255]);
        let missing = RgbaImage::from_pixel(4, 4, magenta);
        let provider = UrlTemplateProvider::new(TEMPLATE)
            .unwrap()
            .with_discard_policy(Box::new(DiscardMissingTilePolicy::new(&missing, &[(0, 0), (3, 3)])));
        let mut layer = ImageryLayer::new(Arc::new(provider));

        let transport = Arc::new(MockTransport::new(MockResponse::Ok(png(magenta))));
        let mut scheduler = scheduler(transport);
        let handle = layer.imagery_from_cache(TileKey::new(0, 0, 0));

        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);
        pump(&mut scheduler).await;
        ImageryLoader::new(&mut layer, &mut scheduler).process_imagery(handle, false);

        assert_eq!(state(&layer, handle), ImageryState::Invalid);
        assert!(layer.cache().get(handle).unwrap().image().is_none());
    }

    /// Overlay on the NW quarter of the globe, with its level 0 parent loaded.
    async fn overlay_with_ready_parent(
        layer: &mut ImageryLayer,
        scheduler: &mut RequestScheduler,
    ) -> (TileOverlay, ImageryHandle, ImageryHandle) {
        let child = layer.imagery_from_cache(TileKey::new(0, 0, 1));
        let parent = layer.cache().find(TileKey::new(0, 0, 0)).unwrap();

        ImageryLoader::new(layer, scheduler).process_imagery(parent, false);
        pump(scheduler).await;
        ImageryLoader::new(layer, scheduler).process_imagery(parent, false);
        assert_eq!(state(layer, parent), ImageryState::Ready);

        let rectangle = TextureRectangle {
            min_u: 0.0,
            min_v: 0.0,
            max_u: 1.0,
            max_v: 1.0,
        };
        (TileOverlay::new(child, rectangle, false), child, parent)
    }

    #[tokio::test]
    async fn test_overlay_falls_back_to_ready_ancestor() {
        let transport = Arc::new(MockTransport::new(MockResponse::Ok(png(Rgba([10, 10, 10, 255])))));
        transport.respond(
            "https://tiles.example.com/1/0/0.png",
            MockResponse::Err(TransportError::status(500, "Internal Server Error")),
        );
        let mut scheduler = scheduler(transport);
        let mut layer = layer();
        let (mut overlay, child, parent) = overlay_with_ready_parent(&mut layer, &mut scheduler).await;
        let terrain_rectangle = *layer.cache().get(child).unwrap().rectangle();

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert!(!loader.process_overlay(&mut overlay, &terrain_rectangle, false));
        assert_eq!(overlay.ready_imagery(), Some(parent));
        assert_eq!(layer.cache().reference_count(parent), 2);

        // The parent spans twice the child's width
        let transform = overlay.transform().unwrap();
        assert!((transform.scale_x - 0.5).abs() < 1e-9);

        pump(&mut scheduler).await;
        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert!(loader.process_overlay(&mut overlay, &terrain_rectangle, false));
        assert_eq!(overlay.loading_imagery(), Some(child));
        assert_eq!(overlay.ready_imagery(), Some(parent));
        assert_eq!(state(&layer, child), ImageryState::Failed);
    }

    #[tokio::test]
    async fn test_overlay_swaps_in_loaded_imagery() {
        let transport = Arc::new(MockTransport::new(MockResponse::Ok(png(Rgba([10, 10, 10, 255])))));
        let mut scheduler = scheduler(transport);
        let mut layer = layer();
        let (mut overlay, child, parent) = overlay_with_ready_parent(&mut layer, &mut scheduler).await;
        let terrain_rectangle = *layer.cache().get(child).unwrap().rectangle();

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert!(!loader.process_overlay(&mut overlay, &terrain_rectangle, false));
        pump(&mut scheduler).await;

        let mut loader = ImageryLoader::new(&mut layer, &mut scheduler);
        assert!(loader.process_overlays(std::slice::from_mut(&mut overlay), &terrain_rectangle, false));
        assert_eq!(overlay.loading_imagery(), None);
        assert_eq!(overlay.ready_imagery(), Some(child));
        assert_eq!(layer.cache().reference_count(parent), 1);

        let transform = overlay.transform().unwrap();
        assert!((transform.scale_x - 1.0).abs() < 1e-9);
        assert!(transform.translation_x.abs() < 1e-9);

        TileOverlayMapper::release_overlays(&mut layer, [overlay]);
        assert!(layer.cache().is_empty());
    }
}
