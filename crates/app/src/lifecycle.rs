use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use employee_map_core::{MapHandle, MapOptions, MapSurface, SurfaceError, TileLayer};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A map mounted on a surface for the lifetime of the service.
///
/// Mounting creates the map, adds the tile layer and arms a fallback timer
/// that invalidates the map size once, unless the page reports its layout
/// first through [`MapMount::layout_ready`].
pub struct MapMount<S: MapSurface + 'static> {
    surface: Arc<S>,
    handle: MapHandle,
    layout_fixed: Arc<AtomicBool>,
    layout_timer: JoinHandle<()>,
    unmounted: AtomicBool,
}

impl<S: MapSurface + 'static> MapMount<S> {
    /// Must be called from within a Tokio runtime.
    pub fn mount(
        surface: Arc<S>,
        container_id: &str,
        options: &MapOptions,
        tile_layer: &TileLayer,
        layout_delay: Duration,
    ) -> Result<Self, SurfaceError> {
        let handle = surface.create(container_id, options)?;
        surface.add_tile_layer(handle, tile_layer)?;

        let layout_fixed = Arc::new(AtomicBool::new(false));
        let layout_timer = {
            let surface = surface.clone();
            let layout_fixed = layout_fixed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(layout_delay).await;
                match invalidate_once(surface.as_ref(), handle, &layout_fixed) {
                    Ok(true) => debug!(stage = "lifecycle", map = %handle, "layout invalidated after fallback delay"),
                    Ok(false) => {}
                    Err(err) => warn!(stage = "lifecycle", map = %handle, error = %err, "deferred layout invalidation failed"),
                }
            })
        };

        info!(stage = "lifecycle", map = %handle, container_id, "map mounted");
        Ok(Self {
            surface,
            handle,
            layout_fixed,
            layout_timer,
            unmounted: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> MapHandle {
        self.handle
    }

    /// Invalidates the map size now if that has not happened yet.
    ///
    /// Returns `true` when this call performed the invalidation.
    pub fn layout_ready(&self) -> Result<bool, SurfaceError> {
        let fixed = invalidate_once(self.surface.as_ref(), self.handle, &self.layout_fixed)?;
        if fixed {
            self.layout_timer.abort();
        }
        Ok(fixed)
    }

    /// Destroys the map. Subsequent calls are no-ops returning `false`.
    pub fn unmount(&self) -> Result<bool, SurfaceError> {
        if self.unmounted.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.layout_timer.abort();
        self.surface.destroy(self.handle)?;
        info!(stage = "lifecycle", map = %self.handle, "map unmounted");
        Ok(true)
    }
}

fn invalidate_once<S: MapSurface + ?Sized>(
    surface: &S,
    handle: MapHandle,
    layout_fixed: &AtomicBool,
) -> Result<bool, SurfaceError> {
    if layout_fixed.swap(true, Ordering::AcqRel) {
        return Ok(false);
    }
    surface.invalidate_size(handle)?;
    Ok(true)
}
