//! Router core - request path to device/resource resolution.

use crate::registry::{Device, DeviceRegistry, ResourceDescriptor};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, info};

/// Literal first path segment of every data request.
pub const RESOURCE_SEGMENT: &str = "a1r";

/// Segment capacity before [`PathSegments`] spills to the heap.
///
/// A valid path has three segments; one more slot lets the router see the
/// "too many segments" case without allocating.
pub const MAX_INLINE_SEGMENTS: usize = 4;

/// Stack-allocated path segments for the dispatch hot path.
pub type PathSegments<'a> = SmallVec<[&'a str; MAX_INLINE_SEGMENTS]>;

/// Why a path failed to route.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The path ended before the given segment index.
    #[error("missing path segment {0}")]
    MissingSegment(usize),
    /// Segment 0 was not the resource literal.
    #[error("invalid path prefix {0:?}")]
    InvalidPrefix(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("resource {resource} not found on device {device}")]
    ResourceNotFound { device: String, resource: String },
    /// Segments remained after the resource name.
    #[error("unexpected path segment {0:?}")]
    ExtraSegment(String),
}

/// A resolved device and resource, owned by the request that routed them.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub device: Arc<Device>,
    /// Name of the profile the resource was found in
    pub profile_name: String,
    pub resource: Arc<ResourceDescriptor>,
}

/// Split a textual path into its non-empty segments.
///
/// Repeated or leading/trailing `/` produce no empty segments.
#[inline]
#[must_use]
pub fn split_path(path: &str) -> PathSegments<'_> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Resolves `/a1r/<device>/<resource>` paths against a device registry.
#[derive(Clone)]
pub struct ResourceRouter {
    registry: Arc<dyn DeviceRegistry>,
}

impl std::fmt::Debug for ResourceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRouter").finish_non_exhaustive()
    }
}

impl ResourceRouter {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Route a textual path such as `/a1r/dev/res`.
    #[inline]
    pub fn route_path(&self, path: &str) -> Result<RouteMatch, RouteError> {
        self.route(&split_path(path))
    }

    /// Route pre-split path segments.
    ///
    /// Empty segments are skipped before the scheme is checked.
    ///
    /// # Arguments
    ///
    /// * `segments` - Path segments in request order (e.g. the Uri-Path options)
    ///
    /// # Returns
    ///
    /// The device and resource on success. On failure any device reference acquired
    /// along the way has already been released.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] describing the first segment that failed.
    pub fn route(&self, segments: &[&str]) -> Result<RouteMatch, RouteError> {
        let mut iter = segments.iter().copied().filter(|s| !s.is_empty());

        let prefix = iter.next().ok_or(RouteError::MissingSegment(0))?;
        if prefix != RESOURCE_SEGMENT {
            info!(segment = %prefix, "Invalid path prefix, expected {}", RESOURCE_SEGMENT);
            return Err(RouteError::InvalidPrefix(prefix.to_owned()));
        }

        let device_name = iter.next().ok_or_else(|| {
            info!("Path is missing the device name");
            RouteError::MissingSegment(1)
        })?;
        let resource_name = iter.next().ok_or_else(|| {
            info!(device = %device_name, "Path is missing the resource name");
            RouteError::MissingSegment(2)
        })?;

        let device = self.registry.device_by_name(device_name).ok_or_else(|| {
            info!(device = %device_name, "No device found");
            RouteError::DeviceNotFound(device_name.to_owned())
        })?;

        let (profile_name, resource) = match device.find_resource(resource_name) {
            Some(m) => (m.profile.name.clone(), Arc::clone(m.resource)),
            None => {
                info!(
                    device = %device_name,
                    resource = %resource_name,
                    "No resource found on device"
                );
                return Err(RouteError::ResourceNotFound {
                    device: device_name.to_owned(),
                    resource: resource_name.to_owned(),
                });
            }
        };

        if let Some(extra) = iter.next() {
            info!(
                device = %device_name,
                resource = %resource_name,
                segment = %extra,
                "Unexpected path segment after resource name"
            );
            return Err(RouteError::ExtraSegment(extra.to_owned()));
        }

        debug!(
            device = %device.name,
            profile = %profile_name,
            resource = %resource.name,
            value_type = %resource.value_type,
            "Route matched"
        );
        Ok(RouteMatch {
            device,
            profile_name,
            resource,
        })
    }
}
