//! # Device Registry
//!
//! Device and resource metadata consumed by the router.
//!
//! The gateway only needs name-based lookup: a request names a device, and the device's
//! profiles name the resources it may report. [`DeviceRegistry`] is the seam; the bundled
//! [`DeviceCatalog`] is an indexed, read-only map from device name to device, seeded from the
//! `devices` section of the configuration file.
//!
//! Lookups hand out `Arc<Device>`. The reference lives exactly as long as the request that
//! acquired it and is released by scope on every exit path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Value type a resource is declared to accept.
///
/// Only `Float64`, `Int32` and `String` are decoded by this gateway; the remaining variants
/// are valid metadata that the decoder rejects as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Bool => "Bool",
            ValueType::Int8 => "Int8",
            ValueType::Int16 => "Int16",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::Uint8 => "Uint8",
            ValueType::Uint16 => "Uint16",
            ValueType::Uint32 => "Uint32",
            ValueType::Uint64 => "Uint64",
            ValueType::Float32 => "Float32",
            ValueType::Float64 => "Float64",
            ValueType::String => "String",
            ValueType::Binary => "Binary",
        };
        write!(f, "{}", s)
    }
}

/// A named resource with its declared value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Ordered resource catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<Arc<ResourceDescriptor>>,
}

impl Profile {
    pub fn new(name: impl Into<String>, resources: Vec<ResourceDescriptor>) -> Self {
        Self {
            name: name.into(),
            resources: resources.into_iter().map(Arc::new).collect(),
        }
    }
}

/// A device known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// Result of a resource lookup on a [`Device`]: the resource plus the profile that owns it.
#[derive(Debug, Clone)]
pub struct ResourceMatch<'a> {
    pub profile: &'a Profile,
    pub resource: &'a Arc<ResourceDescriptor>,
}

impl Device {
    pub fn new(name: impl Into<String>, profiles: Vec<Profile>) -> Self {
        Self {
            name: name.into(),
            profiles,
        }
    }

    /// Find a resource by exact name.
    ///
    /// Scans every profile in order, and every resource within each profile in order;
    /// the first exact match wins.
    pub fn find_resource(&self, name: &str) -> Option<ResourceMatch<'_>> {
        self.profiles.iter().find_map(|profile| {
            profile
                .resources
                .iter()
                .find(|r| r.name == name)
                .map(|resource| ResourceMatch { profile, resource })
        })
    }
}

/// Name-based device lookup.
pub trait DeviceRegistry: Send + Sync {
    /// Look up a device by its unique name.
    ///
    /// The returned reference is owned by the caller for the duration of one request.
    fn device_by_name(&self, name: &str) -> Option<Arc<Device>>;
}

/// Indexed in-memory registry: device name → device.
#[derive(Debug, Default, Clone)]
pub struct DeviceCatalog {
    devices: HashMap<String, Arc<Device>>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of devices.
    ///
    /// A later device with the same name replaces an earlier one.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut catalog = Self::new();
        for device in devices {
            catalog.insert(device);
        }
        info!(devices_count = catalog.len(), "Device catalog loaded");
        catalog
    }

    pub fn insert(&mut self, device: Device) {
        debug!(
            device_name = %device.name,
            profiles = device.profiles.len(),
            "Registering device"
        );
        if self
            .devices
            .insert(device.name.clone(), Arc::new(device))
            .is_some()
        {
            debug!("Replaced existing device definition");
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceRegistry for DeviceCatalog {
    fn device_by_name(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.get(name).map(Arc::clone)
    }
}
