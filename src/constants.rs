//! Constant values used throughout the crate: standard GATT uuids and
//! default timings.

use std::time::Duration;

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid =
    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

/// How long a smart scan waits on the filtered scan before falling back
/// to an unfiltered one.
pub const DEFAULT_SMART_SCAN_TIMEOUT: Duration = Duration::from_secs(3);

/// Name shown for devices that never advertised one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";
